//! Segment registry — owns segment identity, name and current definition.
//!
//! In-memory and backed by DashMap; materialized counts live in the
//! materialization store, not here.

use crate::definition::SegmentDefinition;
use campaign_core::types::SegmentId;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub name: String,
    pub definition: SegmentDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct SegmentRegistry {
    segments: DashMap<SegmentId, SegmentRecord>,
    next_id: AtomicU64,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self {
            segments: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(&self, name: &str, definition: SegmentDefinition) -> CampaignResult<SegmentRecord> {
        let name = validate_name(name)?;
        let now = Utc::now();
        let record = SegmentRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name,
            definition,
            created_at: now,
            updated_at: now,
        };
        self.segments.insert(record.id, record.clone());
        info!(segment_id = record.id, name = %record.name, "Segment created");
        Ok(record)
    }

    pub fn get(&self, id: SegmentId) -> CampaignResult<SegmentRecord> {
        self.segments
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(CampaignError::NotFound(id))
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    /// All segments, ascending by id.
    pub fn list(&self) -> Vec<SegmentRecord> {
        let mut records: Vec<SegmentRecord> =
            self.segments.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Replace the definition wholesale.
    pub fn update_definition(
        &self,
        id: SegmentId,
        definition: SegmentDefinition,
    ) -> CampaignResult<SegmentRecord> {
        self.modify(id, |record| record.definition = definition)
    }

    pub fn rename(&self, id: SegmentId, name: &str) -> CampaignResult<SegmentRecord> {
        let name = validate_name(name)?;
        self.modify(id, |record| record.name = name)
    }

    /// Apply an optional rename and an optional definition replacement as
    /// one update. The name is validated before anything changes.
    pub fn update(
        &self,
        id: SegmentId,
        name: Option<&str>,
        definition: Option<SegmentDefinition>,
    ) -> CampaignResult<SegmentRecord> {
        let name = name.map(validate_name).transpose()?;
        self.modify(id, |record| {
            if let Some(name) = name {
                record.name = name;
            }
            if let Some(definition) = definition {
                record.definition = definition;
            }
        })
    }

    pub fn delete(&self, id: SegmentId) -> CampaignResult<SegmentRecord> {
        let (_, record) = self.segments.remove(&id).ok_or(CampaignError::NotFound(id))?;
        info!(segment_id = id, "Segment deleted");
        Ok(record)
    }

    /// Put back a record removed by [`delete`](Self::delete).
    pub fn restore(&self, record: SegmentRecord) {
        self.segments.entry(record.id).or_insert(record);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn modify<F>(&self, id: SegmentId, apply: F) -> CampaignResult<SegmentRecord>
    where
        F: FnOnce(&mut SegmentRecord),
    {
        let mut entry = self.segments.get_mut(&id).ok_or(CampaignError::NotFound(id))?;
        let record = entry.value_mut();
        apply(record);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> CampaignResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CampaignError::validation("name", "segment name must not be blank"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(CampaignError::validation(
            "name",
            format!("segment name exceeds {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}
