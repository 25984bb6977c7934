//! In-process materialization store backed by DashMap.
//! Per-key entry locking makes the compare-and-set on `built_at` atomic.

use crate::materialization::{Materialization, MaterializationStore};
use async_trait::async_trait;
use campaign_core::types::SegmentId;
use campaign_core::{CampaignError, CampaignResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct LocalMaterializationStore {
    entries: DashMap<SegmentId, Materialization>,
}

impl LocalMaterializationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MaterializationStore for LocalMaterializationStore {
    async fn persist(&self, segment_id: SegmentId, materialization: Materialization) -> CampaignResult<()> {
        match self.entries.entry(segment_id) {
            Entry::Occupied(mut entry) => {
                let stored = *entry.get();
                if materialization.built_at <= stored.built_at {
                    metrics::counter!("materialization.stale_writes").increment(1);
                    return Err(CampaignError::StaleBuild {
                        segment_id,
                        attempted_ms: materialization.built_at_ms(),
                        stored_ms: stored.built_at_ms(),
                    });
                }
                entry.insert(materialization);
            }
            Entry::Vacant(entry) => {
                entry.insert(materialization);
            }
        }
        debug!(
            segment_id,
            match_count = materialization.match_count,
            "Materialization persisted"
        );
        Ok(())
    }

    async fn read(&self, segment_id: SegmentId) -> CampaignResult<Option<Materialization>> {
        Ok(self.entries.get(&segment_id).map(|entry| *entry.value()))
    }

    async fn discard(&self, segment_id: SegmentId) -> CampaignResult<()> {
        self.entries.remove(&segment_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
