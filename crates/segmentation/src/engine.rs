//! Segmentation engine — the segment API surface.
//!
//! Ties together the registry, the predicate compiler, the membership
//! evaluator and the materialization store. Dry runs and builds share the
//! same scan path; only builds take the per-segment lease and write the cache.

use crate::definition::SegmentDefinition;
use crate::evaluator::{EvaluatorSettings, MembershipEvaluator, ScanOutcome};
use crate::predicates::{compile, DefinitionWarning, Predicate};
use crate::registry::{SegmentRecord, SegmentRegistry};
use crate::source::{ContactSource, MembershipSource};
use campaign_cache::materialization::truncate_to_millis;
use campaign_cache::{LeaseTable, Materialization, MaterializationStore};
use campaign_core::config::SegmentationConfig;
use campaign_core::types::{ContactId, ContactSummary, SegmentId};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Preview: evaluate without touching the materialization store.
    DryRun,
    /// Evaluate and persist the count under the segment's build lease.
    Build,
}

impl EvaluationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::DryRun => "dry_run",
            EvaluationMode::Build => "build",
        }
    }
}

/// A segment together with its materialized state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[schema(value_type = u64)]
    pub id: SegmentId,
    pub name: String,
    pub definition: SegmentDefinition,
    pub materialized_count: Option<u64>,
    pub last_built_at: Option<DateTime<Utc>>,
    pub build_in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// True when never built, or last built longer than `max_age` ago.
    /// Staleness is never detected from data changes; this is purely age.
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.last_built_at
            .map_or(true, |built_at| now.signed_duration_since(built_at) > max_age)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub segment: Segment,
    #[serde(rename = "matches")]
    pub match_count: u64,
    pub sample: Vec<ContactSummary>,
    pub dry_run: bool,
    pub warnings: Vec<DefinitionWarning>,
}

/// Full send-time member set of a segment.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberResolution {
    #[schema(value_type = u64)]
    pub segment_id: SegmentId,
    #[serde(rename = "matches")]
    pub match_count: u64,
    #[schema(value_type = Vec<u64>)]
    pub contact_ids: Vec<ContactId>,
    pub warnings: Vec<DefinitionWarning>,
}

pub struct SegmentationEngine {
    registry: SegmentRegistry,
    evaluator: MembershipEvaluator,
    store: Arc<dyn MaterializationStore>,
    leases: LeaseTable,
    default_timeout: Duration,
}

impl SegmentationEngine {
    pub fn new(
        contacts: Arc<dyn ContactSource>,
        memberships: Arc<dyn MembershipSource>,
        store: Arc<dyn MaterializationStore>,
        config: &SegmentationConfig,
    ) -> Self {
        let settings = EvaluatorSettings::from(config);
        info!(
            batch_size = settings.batch_size,
            sample_size = settings.sample_size,
            max_concurrent_batches = settings.max_concurrent_batches,
            materialization = store.backend_name(),
            "Segmentation engine initialized"
        );
        Self {
            registry: SegmentRegistry::new(),
            evaluator: MembershipEvaluator::new(contacts, memberships, settings),
            store,
            leases: LeaseTable::new(),
            default_timeout: Duration::from_millis(config.evaluation_timeout_ms),
        }
    }

    pub fn materialization_backend(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Round-trip to the materialization store; used by the readiness check.
    pub async fn check_store(&self) -> CampaignResult<()> {
        self.store.read(0).await.map(|_| ())
    }

    // ─── Registry ──────────────────────────────────────────────────────────

    pub async fn create_segment(
        &self,
        name: &str,
        definition: SegmentDefinition,
    ) -> CampaignResult<Segment> {
        compile(&definition)?;
        let record = self.registry.create(name, definition)?;
        // Ids restart with the registry; a persistent store may still hold
        // an entry written under this id by an earlier process.
        if let Err(err) = self.store.discard(record.id).await {
            let _ = self.registry.delete(record.id);
            return Err(err);
        }
        metrics::counter!("segmentation.segments.created").increment(1);
        Ok(self.compose(record, None))
    }

    pub async fn get_segment(&self, id: SegmentId) -> CampaignResult<Segment> {
        let record = self.registry.get(id)?;
        let materialization = self.store.read(id).await?;
        Ok(self.compose(record, materialization))
    }

    pub async fn list_segments(&self) -> CampaignResult<Vec<Segment>> {
        let mut segments = Vec::with_capacity(self.registry.len());
        for record in self.registry.list() {
            let materialization = self.store.read(record.id).await?;
            segments.push(self.compose(record, materialization));
        }
        Ok(segments)
    }

    /// Rename and/or replace the definition. The new definition is compiled
    /// first; nothing changes if either part is invalid. Never builds.
    pub async fn update_segment(
        &self,
        id: SegmentId,
        name: Option<&str>,
        definition: Option<SegmentDefinition>,
    ) -> CampaignResult<Segment> {
        if let Some(definition) = &definition {
            compile(definition)?;
        }
        self.registry.update(id, name, definition)?;
        self.get_segment(id).await
    }

    pub async fn update_definition(
        &self,
        id: SegmentId,
        definition: SegmentDefinition,
    ) -> CampaignResult<Segment> {
        self.update_segment(id, None, Some(definition)).await
    }

    pub async fn rename_segment(&self, id: SegmentId, name: &str) -> CampaignResult<Segment> {
        self.update_segment(id, Some(name), None).await
    }

    /// Remove the segment and its materialization. If the materialization
    /// cannot be discarded the segment is restored, so the delete can be retried.
    pub async fn delete_segment(&self, id: SegmentId) -> CampaignResult<()> {
        let record = self.registry.delete(id)?;
        if let Err(err) = self.store.discard(id).await {
            warn!(segment_id = id, error = %err, "Materialization discard failed, segment restored");
            self.registry.restore(record);
            return Err(err);
        }
        metrics::counter!("segmentation.segments.deleted").increment(1);
        Ok(())
    }

    // ─── Evaluation ────────────────────────────────────────────────────────

    pub async fn dry_run(&self, id: SegmentId) -> CampaignResult<EvaluationResult> {
        self.evaluate(id, EvaluationMode::DryRun, None).await
    }

    pub async fn build(&self, id: SegmentId) -> CampaignResult<EvaluationResult> {
        self.evaluate(id, EvaluationMode::Build, None).await
    }

    /// Evaluate the segment's current definition. `timeout` overrides the
    /// configured evaluation timeout.
    pub async fn evaluate(
        &self,
        id: SegmentId,
        mode: EvaluationMode,
        timeout: Option<Duration>,
    ) -> CampaignResult<EvaluationResult> {
        metrics::counter!("segmentation.evaluations", "mode" => mode.as_str()).increment(1);
        let result = match mode {
            EvaluationMode::DryRun => self.run_dry(id, timeout).await,
            EvaluationMode::Build => self.run_build(id, timeout).await,
        };
        if let Err(err) = &result {
            metrics::counter!("segmentation.evaluation_failures", "code" => err.code()).increment(1);
            warn!(segment_id = id, mode = mode.as_str(), error = %err, "Segment evaluation failed");
        }
        result
    }

    /// Resolve every matching contact id, for campaign targeting at send time.
    /// Reads live data and does not touch the materialization store.
    pub async fn resolve_members(
        &self,
        id: SegmentId,
        timeout: Option<Duration>,
    ) -> CampaignResult<MemberResolution> {
        let predicate = self.predicate_for(id)?;
        let outcome = self.timed_scan(&predicate, true, timeout).await?;
        Ok(MemberResolution {
            segment_id: id,
            match_count: outcome.match_count,
            contact_ids: outcome.contact_ids.unwrap_or_default(),
            warnings: outcome.warnings,
        })
    }

    async fn run_dry(&self, id: SegmentId, timeout: Option<Duration>) -> CampaignResult<EvaluationResult> {
        let predicate = self.predicate_for(id)?;
        let outcome = self.timed_scan(&predicate, false, timeout).await?;
        let segment = self.get_segment(id).await?;
        Ok(result_of(segment, outcome, true))
    }

    async fn run_build(&self, id: SegmentId, timeout: Option<Duration>) -> CampaignResult<EvaluationResult> {
        let predicate = self.predicate_for(id)?;
        let lease = self.leases.try_acquire(id).ok_or_else(|| {
            metrics::counter!("segmentation.build_conflicts").increment(1);
            CampaignError::BuildInProgress(id)
        })?;

        let previous = self.store.read(id).await?;
        let built_at = next_built_at(previous.map(|m| m.built_at), Utc::now());
        let outcome = self.timed_scan(&predicate, false, timeout).await?;

        self.store
            .persist(id, Materialization::new(outcome.match_count, built_at))
            .await?;
        if !self.registry.contains(id) {
            // Deleted while the scan ran; the write must not outlive the segment.
            self.store.discard(id).await?;
            return Err(CampaignError::NotFound(id));
        }
        drop(lease);

        info!(
            segment_id = id,
            matches = outcome.match_count,
            built_at = %built_at,
            "Segment built"
        );
        let segment = self.get_segment(id).await?;
        Ok(result_of(segment, outcome, false))
    }

    fn predicate_for(&self, id: SegmentId) -> CampaignResult<Predicate> {
        let record = self.registry.get(id)?;
        compile(&record.definition)
    }

    async fn timed_scan(
        &self,
        predicate: &Predicate,
        collect_ids: bool,
        timeout: Option<Duration>,
    ) -> CampaignResult<ScanOutcome> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, self.evaluator.scan(predicate, collect_ids))
            .await
            .map_err(|_| CampaignError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            })??;
        metrics::histogram!("segmentation.scan_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(outcome)
    }

    fn compose(&self, record: SegmentRecord, materialization: Option<Materialization>) -> Segment {
        Segment {
            id: record.id,
            name: record.name,
            definition: record.definition,
            materialized_count: materialization.map(|m| m.match_count),
            last_built_at: materialization.map(|m| m.built_at),
            build_in_progress: self.leases.is_held(record.id),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn result_of(segment: Segment, outcome: ScanOutcome, dry_run: bool) -> EvaluationResult {
    EvaluationResult {
        segment,
        match_count: outcome.match_count,
        sample: outcome.sample,
        dry_run,
        warnings: outcome.warnings,
    }
}

/// Build timestamps are millisecond-precise and strictly increasing per segment.
fn next_built_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = truncate_to_millis(now);
    match previous {
        Some(previous) if now <= previous => previous + chrono::Duration::milliseconds(1),
        _ => now,
    }
}
