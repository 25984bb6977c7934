//! End-to-end segment lifecycle: definitions evaluated against an in-memory
//! directory through the engine, with a local materialization store.

use async_trait::async_trait;
use campaign_cache::{LocalMaterializationStore, MaterializationStore};
use campaign_core::config::SegmentationConfig;
use campaign_core::types::{Contact, ContactId, ContactStatus};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::{
    ContactSource, DefinitionBuilder, EvaluationMode, InMemoryDirectory, SegmentDefinition,
    SegmentationEngine,
};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn contact(id: ContactId, status: ContactStatus, email: &str, consent: bool) -> Contact {
    Contact {
        id,
        email: Some(email.to_string()),
        name: Some(format!("Contact {id}")),
        status,
        gdpr_consent_at: consent.then(Utc::now),
    }
}

fn config(batch_size: usize, max_concurrent_batches: usize) -> SegmentationConfig {
    SegmentationConfig {
        batch_size,
        sample_size: 5,
        max_concurrent_batches,
        ..SegmentationConfig::default()
    }
}

struct Harness {
    engine: Arc<SegmentationEngine>,
    store: Arc<LocalMaterializationStore>,
}

fn harness(directory: Arc<InMemoryDirectory>) -> Harness {
    harness_with(directory.clone(), directory, config(4, 3))
}

fn harness_with(
    contacts: Arc<dyn ContactSource>,
    directory: Arc<InMemoryDirectory>,
    config: SegmentationConfig,
) -> Harness {
    let store = Arc::new(LocalMaterializationStore::new());
    let engine = SegmentationEngine::new(contacts, directory, store.clone(), &config);
    Harness {
        engine: Arc::new(engine),
        store,
    }
}

fn definition(value: serde_json::Value) -> SegmentDefinition {
    SegmentDefinition::from_json(&value).unwrap()
}

#[tokio::test]
async fn status_clause_counts_only_active_contacts() {
    let directory = Arc::new(InMemoryDirectory::new());
    for id in 1..=15 {
        let status = if id <= 10 {
            ContactStatus::Active
        } else {
            ContactStatus::Unsubscribed
        };
        directory.upsert_contact(contact(id, status, &format!("c{id}@example.com"), false));
    }
    let h = harness(directory);

    let segment = h
        .engine
        .create_segment("Active", definition(json!({ "status": "active" })))
        .await
        .unwrap();
    let result = h.engine.dry_run(segment.id).await.unwrap();
    assert_eq!(result.match_count, 10);
    assert!(result.sample.iter().all(|c| c.status == ContactStatus::Active));
}

#[tokio::test]
async fn in_list_clause_matches_any_listed_membership() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.upsert_list(1, "One");
    directory.upsert_list(2, "Two");
    directory.upsert_contact(contact(1, ContactStatus::Active, "a@example.com", false));
    directory.upsert_contact(contact(2, ContactStatus::Active, "b@example.com", false));
    directory.add_to_list(1, 1);
    let h = harness(directory);

    let segment = h
        .engine
        .create_segment("Lists", definition(json!({ "inListIds": [1, 2] })))
        .await
        .unwrap();
    let result = h.engine.dry_run(segment.id).await.unwrap();
    assert_eq!(result.match_count, 1);
    let ids: Vec<_> = result.sample.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1]);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn not_in_list_clause_excludes_members() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.upsert_list(3, "Suppression");
    for id in 1..=3 {
        directory.upsert_contact(contact(id, ContactStatus::Active, "x@example.com", false));
    }
    directory.add_to_list(2, 3);
    let h = harness(directory);

    let segment = h
        .engine
        .create_segment("Not suppressed", definition(json!({ "notInListIds": [3] })))
        .await
        .unwrap();
    let result = h.engine.dry_run(segment.id).await.unwrap();
    assert_eq!(result.match_count, 2);
    assert!(result.sample.iter().all(|c| c.id != 2));
}

#[tokio::test]
async fn consent_and_email_clauses_both_apply() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.upsert_contact(contact(1, ContactStatus::Active, "one@example.com", true));
    directory.upsert_contact(contact(2, ContactStatus::Active, "two@other.org", true));
    directory.upsert_contact(contact(3, ContactStatus::Active, "three@EXAMPLE.com", true));
    directory.upsert_contact(contact(4, ContactStatus::Active, "four@example.com", false));
    let h = harness(directory);

    let segment = h
        .engine
        .create_segment(
            "Consented example.com",
            definition(json!({ "gdprConsent": true, "emailContains": "@example.com" })),
        )
        .await
        .unwrap();
    let result = h.engine.dry_run(segment.id).await.unwrap();
    let ids: Vec<_> = result.sample.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(result.match_count, 2);
}

#[tokio::test]
async fn repeated_builds_keep_count_and_advance_timestamp() {
    let h = harness(Arc::new(InMemoryDirectory::with_demo_data()));
    let segment = h
        .engine
        .create_segment("Newsletter", DefinitionBuilder::new().in_any_list([1]).build())
        .await
        .unwrap();

    let first = h.engine.build(segment.id).await.unwrap();
    let second = h.engine.build(segment.id).await.unwrap();
    assert_eq!(first.match_count, second.match_count);
    assert_eq!(second.segment.materialized_count, Some(second.match_count));
    assert!(second.segment.last_built_at > first.segment.last_built_at);
}

#[tokio::test]
async fn results_do_not_depend_on_batching() {
    let directory = Arc::new(InMemoryDirectory::with_demo_data());
    let def = DefinitionBuilder::new()
        .status(ContactStatus::Active)
        .in_any_list([1, 2])
        .in_no_list([3])
        .build();

    let mut outcomes = Vec::new();
    for (batch_size, concurrency) in [(1, 1), (7, 4), (64, 2), (500, 8)] {
        let h = harness_with(directory.clone(), directory.clone(), config(batch_size, concurrency));
        let segment = h.engine.create_segment("Mixed", def.clone()).await.unwrap();
        let result = h.engine.dry_run(segment.id).await.unwrap();
        outcomes.push((result.match_count, result.sample));
    }
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(outcomes[0].0 > 0);
}

#[tokio::test]
async fn dry_run_never_touches_the_store() {
    let h = harness(Arc::new(InMemoryDirectory::with_demo_data()));
    let segment = h
        .engine
        .create_segment("All", SegmentDefinition::empty())
        .await
        .unwrap();

    h.engine.dry_run(segment.id).await.unwrap();
    assert!(h.store.read(segment.id).await.unwrap().is_none());

    let built = h.engine.build(segment.id).await.unwrap();
    let stored = h.store.read(segment.id).await.unwrap().unwrap();
    assert_eq!(stored.match_count, 200);
    assert_eq!(Some(stored.built_at), built.segment.last_built_at);

    h.engine.dry_run(segment.id).await.unwrap();
    assert_eq!(h.store.read(segment.id).await.unwrap(), Some(stored));
}

#[tokio::test]
async fn unknown_lists_are_reported_not_rejected() {
    let h = harness(Arc::new(InMemoryDirectory::with_demo_data()));
    let segment = h
        .engine
        .create_segment("Ghost list", DefinitionBuilder::new().in_any_list([1, 99]).build())
        .await
        .unwrap();
    let result = h.engine.dry_run(segment.id).await.unwrap();
    assert!(result.match_count > 0);
    let rendered = serde_json::to_value(&result.warnings).unwrap();
    assert_eq!(rendered, json!([{ "kind": "unknown_list_ids", "list_ids": [99] }]));
}

/// Wraps a directory and parks the first page fetch until released.
struct GatedSource {
    inner: Arc<InMemoryDirectory>,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedSource {
    fn new(inner: Arc<InMemoryDirectory>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ContactSource for GatedSource {
    async fn fetch_page(&self, after: Option<ContactId>, limit: usize) -> CampaignResult<Vec<Contact>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_page(after, limit).await
    }
}

#[tokio::test]
async fn concurrent_build_is_rejected_but_dry_run_proceeds() {
    let directory = Arc::new(InMemoryDirectory::with_demo_data());
    let gated = Arc::new(GatedSource::new(directory.clone()));
    let h = harness_with(gated.clone(), directory, config(50, 2));
    let segment = h
        .engine
        .create_segment("All", SegmentDefinition::empty())
        .await
        .unwrap();

    let engine = h.engine.clone();
    let id = segment.id;
    let first = tokio::spawn(async move { engine.build(id).await });
    gated.entered.notified().await;

    let conflict = h.engine.build(segment.id).await.unwrap_err();
    assert!(matches!(conflict, CampaignError::BuildInProgress(_)));

    let preview = h.engine.dry_run(segment.id).await.unwrap();
    assert_eq!(preview.match_count, 200);
    assert!(preview.segment.build_in_progress);

    gated.release.notify_one();
    let built = first.await.unwrap().unwrap();
    assert_eq!(built.segment.materialized_count, Some(200));
    assert!(!built.segment.build_in_progress);
}

#[tokio::test]
async fn timed_out_build_commits_nothing() {
    let directory = Arc::new(InMemoryDirectory::with_demo_data());
    let gated = Arc::new(GatedSource::new(directory.clone()));
    let h = harness_with(gated.clone(), directory, config(50, 2));
    let segment = h
        .engine
        .create_segment("All", SegmentDefinition::empty())
        .await
        .unwrap();

    let err = h
        .engine
        .evaluate(segment.id, EvaluationMode::Build, Some(Duration::from_millis(25)))
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Timeout { .. }));
    assert!(h.store.read(segment.id).await.unwrap().is_none());

    // The lease went with the cancelled scan.
    let retried = h.engine.build(segment.id).await.unwrap();
    assert_eq!(retried.match_count, 200);
}

#[tokio::test]
async fn segment_deleted_mid_build_leaves_no_materialization() {
    let directory = Arc::new(InMemoryDirectory::with_demo_data());
    let gated = Arc::new(GatedSource::new(directory.clone()));
    let h = harness_with(gated.clone(), directory, config(50, 2));
    let segment = h
        .engine
        .create_segment("Short lived", SegmentDefinition::empty())
        .await
        .unwrap();

    let engine = h.engine.clone();
    let id = segment.id;
    let build = tokio::spawn(async move { engine.build(id).await });
    gated.entered.notified().await;

    h.engine.delete_segment(segment.id).await.unwrap();
    gated.release.notify_one();

    let err = build.await.unwrap().unwrap_err();
    assert!(matches!(err, CampaignError::NotFound(_)));
    assert!(h.store.read(segment.id).await.unwrap().is_none());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn members_resolve_against_live_data() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.upsert_list(1, "Newsletter");
    for id in 1..=6 {
        directory.upsert_contact(contact(id, ContactStatus::Active, "m@example.com", false));
        if id % 2 == 0 {
            directory.add_to_list(id, 1);
        }
    }
    let h = harness(directory.clone());
    let segment = h
        .engine
        .create_segment("Evens", DefinitionBuilder::new().in_any_list([1]).build())
        .await
        .unwrap();
    h.engine.build(segment.id).await.unwrap();

    directory.remove_from_list(4, 1);
    let members = h.engine.resolve_members(segment.id, None).await.unwrap();
    assert_eq!(members.contact_ids, vec![2, 6]);

    // The stored count is only refreshed by an explicit build.
    let stored = h.engine.get_segment(segment.id).await.unwrap();
    assert_eq!(stored.materialized_count, Some(3));
}
