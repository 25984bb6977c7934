//! Membership evaluator — streams the contact population through a compiled
//! predicate in bounded batches.
//!
//! Pages are fetched by keyset cursor; up to `max_concurrent_batches` of them
//! are evaluated concurrently (membership lookup + predicate) and merged into
//! a single accumulator owned by the scan. Any collaborator failure aborts the
//! scan and the partial accumulator is dropped with it.

use crate::membership::MembershipIndex;
use crate::predicates::{DefinitionWarning, Predicate};
use crate::source::{ContactSource, MembershipSource};
use campaign_core::config::SegmentationConfig;
use campaign_core::types::{Contact, ContactId, ContactSummary};
use campaign_core::{CampaignError, CampaignResult};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorSettings {
    pub batch_size: usize,
    pub sample_size: usize,
    pub max_concurrent_batches: usize,
}

impl From<&SegmentationConfig> for EvaluatorSettings {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            sample_size: config.sample_size,
            max_concurrent_batches: config.max_concurrent_batches.max(1),
        }
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self::from(&SegmentationConfig::default())
    }
}

/// Complete outcome of one scan. Never produced for a failed scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub match_count: u64,
    pub scanned: u64,
    /// Up to `sample_size` smallest matching ids, ascending.
    pub sample: Vec<ContactSummary>,
    /// All matching ids ascending, when requested.
    pub contact_ids: Option<Vec<ContactId>>,
    pub warnings: Vec<DefinitionWarning>,
}

pub struct MembershipEvaluator {
    contacts: Arc<dyn ContactSource>,
    memberships: Arc<dyn MembershipSource>,
    settings: EvaluatorSettings,
}

impl MembershipEvaluator {
    pub fn new(
        contacts: Arc<dyn ContactSource>,
        memberships: Arc<dyn MembershipSource>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            contacts,
            memberships,
            settings,
        }
    }

    pub fn settings(&self) -> EvaluatorSettings {
        self.settings
    }

    /// Scan the whole population. With `collect_ids` the full ascending id
    /// set of matches is returned as well.
    pub async fn scan(&self, predicate: &Predicate, collect_ids: bool) -> CampaignResult<ScanOutcome> {
        let started = Instant::now();
        let mut warnings = predicate.warnings().to_vec();
        if let Some(unknown) = self.unknown_lists(predicate).await? {
            warnings.push(unknown);
        }

        let batch_size = self.settings.batch_size;
        let contacts = self.contacts.clone();
        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let contacts = contacts.clone();
            async move { next_page(contacts.as_ref(), cursor, batch_size).await }
        })
        .boxed();

        let accumulator = pages
            .map_ok(|page| self.evaluate_batch(predicate, page, collect_ids))
            .try_buffer_unordered(self.settings.max_concurrent_batches)
            .try_fold(
                Accumulator::new(self.settings.sample_size, collect_ids),
                |mut acc, batch| async move {
                    acc.merge(batch);
                    Ok(acc)
                },
            )
            .await?;

        let outcome = accumulator.finish(warnings);
        debug!(
            matches = outcome.match_count,
            scanned = outcome.scanned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Segment scan complete"
        );
        Ok(outcome)
    }

    async fn unknown_lists(&self, predicate: &Predicate) -> CampaignResult<Option<DefinitionWarning>> {
        if !predicate.references_lists() {
            return Ok(None);
        }
        let referenced = predicate.referenced_list_ids();
        let existing = self.memberships.existing_lists(&referenced).await?;
        let missing: Vec<_> = referenced
            .into_iter()
            .filter(|id| !existing.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(None);
        }
        warn!(list_ids = ?missing, "Segment references lists that no longer exist");
        Ok(Some(DefinitionWarning::UnknownListIds { list_ids: missing }))
    }

    async fn evaluate_batch(
        &self,
        predicate: &Predicate,
        page: Vec<Contact>,
        collect_ids: bool,
    ) -> CampaignResult<BatchOutcome> {
        let index = if predicate.references_lists() {
            let ids: Vec<ContactId> = page.iter().map(|c| c.id).collect();
            MembershipIndex::from_edges(self.memberships.memberships_for(&ids).await?)
        } else {
            MembershipIndex::empty()
        };

        let mut batch = BatchOutcome {
            scanned: page.len() as u64,
            matched: 0,
            sample: SampleBuffer::new(self.settings.sample_size),
            contact_ids: Vec::new(),
        };
        for contact in &page {
            if predicate.matches(contact, index.lists_of(contact.id)) {
                batch.matched += 1;
                batch.sample.offer(contact);
                if collect_ids {
                    batch.contact_ids.push(contact.id);
                }
            }
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Start,
    After(ContactId),
    Done,
}

async fn next_page(
    contacts: &dyn ContactSource,
    cursor: Cursor,
    batch_size: usize,
) -> CampaignResult<Option<(Vec<Contact>, Cursor)>> {
    let after = match cursor {
        Cursor::Done => return Ok(None),
        Cursor::Start => None,
        Cursor::After(id) => Some(id),
    };

    let page = contacts.fetch_page(after, batch_size).await?;
    let Some(last) = page.iter().map(|c| c.id).max() else {
        return Ok(None);
    };
    if after.is_some_and(|previous| last <= previous) {
        return Err(CampaignError::SourceUnavailable(format!(
            "contact source did not advance past id {last}"
        )));
    }

    let next = if page.len() < batch_size {
        Cursor::Done
    } else {
        Cursor::After(last)
    };
    Ok(Some((page, next)))
}

struct BatchOutcome {
    scanned: u64,
    matched: u64,
    sample: SampleBuffer,
    contact_ids: Vec<ContactId>,
}

/// Single-writer running state of one scan.
struct Accumulator {
    scanned: u64,
    matched: u64,
    sample: SampleBuffer,
    contact_ids: Option<Vec<ContactId>>,
}

impl Accumulator {
    fn new(sample_size: usize, collect_ids: bool) -> Self {
        Self {
            scanned: 0,
            matched: 0,
            sample: SampleBuffer::new(sample_size),
            contact_ids: collect_ids.then(Vec::new),
        }
    }

    fn merge(&mut self, batch: BatchOutcome) {
        self.scanned += batch.scanned;
        self.matched += batch.matched;
        self.sample.absorb(batch.sample);
        if let Some(ids) = self.contact_ids.as_mut() {
            ids.extend(batch.contact_ids);
        }
    }

    fn finish(self, warnings: Vec<DefinitionWarning>) -> ScanOutcome {
        let contact_ids = self.contact_ids.map(|mut ids| {
            ids.sort_unstable();
            ids
        });
        ScanOutcome {
            match_count: self.matched,
            scanned: self.scanned,
            sample: self.sample.into_sorted(),
            contact_ids,
            warnings,
        }
    }
}

struct SampleEntry(ContactSummary);

impl PartialEq for SampleEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SampleEntry {}

impl PartialOrd for SampleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SampleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

/// Keeps the `capacity` smallest contact ids seen, independent of arrival order.
struct SampleBuffer {
    capacity: usize,
    heap: BinaryHeap<SampleEntry>,
}

impl SampleBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
        }
    }

    fn offer(&mut self, contact: &Contact) {
        if self.admits(contact.id) {
            self.push(contact.summary());
        }
    }

    fn absorb(&mut self, other: SampleBuffer) {
        for entry in other.heap {
            if self.admits(entry.0.id) {
                self.push(entry.0);
            }
        }
    }

    fn admits(&self, id: ContactId) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.heap.len() < self.capacity || self.heap.peek().is_some_and(|max| id < max.0.id)
    }

    fn push(&mut self, summary: ContactSummary) {
        self.heap.push(SampleEntry(summary));
        if self.heap.len() > self.capacity {
            self.heap.pop();
        }
    }

    fn into_sorted(self) -> Vec<ContactSummary> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.0)
            .collect()
    }
}
