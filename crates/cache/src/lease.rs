//! Exclusive per-segment build leases.
//!
//! A lease is an RAII guard: it is released when dropped, so a build that
//! fails, times out or is cancelled never leaves its segment locked.

use campaign_core::types::SegmentId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct LeaseTable {
    active: Arc<DashMap<SegmentId, DateTime<Utc>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the build lease for a segment, or `None` if one is already held.
    pub fn try_acquire(&self, segment_id: SegmentId) -> Option<BuildLease> {
        match self.active.entry(segment_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Some(BuildLease {
                    segment_id,
                    active: self.active.clone(),
                })
            }
        }
    }

    pub fn is_held(&self, segment_id: SegmentId) -> bool {
        self.active.contains_key(&segment_id)
    }

    pub fn held_since(&self, segment_id: SegmentId) -> Option<DateTime<Utc>> {
        self.active.get(&segment_id).map(|entry| *entry.value())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[must_use = "the lease is released as soon as it is dropped"]
pub struct BuildLease {
    segment_id: SegmentId,
    active: Arc<DashMap<SegmentId, DateTime<Utc>>>,
}

impl BuildLease {
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }
}

impl Drop for BuildLease {
    fn drop(&mut self) {
        self.active.remove(&self.segment_id);
    }
}
