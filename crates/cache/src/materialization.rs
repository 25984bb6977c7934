//! Materialized build results and the store contract shared by all backends.

use async_trait::async_trait;
use campaign_core::types::SegmentId;
use campaign_core::CampaignResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the most recent accepted build of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialization {
    pub match_count: u64,
    /// Millisecond precision; the instant the build's scan started.
    pub built_at: DateTime<Utc>,
}

impl Materialization {
    pub fn new(match_count: u64, built_at: DateTime<Utc>) -> Self {
        Self {
            match_count,
            built_at: truncate_to_millis(built_at),
        }
    }

    pub fn built_at_ms(&self) -> i64 {
        self.built_at.timestamp_millis()
    }
}

pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Persistence for materialized segment counts.
///
/// Never invalidated by contact or list changes; callers see staleness only
/// through an old `built_at`.
#[async_trait]
pub trait MaterializationStore: Send + Sync {
    /// Store a build result. Rejects with `StaleBuild` unless `built_at` is
    /// strictly newer than the stored value.
    async fn persist(&self, segment_id: SegmentId, materialization: Materialization) -> CampaignResult<()>;

    async fn read(&self, segment_id: SegmentId) -> CampaignResult<Option<Materialization>>;

    /// Drop whatever is stored for the segment. Idempotent.
    async fn discard(&self, segment_id: SegmentId) -> CampaignResult<()>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_built_at_truncated_to_millis() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let m = Materialization::new(3, at);
        assert_eq!(m.built_at_ms(), 1_700_000_000_123);
        assert_eq!(m.built_at.timestamp_subsec_nanos(), 123_000_000);
    }
}
