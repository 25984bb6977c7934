//! Redis-backed materialization store.
//!
//! Each segment is a hash `{prefix}:{segment_id}` with `match_count` and
//! `built_at_ms`. Writes go through a Lua script so the `built_at` comparison
//! and the update are atomic across nodes.

use crate::materialization::{Materialization, MaterializationStore};
use async_trait::async_trait;
use campaign_core::config::MaterializationConfig;
use campaign_core::types::SegmentId;
use campaign_core::{CampaignError, CampaignResult};
use chrono::DateTime;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

const PERSIST_SCRIPT: &str = r#"
local stored = redis.call('HGET', KEYS[1], 'built_at_ms')
if stored and tonumber(stored) >= tonumber(ARGV[2]) then
  return {0, tonumber(stored)}
end
redis.call('HSET', KEYS[1], 'match_count', ARGV[1], 'built_at_ms', ARGV[2])
return {1, tonumber(ARGV[2])}
"#;

pub struct RedisMaterializationStore {
    connection: MultiplexedConnection,
    key_prefix: String,
    persist_script: redis::Script,
}

impl RedisMaterializationStore {
    pub async fn new(config: &MaterializationConfig) -> anyhow::Result<Self> {
        info!(url = %config.redis_url, "Connecting to Redis");

        let client = redis::Client::open(config.redis_url.as_str())?;
        let mut connection = client.get_multiplexed_async_connection().await?;

        // Verify connectivity
        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            persist_script: redis::Script::new(PERSIST_SCRIPT),
        })
    }

    fn key(&self, segment_id: SegmentId) -> String {
        format!("{}:{segment_id}", self.key_prefix)
    }
}

fn cache_error(err: redis::RedisError) -> CampaignError {
    metrics::counter!("materialization.redis_errors").increment(1);
    CampaignError::Cache(err.to_string())
}

#[async_trait]
impl MaterializationStore for RedisMaterializationStore {
    async fn persist(&self, segment_id: SegmentId, materialization: Materialization) -> CampaignResult<()> {
        let mut conn = self.connection.clone();
        let (accepted, stored_ms): (i64, i64) = self
            .persist_script
            .key(self.key(segment_id))
            .arg(materialization.match_count)
            .arg(materialization.built_at_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error)?;

        if accepted == 0 {
            metrics::counter!("materialization.stale_writes").increment(1);
            return Err(CampaignError::StaleBuild {
                segment_id,
                attempted_ms: materialization.built_at_ms(),
                stored_ms,
            });
        }
        debug!(
            segment_id,
            match_count = materialization.match_count,
            "Materialization persisted to Redis"
        );
        Ok(())
    }

    async fn read(&self, segment_id: SegmentId) -> CampaignResult<Option<Materialization>> {
        let mut conn = self.connection.clone();
        let (count, built_at_ms): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
            .arg(self.key(segment_id))
            .arg("match_count")
            .arg("built_at_ms")
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;

        match (count, built_at_ms) {
            (Some(match_count), Some(ms)) => {
                let built_at = DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                    CampaignError::Cache(format!("invalid built_at_ms {ms} for segment {segment_id}"))
                })?;
                Ok(Some(Materialization::new(match_count, built_at)))
            }
            _ => Ok(None),
        }
    }

    async fn discard(&self, segment_id: SegmentId) -> CampaignResult<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(segment_id))
            .await
            .map_err(cache_error)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    //! Requires a Redis server on localhost:6379; run with `--ignored`.
    use super::*;
    use chrono::{Duration, Utc};

    async fn store() -> RedisMaterializationStore {
        let config = MaterializationConfig {
            key_prefix: format!("test:materialization:{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
            ..MaterializationConfig::default()
        };
        RedisMaterializationStore::new(&config).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_compare_and_set() {
        let store = store().await;
        let now = Utc::now();

        store.persist(1, Materialization::new(5, now)).await.unwrap();
        let stale = store
            .persist(1, Materialization::new(9, now - Duration::seconds(1)))
            .await
            .unwrap_err();
        assert!(matches!(stale, CampaignError::StaleBuild { .. }));

        let read = store.read(1).await.unwrap().unwrap();
        assert_eq!(read.match_count, 5);

        store.discard(1).await.unwrap();
        assert!(store.read(1).await.unwrap().is_none());
    }
}
