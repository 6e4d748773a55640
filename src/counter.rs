//! Sharded counter
//!
//! Partitions a hot aggregate counter across N record-store rows so
//! concurrent increments never contend on one key. Writers pick a partition
//! either by consistent hash (reads stay single-row) or uniformly at random
//! (spreads hot keys; reads scatter-gather and sum). Both policies stay
//! readable for a counter's whole lifetime, because the policy can change
//! operationally.
//!
//! Each logical event is counted at most once: a process-local TTL negative
//! cache short-circuits repeats, and a durable `(scope, target, period)` row
//! created with a not-exists condition is the authoritative gate.

use dashmap::DashMap;
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::EngineSettings;
use crate::db::{schemas, Item, ItemKey, RecordStore, WriteCondition, EXPIRES_AT_FIELD, MAX_BATCH_ITEMS};
use crate::types::{EngineError, Result, ScopeId};

/// Record family for counter shard rows
pub const SHARD_FAMILY: &str = "counter";

/// Record family for durable dedupe rows
pub const SEEN_FAMILY: &str = "counter_seen";

/// Field holding a shard's count
pub const COUNT_FIELD: &str = "count";

/// Counting period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Monthly => "monthly",
        }
    }

    /// Period length in seconds. Months are banded to 31 days; period
    /// numbers only need to be stable, not calendar-exact.
    pub fn seconds(&self) -> i64 {
        match self {
            Period::Daily => 86_400,
            Period::Monthly => 31 * 86_400,
        }
    }

    /// Period number containing the given epoch second.
    pub fn number_at(&self, epoch_seconds: i64) -> i64 {
        epoch_seconds.div_euclid(self.seconds())
    }
}

/// Partition-selection policy for writes (and the matching read shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPolicy {
    /// Consistent hash of the scope: one row per counter, single-row reads.
    Deterministic,
    /// Uniform random partition: spreads hot keys, reads must scatter-gather.
    Random,
}

/// Process-local TTL cache of recently recorded events.
///
/// Purely an optimization in front of the durable dedupe row; entries are
/// bounded and evicted oldest-first at capacity.
struct SeenCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl SeenCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    fn contains(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(inserted) => inserted.elapsed() < self.ttl,
            None => false,
        }
    }

    fn insert(&self, key: String) {
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(key, Instant::now());
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Sharded counter over the record store.
pub struct ShardedCounter {
    store: Arc<dyn RecordStore>,
    settings: Arc<EngineSettings>,
    seen: SeenCache,
}

impl ShardedCounter {
    pub fn new(store: Arc<dyn RecordStore>, settings: Arc<EngineSettings>) -> Self {
        let seen = SeenCache::new(
            Duration::from_secs(settings.cache_ttl_seconds()),
            settings.cache_max_entries(),
        );
        Self {
            store,
            settings,
            seen,
        }
    }

    /// Count one logical event, identified by `target_id`, within a period.
    ///
    /// Returns `Ok(None)` when the event was already counted (no double
    /// counting), otherwise the chosen shard's new count.
    pub async fn record(
        &self,
        scope: &ScopeId,
        prefix: &str,
        period: Period,
        period_num: i64,
        target_id: &str,
        policy: ShardPolicy,
    ) -> Result<Option<u64>> {
        let dedupe_key = format!("{}#{prefix}#{period_num}#{target_id}", scope.as_str());
        if self.seen.contains(&dedupe_key) {
            return Ok(None);
        }

        let expires_at = self.shard_expiry(period, period_num);

        // Durable idempotency gate: losing the not-exists condition means
        // some writer (possibly another process) already counted this event.
        let mut seen_row = Item::new();
        seen_row.insert("target_id".into(), json!(target_id));
        seen_row.insert(EXPIRES_AT_FIELD.into(), json!(expires_at));

        match self
            .store
            .put(
                &seen_key(scope, prefix, period_num, target_id),
                seen_row,
                WriteCondition::KeyAbsent,
            )
            .await
        {
            Ok(()) => {}
            Err(EngineError::Conflict(_)) => {
                self.seen.insert(dedupe_key);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        self.seen.insert(dedupe_key);

        let shard_count = self.settings.shard_count();
        let partition = match policy {
            ShardPolicy::Random => rand::thread_rng().gen_range(0..shard_count),
            ShardPolicy::Deterministic => consistent_partition(scope, prefix, shard_count),
        };

        let new_count = self
            .store
            .increment(
                &shard_key(scope, prefix, period_num, partition),
                COUNT_FIELD,
                1,
                Some(expires_at),
            )
            .await?;

        debug!(
            scope = scope.as_str(),
            prefix, period_num, partition, new_count, "counter shard incremented"
        );

        Ok(Some(new_count.max(0) as u64))
    }

    /// Read the aggregate for one period.
    ///
    /// A deterministic counter reads its single shard unless the
    /// `read_all_shards` override is on; a random-policy counter always
    /// scatter-gathers every partition and sums.
    pub async fn fetch(
        &self,
        scope: &ScopeId,
        prefix: &str,
        period_num: i64,
        policy: ShardPolicy,
    ) -> Result<u64> {
        let shard_count = self.settings.shard_count();
        let read_all = self.settings.read_all_shards() || policy == ShardPolicy::Random;

        if !read_all {
            let partition = consistent_partition(scope, prefix, shard_count);
            let key = shard_key(scope, prefix, period_num, partition);
            let count = self
                .store
                .get(&key)
                .await?
                .and_then(|item| item.get(COUNT_FIELD).and_then(serde_json::Value::as_i64))
                .unwrap_or(0);
            return Ok(count.max(0) as u64);
        }

        let keys: Vec<ItemKey> = (0..shard_count)
            .map(|partition| shard_key(scope, prefix, period_num, partition))
            .collect();

        let mut total: i64 = 0;
        for chunk in keys.chunks(MAX_BATCH_ITEMS) {
            for item in self.store.batch_get(chunk).await?.into_iter().flatten() {
                total += item
                    .get(COUNT_FIELD)
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
            }
        }

        Ok(total.max(0) as u64)
    }

    /// Shard rows outlive their period by the configured multiplier so
    /// late-arriving corrections remain attributable.
    fn shard_expiry(&self, period: Period, period_num: i64) -> i64 {
        let period_end = (period_num + 1) * period.seconds();
        period_end + period.seconds() * self.settings.retention_multiplier() as i64
    }
}

fn shard_key(scope: &ScopeId, prefix: &str, period_num: i64, partition: usize) -> ItemKey {
    ItemKey::new(
        schemas::partition(scope, SHARD_FAMILY),
        format!("{prefix}#{period_num}#{partition:05}"),
    )
}

fn seen_key(scope: &ScopeId, prefix: &str, period_num: i64, target_id: &str) -> ItemKey {
    ItemKey::new(
        schemas::partition(scope, SEEN_FAMILY),
        format!("{prefix}#{period_num}#{target_id}"),
    )
}

/// Stable partition for a `(scope, prefix)` aggregate.
fn consistent_partition(scope: &ScopeId, prefix: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(format!("{}#{prefix}", scope.as_str()).as_bytes());
    let hash = u64::from_le_bytes(digest[0..8].try_into().unwrap());
    (hash % shard_count.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordStore;

    fn counter() -> (ShardedCounter, Arc<MemoryRecordStore>, Arc<EngineSettings>) {
        let store = Arc::new(MemoryRecordStore::new());
        let settings = Arc::new(EngineSettings::for_tests());
        let counter = ShardedCounter::new(store.clone(), settings.clone());
        (counter, store, settings)
    }

    fn scope() -> ScopeId {
        ScopeId::new("proj-1")
    }

    #[tokio::test]
    async fn test_record_and_fetch_deterministic() {
        let (counter, _, _) = counter();

        for i in 0..10 {
            let accepted = counter
                .record(
                    &scope(),
                    "views",
                    Period::Daily,
                    100,
                    &format!("visit-{i}"),
                    ShardPolicy::Deterministic,
                )
                .await
                .unwrap();
            assert!(accepted.is_some());
        }

        let total = counter
            .fetch(&scope(), "views", 100, ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn test_duplicate_target_not_double_counted() {
        let (counter, _, _) = counter();

        let first = counter
            .record(&scope(), "views", Period::Daily, 100, "visit-1", ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert!(first.is_some());

        let repeat = counter
            .record(&scope(), "views", Period::Daily, 100, "visit-1", ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert!(repeat.is_none());

        let total = counter
            .fetch(&scope(), "views", 100, ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_durable_dedupe_survives_cold_cache() {
        let (counter, store, settings) = counter();

        counter
            .record(&scope(), "views", Period::Daily, 100, "visit-1", ShardPolicy::Deterministic)
            .await
            .unwrap();

        // A different process (fresh negative cache) sees the durable row
        let other = ShardedCounter::new(store, settings);
        let repeat = other
            .record(&scope(), "views", Period::Daily, 100, "visit-1", ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert!(repeat.is_none());
    }

    #[tokio::test]
    async fn test_shard_conservation_under_mixed_policies() {
        let (counter, _, settings) = counter();
        settings.set_shard_count(4);

        let mut accepted = 0u64;
        for i in 0..40 {
            // Policy flips mid-stream, as in an operational migration
            let policy = if i < 20 {
                ShardPolicy::Deterministic
            } else {
                ShardPolicy::Random
            };
            if counter
                .record(&scope(), "events", Period::Daily, 7, &format!("e-{i}"), policy)
                .await
                .unwrap()
                .is_some()
            {
                accepted += 1;
            }
        }
        // Some events again, now duplicates
        for i in 0..10 {
            let got = counter
                .record(
                    &scope(),
                    "events",
                    Period::Daily,
                    7,
                    &format!("e-{i}"),
                    ShardPolicy::Random,
                )
                .await
                .unwrap();
            assert!(got.is_none());
        }

        // Force full scatter-gather: the sum over all partitions equals
        // exactly the accepted count
        settings.set_read_all_shards(true);
        let total = counter
            .fetch(&scope(), "events", 7, ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert_eq!(total, accepted);
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn test_random_policy_reads_scatter_gather() {
        let (counter, _, settings) = counter();
        settings.set_shard_count(8);

        for i in 0..30 {
            counter
                .record(&scope(), "hits", Period::Daily, 3, &format!("h-{i}"), ShardPolicy::Random)
                .await
                .unwrap();
        }

        let total = counter
            .fetch(&scope(), "hits", 3, ShardPolicy::Random)
            .await
            .unwrap();
        assert_eq!(total, 30);
    }

    #[tokio::test]
    async fn test_periods_are_independent() {
        let (counter, _, _) = counter();

        counter
            .record(&scope(), "views", Period::Daily, 100, "t", ShardPolicy::Deterministic)
            .await
            .unwrap();
        // Same target in the next period counts again
        let next = counter
            .record(&scope(), "views", Period::Daily, 101, "t", ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert!(next.is_some());

        let day100 = counter
            .fetch(&scope(), "views", 100, ShardPolicy::Deterministic)
            .await
            .unwrap();
        let day101 = counter
            .fetch(&scope(), "views", 101, ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert_eq!((day100, day101), (1, 1));
    }

    #[test]
    fn test_period_numbering() {
        assert_eq!(Period::Daily.number_at(0), 0);
        assert_eq!(Period::Daily.number_at(86_400), 1);
        assert_eq!(Period::Daily.number_at(86_399), 0);
        assert!(Period::Monthly.number_at(86_400 * 40) >= 1);
    }

    #[test]
    fn test_seen_cache_bounds() {
        let cache = SeenCache::new(Duration::from_secs(60), 3);
        for i in 0..5 {
            cache.insert(format!("k{i}"));
        }
        assert!(cache.entries.len() <= 4);
        assert!(cache.contains("k4"));
    }

    #[test]
    fn test_consistent_partition_is_stable() {
        let a = consistent_partition(&scope(), "views", 16);
        let b = consistent_partition(&scope(), "views", 16);
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[test]
    fn test_fetch_of_unwritten_counter_is_zero() {
        let (counter, _, _) = counter();
        let total =
            tokio_test::block_on(counter.fetch(&scope(), "views", 1, ShardPolicy::Deterministic))
                .unwrap();
        assert_eq!(total, 0);
    }
}
