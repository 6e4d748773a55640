//! Usage tracking for billing and analytics
//!
//! Periodized event counting (views, searches, recorded actions) on top of
//! the sharded counter. Every event carries a target id so retried
//! deliveries of the same logical event count once.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::counter::{Period, ShardPolicy, ShardedCounter};
use crate::types::{Result, ScopeId};

/// Usage event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// An idea page was viewed
    IdeaViewed,
    /// A search query ran
    SearchExecuted,
    /// A guarded action (vote/fund/express) was accepted
    ActionRecorded,
    /// An API call was served
    ApiCall,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::IdeaViewed => "idea_viewed",
            UsageKind::SearchExecuted => "search_executed",
            UsageKind::ActionRecorded => "action_recorded",
            UsageKind::ApiCall => "api_call",
        }
    }

    /// Counter prefix for this kind.
    fn prefix(&self) -> String {
        format!("usage#{}", self.as_str())
    }
}

/// Usage counters for one process, sharing the engine's counter.
pub struct UsageTracker {
    counter: Arc<ShardedCounter>,
}

impl UsageTracker {
    pub fn new(counter: Arc<ShardedCounter>) -> Self {
        Self { counter }
    }

    /// Count one usage event in the current period.
    ///
    /// Returns the shard's new count when the event was fresh, `None` when
    /// it was already counted (retried delivery).
    pub async fn record(
        &self,
        scope: &ScopeId,
        kind: UsageKind,
        period: Period,
        event_id: &str,
        policy: ShardPolicy,
    ) -> Result<Option<u64>> {
        let period_num = period.number_at(Utc::now().timestamp());
        self.counter
            .record(scope, &kind.prefix(), period, period_num, event_id, policy)
            .await
    }

    /// Aggregate usage for a specific period number.
    pub async fn fetch(
        &self,
        scope: &ScopeId,
        kind: UsageKind,
        period_num: i64,
        policy: ShardPolicy,
    ) -> Result<u64> {
        self.counter
            .fetch(scope, &kind.prefix(), period_num, policy)
            .await
    }

    /// Aggregate usage for the current period.
    pub async fn fetch_current(
        &self,
        scope: &ScopeId,
        kind: UsageKind,
        period: Period,
        policy: ShardPolicy,
    ) -> Result<u64> {
        let period_num = period.number_at(Utc::now().timestamp());
        self.fetch(scope, kind, period_num, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::db::MemoryRecordStore;

    fn tracker() -> UsageTracker {
        let store = Arc::new(MemoryRecordStore::new());
        let settings = Arc::new(EngineSettings::for_tests());
        UsageTracker::new(Arc::new(ShardedCounter::new(store, settings)))
    }

    #[tokio::test]
    async fn test_usage_counts_once_per_event() {
        let tracker = tracker();
        let scope = ScopeId::new("proj-1");

        for _ in 0..3 {
            tracker
                .record(
                    &scope,
                    UsageKind::IdeaViewed,
                    Period::Daily,
                    "req-1",
                    ShardPolicy::Deterministic,
                )
                .await
                .unwrap();
        }
        tracker
            .record(
                &scope,
                UsageKind::IdeaViewed,
                Period::Daily,
                "req-2",
                ShardPolicy::Deterministic,
            )
            .await
            .unwrap();

        let total = tracker
            .fetch_current(
                &scope,
                UsageKind::IdeaViewed,
                Period::Daily,
                ShardPolicy::Deterministic,
            )
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_kinds_do_not_mix() {
        let tracker = tracker();
        let scope = ScopeId::new("proj-1");

        tracker
            .record(
                &scope,
                UsageKind::SearchExecuted,
                Period::Daily,
                "q-1",
                ShardPolicy::Deterministic,
            )
            .await
            .unwrap();

        let api_calls = tracker
            .fetch_current(&scope, UsageKind::ApiCall, Period::Daily, ShardPolicy::Deterministic)
            .await
            .unwrap();
        assert_eq!(api_calls, 0);
    }
}
