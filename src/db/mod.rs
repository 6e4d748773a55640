//! Primary record-store boundary
//!
//! The authoritative key-value store is an external collaborator; this
//! module specifies it at its interface: point reads and conditional
//! writes on composite `(partition, sort)` keys, atomic field increments,
//! bounded batch operations, prefix range queries with exclusive-start
//! pagination, and a bounded all-or-nothing multi-item write.
//!
//! Conditional expressions are the engine's sole concurrency-control
//! mechanism: creation requires the key absent, optimistic updates require
//! a matching version field. A lost condition raises
//! [`EngineError::Conflict`](crate::types::EngineError::Conflict), never a
//! silent overwrite.

pub mod memory;
pub mod schemas;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::types::Result;

pub use memory::MemoryRecordStore;

/// Items are flat JSON objects.
pub type Item = serde_json::Map<String, JsonValue>;

/// Reserved item field holding the expiry as epoch seconds. Items past
/// their expiry read as absent.
pub const EXPIRES_AT_FIELD: &str = "expires_at";

/// Upper bound on items per batch get/delete call.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Upper bound on puts per transactional write.
pub const MAX_TRANSACT_ITEMS: usize = 10;

/// Composite record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    /// Display form used in error messages.
    pub fn display(&self) -> String {
        format!("{}/{}", self.partition, self.sort)
    }
}

/// Condition attached to a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCondition {
    /// Unconditional write.
    None,
    /// The key must not exist (creation).
    KeyAbsent,
    /// The key must exist (update).
    KeyPresent,
    /// The key must exist and carry `field == value` (optimistic update).
    FieldEquals { field: String, value: JsonValue },
}

/// One put inside a transactional write.
#[derive(Debug, Clone)]
pub struct ConditionalPut {
    pub key: ItemKey,
    pub item: Item,
    pub condition: WriteCondition,
}

/// Range query over one partition.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub partition: String,
    /// Restrict to sort keys beginning with this prefix.
    pub sort_prefix: Option<String>,
    /// Descending sort-key order when set.
    pub reverse: bool,
    pub limit: usize,
    /// Exclusive start: resume strictly after this sort key.
    pub start_after: Option<String>,
}

impl RangeQuery {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort_prefix: None,
            reverse: false,
            limit: 100,
            start_after: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, sort_key: impl Into<String>) -> Self {
        self.start_after = Some(sort_key.into());
        self
    }
}

/// One page of a range query.
#[derive(Debug, Clone)]
pub struct RangePage {
    pub items: Vec<(ItemKey, Item)>,
    /// Exclusive-start key for the next page; `None` when exhausted.
    pub last_key: Option<String>,
}

/// Result of a bounded batch delete. Unprocessed keys are retried by the
/// caller against only that subset.
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    pub unprocessed: Vec<ItemKey>,
}

/// Authoritative key-value record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point read. Expired items read as absent.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>>;

    /// Conditional put of a whole item.
    async fn put(&self, key: &ItemKey, item: Item, condition: WriteCondition) -> Result<()>;

    /// Merge `fields` into an existing item under `condition`.
    async fn update_fields(
        &self,
        key: &ItemKey,
        fields: Item,
        condition: WriteCondition,
    ) -> Result<()>;

    /// Atomically add `delta` to a numeric field, creating the item when
    /// absent, refreshing expiry when given. Returns the new value.
    async fn increment(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        expires_at: Option<i64>,
    ) -> Result<i64>;

    /// Idempotent point delete: removing an absent key is a no-op.
    async fn delete(&self, key: &ItemKey) -> Result<()>;

    /// Order-preserving batch point read, at most [`MAX_BATCH_ITEMS`] keys.
    async fn batch_get(&self, keys: &[ItemKey]) -> Result<Vec<Option<Item>>>;

    /// Bounded batch delete; partial failure is reported, not raised.
    async fn batch_delete(&self, keys: &[ItemKey]) -> Result<BatchDeleteOutcome>;

    /// Prefix range query with exclusive-start pagination.
    async fn query_range(&self, query: &RangeQuery) -> Result<RangePage>;

    /// Bounded all-or-nothing conditional put. A failed condition on any
    /// item raises `Conflict` naming the offending key and leaves no
    /// partial state.
    async fn transact_put(&self, puts: Vec<ConditionalPut>) -> Result<()>;
}

/// Read the expiry field of an item, when present.
pub fn item_expires_at(item: &Item) -> Option<i64> {
    item.get(EXPIRES_AT_FIELD).and_then(JsonValue::as_i64)
}
