//! In-memory record store
//!
//! Reference implementation of [`RecordStore`] used by tests and local
//! development. Honors every contract of the real store: conditional-write
//! conflicts, expiry semantics, order-preserving batch reads, exclusive-start
//! range pagination, and all-or-nothing transactional puts.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{
    item_expires_at, BatchDeleteOutcome, ConditionalPut, Item, ItemKey, RangePage, RangeQuery,
    RecordStore, WriteCondition, EXPIRES_AT_FIELD, MAX_BATCH_ITEMS, MAX_TRANSACT_ITEMS,
};
use crate::types::{EngineError, Result};

/// Partition map: partition -> ordered sort-key map.
type Partitions = HashMap<String, BTreeMap<String, Item>>;

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryRecordStore {
    partitions: RwLock<Partitions>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired items. The real store expires lazily; this exists for
    /// test hygiene and long-lived local processes.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut partitions = self.partitions.write().expect("record store lock poisoned");
        let mut removed = 0;

        for rows in partitions.values_mut() {
            let before = rows.len();
            rows.retain(|_, item| item_expires_at(item).map(|at| at > now).unwrap_or(true));
            removed += before - rows.len();
        }
        partitions.retain(|_, rows| !rows.is_empty());

        removed
    }

    /// Count of live items, across all partitions.
    pub fn len(&self) -> usize {
        let now = Utc::now().timestamp();
        let partitions = self.partitions.read().expect("record store lock poisoned");
        partitions
            .values()
            .flat_map(|rows| rows.values())
            .filter(|item| is_live(item, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_live(item: &Item, now: i64) -> bool {
    item_expires_at(item).map(|at| at > now).unwrap_or(true)
}

/// Evaluate a write condition against the current (live) item.
fn check_condition(
    key: &ItemKey,
    current: Option<&Item>,
    condition: &WriteCondition,
) -> Result<()> {
    match condition {
        WriteCondition::None => Ok(()),
        WriteCondition::KeyAbsent => {
            if current.is_some() {
                Err(EngineError::Conflict(format!(
                    "key already exists: {}",
                    key.display()
                )))
            } else {
                Ok(())
            }
        }
        WriteCondition::KeyPresent => {
            if current.is_none() {
                Err(EngineError::Conflict(format!(
                    "key does not exist: {}",
                    key.display()
                )))
            } else {
                Ok(())
            }
        }
        WriteCondition::FieldEquals { field, value } => match current {
            None => Err(EngineError::Conflict(format!(
                "key does not exist: {}",
                key.display()
            ))),
            Some(item) if item.get(field) == Some(value) => Ok(()),
            Some(_) => Err(EngineError::Conflict(format!(
                "stale {} on {}",
                field,
                key.display()
            ))),
        },
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        let now = Utc::now().timestamp();
        let partitions = self.partitions.read().expect("record store lock poisoned");

        Ok(partitions
            .get(&key.partition)
            .and_then(|rows| rows.get(&key.sort))
            .filter(|item| is_live(item, now))
            .cloned())
    }

    async fn put(&self, key: &ItemKey, item: Item, condition: WriteCondition) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut partitions = self.partitions.write().expect("record store lock poisoned");

        let rows = partitions.entry(key.partition.clone()).or_default();
        let current = rows.get(&key.sort).filter(|item| is_live(item, now));
        check_condition(key, current, &condition)?;

        rows.insert(key.sort.clone(), item);
        Ok(())
    }

    async fn update_fields(
        &self,
        key: &ItemKey,
        fields: Item,
        condition: WriteCondition,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut partitions = self.partitions.write().expect("record store lock poisoned");

        let rows = partitions.entry(key.partition.clone()).or_default();
        let current = rows.get(&key.sort).filter(|item| is_live(item, now));
        check_condition(key, current, &condition)?;

        let target = rows.entry(key.sort.clone()).or_default();
        for (field, value) in fields {
            target.insert(field, value);
        }
        Ok(())
    }

    async fn increment(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        expires_at: Option<i64>,
    ) -> Result<i64> {
        let now = Utc::now().timestamp();
        let mut partitions = self.partitions.write().expect("record store lock poisoned");

        let rows = partitions.entry(key.partition.clone()).or_default();
        let entry = rows.entry(key.sort.clone()).or_default();

        // Expired counters restart from zero
        if !is_live(entry, now) {
            entry.clear();
        }

        let current = entry.get(field).and_then(JsonValue::as_i64).unwrap_or(0);
        let next = current + delta;
        entry.insert(field.to_string(), JsonValue::from(next));

        if let Some(at) = expires_at {
            entry.insert(EXPIRES_AT_FIELD.to_string(), JsonValue::from(at));
        }

        Ok(next)
    }

    async fn delete(&self, key: &ItemKey) -> Result<()> {
        let mut partitions = self.partitions.write().expect("record store lock poisoned");
        if let Some(rows) = partitions.get_mut(&key.partition) {
            rows.remove(&key.sort);
        }
        Ok(())
    }

    async fn batch_get(&self, keys: &[ItemKey]) -> Result<Vec<Option<Item>>> {
        if keys.len() > MAX_BATCH_ITEMS {
            return Err(EngineError::Storage(format!(
                "batch get of {} exceeds limit {MAX_BATCH_ITEMS}",
                keys.len()
            )));
        }

        let now = Utc::now().timestamp();
        let partitions = self.partitions.read().expect("record store lock poisoned");

        Ok(keys
            .iter()
            .map(|key| {
                partitions
                    .get(&key.partition)
                    .and_then(|rows| rows.get(&key.sort))
                    .filter(|item| is_live(item, now))
                    .cloned()
            })
            .collect())
    }

    async fn batch_delete(&self, keys: &[ItemKey]) -> Result<BatchDeleteOutcome> {
        if keys.len() > MAX_BATCH_ITEMS {
            return Err(EngineError::Storage(format!(
                "batch delete of {} exceeds limit {MAX_BATCH_ITEMS}",
                keys.len()
            )));
        }

        let mut partitions = self.partitions.write().expect("record store lock poisoned");
        for key in keys {
            if let Some(rows) = partitions.get_mut(&key.partition) {
                rows.remove(&key.sort);
            }
        }

        Ok(BatchDeleteOutcome::default())
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<RangePage> {
        let now = Utc::now().timestamp();
        let partitions = self.partitions.read().expect("record store lock poisoned");

        let Some(rows) = partitions.get(&query.partition) else {
            return Ok(RangePage {
                items: Vec::new(),
                last_key: None,
            });
        };

        let matches = |sort: &String, item: &Item| {
            if !is_live(item, now) {
                return false;
            }
            match &query.sort_prefix {
                Some(prefix) => sort.starts_with(prefix.as_str()),
                None => true,
            }
        };

        let after = query.start_after.as_deref();
        let mut selected: Vec<(ItemKey, Item)> = Vec::with_capacity(query.limit);
        let mut more = false;

        let mut visit = |sort: &String, item: &Item| {
            if selected.len() == query.limit {
                more = true;
                return false;
            }
            selected.push((
                ItemKey::new(query.partition.clone(), sort.clone()),
                item.clone(),
            ));
            true
        };

        if query.reverse {
            for (sort, item) in rows.iter().rev() {
                if let Some(after) = after {
                    if sort.as_str() >= after {
                        continue;
                    }
                }
                if matches(sort, item) && !visit(sort, item) {
                    break;
                }
            }
        } else {
            for (sort, item) in rows.iter() {
                if let Some(after) = after {
                    if sort.as_str() <= after {
                        continue;
                    }
                }
                if matches(sort, item) && !visit(sort, item) {
                    break;
                }
            }
        }

        let last_key = if more {
            selected.last().map(|(key, _)| key.sort.clone())
        } else {
            None
        };

        Ok(RangePage {
            items: selected,
            last_key,
        })
    }

    async fn transact_put(&self, puts: Vec<ConditionalPut>) -> Result<()> {
        if puts.len() > MAX_TRANSACT_ITEMS {
            return Err(EngineError::Storage(format!(
                "transactional write of {} exceeds limit {MAX_TRANSACT_ITEMS}",
                puts.len()
            )));
        }

        let now = Utc::now().timestamp();
        let mut partitions = self.partitions.write().expect("record store lock poisoned");

        // Validate every condition before mutating anything
        for put in &puts {
            let current = partitions
                .get(&put.key.partition)
                .and_then(|rows| rows.get(&put.key.sort))
                .filter(|item| is_live(item, now));
            check_condition(&put.key, current, &put.condition)?;
        }

        for put in puts {
            partitions
                .entry(put.key.partition.clone())
                .or_default()
                .insert(put.key.sort, put.item);
        }

        Ok(())
    }
}
