//! In-memory search index
//!
//! Reference implementation of [`SearchIndex`] used by tests and local
//! development. Supports the full query surface (filters, multi-field sort
//! with document-id tie break, search-after pagination) and both refresh
//! modes: by default `Eventual` writes publish immediately, while
//! [`MemorySearchIndex::with_manual_refresh`] holds them in a staging buffer
//! until [`refresh`](MemorySearchIndex::refresh) runs, which lets tests
//! exercise the propagation window.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::error;

use super::{
    DeltaScript, Filter, RefreshMode, SearchHit, SearchIndex, SearchPage, SearchQuery, SortKey,
};
use crate::rank;
use crate::types::{EngineError, Result, ScopeId};

/// Staged write awaiting a refresh cycle.
enum Pending {
    Put { segment: String, id: String, doc: JsonValue },
    Merge { segment: String, id: String, patch: JsonValue },
    Delta { segment: String, id: String, script: DeltaScript },
    Delete { segment: String, id: String },
}

/// In-memory [`SearchIndex`].
pub struct MemorySearchIndex {
    /// `"{family}#{scope}"` -> document id -> document.
    segments: DashMap<String, BTreeMap<String, JsonValue>>,
    pending: Mutex<Vec<Pending>>,
    manual_refresh: bool,
}

impl Default for MemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySearchIndex {
    /// Index where `Eventual` writes publish immediately.
    pub fn new() -> Self {
        Self {
            segments: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            manual_refresh: false,
        }
    }

    /// Index where `Eventual` writes stay invisible until [`refresh`] runs.
    pub fn with_manual_refresh() -> Self {
        Self {
            manual_refresh: true,
            ..Self::new()
        }
    }

    /// Publish all staged writes. Returns how many were applied.
    pub fn refresh(&self) -> usize {
        let staged: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("search staging lock poisoned");
            pending.drain(..).collect()
        };

        let count = staged.len();
        for write in staged {
            if let Err(e) = self.apply(write) {
                // Refresh-time failures cannot reach a ticket; log and move on
                error!(error = %e, "staged index write failed during refresh");
            }
        }
        count
    }

    fn segment_name(family: &str, scope: &ScopeId) -> String {
        format!("{family}#{}", scope.as_str())
    }

    fn submit(&self, write: Pending, refresh: RefreshMode) -> Result<()> {
        if self.manual_refresh && refresh == RefreshMode::Eventual {
            self.pending
                .lock()
                .expect("search staging lock poisoned")
                .push(write);
            Ok(())
        } else {
            self.apply(write)
        }
    }

    fn apply(&self, write: Pending) -> Result<()> {
        match write {
            Pending::Put { segment, id, doc } => {
                self.segments.entry(segment).or_default().insert(id, doc);
                Ok(())
            }
            Pending::Merge { segment, id, patch } => {
                let mut entry = self.segments.entry(segment).or_default();
                let doc = entry
                    .get_mut(&id)
                    .ok_or_else(|| EngineError::Index(format!("no document {id} to merge")))?;
                let (Some(doc), Some(patch)) = (doc.as_object_mut(), patch.as_object()) else {
                    return Err(EngineError::Index("merge requires object documents".into()));
                };
                for (field, value) in patch {
                    doc.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Pending::Delta { segment, id, script } => {
                let mut entry = self.segments.entry(segment).or_default();
                let doc = entry
                    .get_mut(&id)
                    .ok_or_else(|| EngineError::Index(format!("no document {id} for delta")))?;
                let Some(doc) = doc.as_object_mut() else {
                    return Err(EngineError::Index("delta requires object documents".into()));
                };

                for (field, delta) in &script.increments {
                    let current = doc.get(field).and_then(JsonValue::as_i64).unwrap_or(0);
                    doc.insert(field.clone(), JsonValue::from(current + delta));
                }

                if let Some(recompute) = &script.recompute {
                    let positive = doc
                        .get(&recompute.positive_field)
                        .and_then(JsonValue::as_i64)
                        .unwrap_or(0)
                        .max(0) as u64;
                    let negative = doc
                        .get(&recompute.negative_field)
                        .and_then(JsonValue::as_i64)
                        .unwrap_or(0)
                        .max(0) as u64;
                    let score = rank::score_from_tally(recompute.confidence, positive, negative);
                    doc.insert(recompute.score_field.clone(), JsonValue::from(score));
                }
                Ok(())
            }
            Pending::Delete { segment, id } => {
                if let Some(mut entry) = self.segments.get_mut(&segment) {
                    entry.remove(&id);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn put_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        doc: JsonValue,
        refresh: RefreshMode,
    ) -> Result<()> {
        self.submit(
            Pending::Put {
                segment: Self::segment_name(family, scope),
                id: id.to_string(),
                doc,
            },
            refresh,
        )
    }

    async fn merge_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        patch: JsonValue,
        refresh: RefreshMode,
    ) -> Result<()> {
        self.submit(
            Pending::Merge {
                segment: Self::segment_name(family, scope),
                id: id.to_string(),
                patch,
            },
            refresh,
        )
    }

    async fn apply_delta(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        script: DeltaScript,
        refresh: RefreshMode,
    ) -> Result<()> {
        self.submit(
            Pending::Delta {
                segment: Self::segment_name(family, scope),
                id: id.to_string(),
                script,
            },
            refresh,
        )
    }

    async fn delete_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        refresh: RefreshMode,
    ) -> Result<()> {
        self.submit(
            Pending::Delete {
                segment: Self::segment_name(family, scope),
                id: id.to_string(),
            },
            refresh,
        )
    }

    async fn search(&self, family: &str, query: &SearchQuery) -> Result<SearchPage> {
        let Some(segment) = self.segments.get(&Self::segment_name(family, &query.scope)) else {
            return Ok(SearchPage {
                hits: Vec::new(),
                next: None,
            });
        };

        let mut matches: Vec<(Vec<JsonValue>, String)> = segment
            .iter()
            .filter(|(_, doc)| query.filters.iter().all(|f| matches_filter(doc, f)))
            .map(|(id, doc)| (sort_values(doc, &query.sort), id.clone()))
            .collect();
        drop(segment);

        matches.sort_by(|a, b| compare_composite(a, b, &query.sort));

        let skip = match &query.search_after {
            Some(position) => {
                let position = parse_position(position, query.sort.len())?;
                matches
                    .iter()
                    .position(|entry| {
                        compare_composite(entry, &position, &query.sort) == Ordering::Greater
                    })
                    .unwrap_or(matches.len())
            }
            None => 0,
        };

        let remaining = &matches[skip..];
        let page: Vec<&(Vec<JsonValue>, String)> = remaining.iter().take(query.limit).collect();
        let more = remaining.len() > page.len();

        let next = if more {
            page.last().map(|(values, id)| {
                let mut position: Vec<JsonValue> = values.clone();
                position.push(JsonValue::from(id.as_str()));
                JsonValue::Array(position)
            })
        } else {
            None
        };

        Ok(SearchPage {
            hits: page
                .into_iter()
                .map(|(values, id)| SearchHit {
                    id: id.clone(),
                    sort_values: values.clone(),
                })
                .collect(),
            next,
        })
    }

    async fn purge_scope(&self, family: &str, scope: &ScopeId) -> Result<u64> {
        let removed = self
            .segments
            .remove(&Self::segment_name(family, scope))
            .map(|(_, docs)| docs.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }
}

/// Split a resume position into `(sort values, document id)`.
fn parse_position(position: &JsonValue, sort_len: usize) -> Result<(Vec<JsonValue>, String)> {
    let values = position
        .as_array()
        .filter(|values| values.len() == sort_len + 1)
        .ok_or_else(|| EngineError::Index("resume position does not match query shape".into()))?;

    let id = values[sort_len]
        .as_str()
        .ok_or_else(|| EngineError::Index("resume position missing document id".into()))?;

    Ok((values[..sort_len].to_vec(), id.to_string()))
}

fn matches_filter(doc: &JsonValue, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => term_matches(doc.get(field), value),
        Filter::AnyTerm { field, values } => values
            .iter()
            .any(|value| term_matches(doc.get(field), value)),
        Filter::AllTokens { field, tokens } => {
            let Some(JsonValue::Array(present)) = doc.get(field) else {
                return tokens.is_empty();
            };
            tokens
                .iter()
                .all(|token| present.iter().any(|v| v.as_str() == Some(token)))
        }
        Filter::Range { field, min, max } => {
            let Some(value) = doc.get(field).and_then(JsonValue::as_f64) else {
                return false;
            };
            min.map(|m| value >= m).unwrap_or(true) && max.map(|m| value <= m).unwrap_or(true)
        }
    }
}

/// Term semantics: equality, or containment when the field is an array.
fn term_matches(field: Option<&JsonValue>, value: &JsonValue) -> bool {
    match field {
        Some(JsonValue::Array(values)) => values.contains(value),
        Some(present) => present == value,
        None => false,
    }
}

fn sort_values(doc: &JsonValue, sort: &[SortKey]) -> Vec<JsonValue> {
    sort.iter()
        .map(|key| doc.get(&key.field).cloned().unwrap_or(JsonValue::Null))
        .collect()
}

/// Compare `(sort values, id)` composites in query order; id ascending is
/// the final tie breaker.
fn compare_composite(
    a: &(Vec<JsonValue>, String),
    b: &(Vec<JsonValue>, String),
    sort: &[SortKey],
) -> Ordering {
    for (i, key) in sort.iter().enumerate() {
        let ordering = compare_json(&a.0[i], &b.0[i]);
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.1.cmp(&b.1)
}

/// Total order over the JSON scalar types the sort path uses:
/// null < number < string.
fn compare_json(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Less,
        (_, JsonValue::Null) => Ordering::Greater,
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::Number(_), _) => Ordering::Less,
        (_, JsonValue::Number(_)) => Ordering::Greater,
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
