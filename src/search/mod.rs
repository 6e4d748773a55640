//! Search-index boundary
//!
//! The derived document store is an external collaborator; this module
//! specifies it at its interface: document put/merge/delete with a refresh
//! mode, atomic tally-delta scripts (applied index-side, no read-modify-write
//! round trip), filtered multi-field-sorted queries with resumable
//! positions, and scope purge.
//!
//! Index documents are write-only projections. Only search/sort/filter
//! fields live here; hydration re-reads the record store for anything
//! correctness-sensitive.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::types::{Result, ScopeId};

pub use memory::MemorySearchIndex;

/// Visibility policy for an index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Visible to queries as soon as the write returns. Used by admin and
    /// test flows.
    Immediate,
    /// Visible after the index's own refresh cycle. The request-path
    /// default; the propagation window is what the indexing ticket covers.
    Eventual,
}

/// One sort criterion. Document-id ascending is always the final tie
/// breaker so pagination stays stable across repeated queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }
}

/// Filter conditions supported by the query path.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Exact field match.
    Term { field: String, value: JsonValue },
    /// Field matches any of the values.
    AnyTerm { field: String, values: Vec<JsonValue> },
    /// Array field contains every token (the multi-match analog).
    AllTokens { field: String, tokens: Vec<String> },
    /// Numeric range, inclusive bounds.
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

/// A search request. Always scope-qualified.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub scope: ScopeId,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: usize,
    /// Composite resume position from a previous page
    /// (`[sort values..., last document id]`).
    pub search_after: Option<JsonValue>,
}

impl SearchQuery {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            filters: Vec::new(),
            sort: Vec::new(),
            limit: 20,
            search_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, position: JsonValue) -> Self {
        self.search_after = Some(position);
        self
    }
}

/// One matching document.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    /// Values of the query's sort fields, in query order.
    pub sort_values: Vec<JsonValue>,
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Resume position for the next page; `None` when exhausted.
    pub next: Option<JsonValue>,
}

/// Atomic index-side update: bump tally fields, then recompute the rank
/// score from the updated tallies. Produces the identical score a full
/// reprojection would, by construction.
#[derive(Debug, Clone)]
pub struct DeltaScript {
    /// `field += delta` pairs.
    pub increments: Vec<(String, i64)>,
    /// Optional score recompute from the post-increment tallies.
    pub recompute: Option<ScoreRecompute>,
}

/// Score recompute instruction inside a [`DeltaScript`].
#[derive(Debug, Clone)]
pub struct ScoreRecompute {
    pub score_field: String,
    pub positive_field: String,
    pub negative_field: String,
    pub confidence: f64,
}

/// Derived, eventually-consistent document store.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index or replace a whole document.
    async fn put_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        doc: JsonValue,
        refresh: RefreshMode,
    ) -> Result<()>;

    /// Merge fields into an existing document.
    async fn merge_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        patch: JsonValue,
        refresh: RefreshMode,
    ) -> Result<()>;

    /// Apply a tally-delta script atomically to one document.
    async fn apply_delta(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        script: DeltaScript,
        refresh: RefreshMode,
    ) -> Result<()>;

    /// Delete a document; deleting an absent document is a no-op.
    async fn delete_document(
        &self,
        family: &str,
        scope: &ScopeId,
        id: &str,
        refresh: RefreshMode,
    ) -> Result<()>;

    /// Filtered, sorted query returning ids + resume position. Never
    /// mutates.
    async fn search(&self, family: &str, query: &SearchQuery) -> Result<SearchPage>;

    /// Administrative: drop every document of one scope. Returns the count
    /// removed.
    async fn purge_scope(&self, family: &str, scope: &ScopeId) -> Result<u64>;
}
