//! Shared identifiers and the engine error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine-wide error taxonomy.
///
/// `Conflict` is recoverable by the caller (retry with fresh state, or
/// surface as "already exists"). `NotFound` is terminal for the request.
/// `InvalidCursor` means pagination must restart from the beginning.
/// `PartialBatchFailure` is raised only after the retry budget is spent.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A conditional write lost: duplicate key, stale version, or a
    /// uniqueness claim already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A key that was required to exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cursor failed authentication, was malformed, or belongs to a
    /// different scope.
    #[error("invalid cursor")]
    InvalidCursor,

    /// Some items of a bounded batch never applied, even after retries.
    #[error("batch incomplete: {unprocessed} of {attempted} items unprocessed after {retries} retries")]
    PartialBatchFailure {
        attempted: usize,
        unprocessed: usize,
        retries: u32,
    },

    /// Record store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Search index failure.
    #[error("index error: {0}")]
    Index(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Request rejected before any write happened.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Tenant/project identifier. Every read and write is qualified by scope;
/// no component scans across scopes except the explicit purge paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Sort order for content queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// (funded amount, vote value, reaction value) descending.
    Top,
    /// Creation time descending.
    New,
}
