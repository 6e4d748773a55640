//! User record schema
//!
//! A user creation writes two records in one transaction: the user itself
//! and one claim row per unique identifier (email, handle). The claim rows
//! give "identifier already taken" its conflict semantics.

use serde::{Deserialize, Serialize};

use super::{partition, Metadata};
use crate::db::ItemKey;
use crate::types::ScopeId;

/// Record family for users
pub const USER_FAMILY: &str = "user";

/// Record family for unique identifier claims
pub const IDENTIFIER_FAMILY: &str = "user_ident";

/// User record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDoc {
    /// User identifier
    pub id: String,

    /// Display name
    pub display_name: String,

    /// Primary identifier (email or handle); uniqueness enforced via a
    /// claim row, not scanned
    pub identifier: String,

    /// Whether the user is active
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Optimistic concurrency version
    #[serde(default = "default_version")]
    pub version: i64,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_true() -> bool {
    true
}

fn default_version() -> i64 {
    1
}

impl UserDoc {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            identifier: identifier.into(),
            is_active: true,
            version: 1,
            metadata: Metadata::new(),
        }
    }
}

/// Claim row mapping a unique identifier to its owning user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierClaimDoc {
    /// The claimed identifier
    pub identifier: String,

    /// Owning user
    pub user_id: String,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl IdentifierClaimDoc {
    pub fn new(identifier: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            user_id: user_id.into(),
            metadata: Metadata::new(),
        }
    }
}

pub fn user_key(scope: &ScopeId, user_id: &str) -> ItemKey {
    ItemKey::new(partition(scope, USER_FAMILY), user_id)
}

pub fn identifier_key(scope: &ScopeId, identifier: &str) -> ItemKey {
    ItemKey::new(partition(scope, IDENTIFIER_FAMILY), identifier)
}
