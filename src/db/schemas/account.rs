//! Account and session record schemas
//!
//! Accounts are the billing/ownership root of a scope. Sessions hang off an
//! account and are cascade-deleted when the account is revoked.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{partition, Metadata};
use crate::db::ItemKey;
use crate::types::ScopeId;

/// Record family for accounts
pub const ACCOUNT_FAMILY: &str = "account";

/// Record family for sessions
pub const SESSION_FAMILY: &str = "session";

/// Default session lifetime
pub const SESSION_TTL_HOURS: i64 = 24 * 30;

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDoc {
    /// Account identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Billing plan (free, team, enterprise)
    #[serde(default = "default_plan")]
    pub plan: String,

    /// Whether the account has been suspended
    #[serde(default)]
    pub suspended: bool,

    /// Optimistic concurrency version, bumped on every update
    #[serde(default = "default_version")]
    pub version: i64,

    /// Standard metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_plan() -> String {
    "free".to_string()
}

fn default_version() -> i64 {
    1
}

impl AccountDoc {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plan: default_plan(),
            suspended: false,
            version: 1,
            metadata: Metadata::new(),
        }
    }
}

/// Session record. Sort key is `"{account_id}#{session_id}"` so all
/// sessions of one account enumerate under a single prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    /// Session identifier
    pub session_id: String,

    /// Owning account
    pub account_id: String,

    /// Fingerprint of the issued token (never the token itself)
    pub token_fingerprint: String,

    /// When the session expires. Serialized as epoch seconds into the
    /// record store's expiry field, so expired sessions read as absent.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl SessionDoc {
    pub fn new(account_id: impl Into<String>, token_fingerprint: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            token_fingerprint: token_fingerprint.into(),
            expires_at: Utc::now() + Duration::hours(SESSION_TTL_HOURS),
            metadata: Metadata::new(),
        }
    }
}

pub fn account_key(scope: &ScopeId, account_id: &str) -> ItemKey {
    ItemKey::new(partition(scope, ACCOUNT_FAMILY), account_id)
}

pub fn session_partition(scope: &ScopeId) -> String {
    partition(scope, SESSION_FAMILY)
}

pub fn session_key(scope: &ScopeId, account_id: &str, session_id: &str) -> ItemKey {
    ItemKey::new(
        session_partition(scope),
        format!("{account_id}#{session_id}"),
    )
}

/// Sort-key prefix covering every session of one account.
pub fn session_prefix(account_id: &str) -> String {
    format!("{account_id}#")
}
