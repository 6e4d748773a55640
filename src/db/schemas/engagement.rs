//! Engagement record schemas: votes, funds, expressions
//!
//! Two record kinds back the idempotent action pipeline:
//!
//! - the actor's membership filter, one row per `(actor, action class)`,
//!   persisted with a version-conditioned write so a concurrent duplicate
//!   submission loses the condition instead of double-counting;
//! - the engagement row itself, created with a not-exists condition as the
//!   durable record of the accepted action.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{partition, Metadata};
use crate::db::ItemKey;
use crate::filter::MembershipFilter;
use crate::types::{Result, ScopeId};

/// Record family for engagement rows
pub const ENGAGEMENT_FAMILY: &str = "engagement";

/// Record family for actor membership filters
pub const FILTER_FAMILY: &str = "action_filter";

/// Expected distinct targets per actor per action class; sizes the filter.
pub const FILTER_EXPECTED_TARGETS: u64 = 5_000;

/// Configured false-positive rate for actor filters.
pub const FILTER_FALSE_POSITIVE_RATE: f64 = 1e-4;

/// Class of guarded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Vote,
    Fund,
    Express,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Vote => "vote",
            ActionClass::Fund => "fund",
            ActionClass::Express => "express",
        }
    }
}

/// Durable record of one accepted engagement action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementDoc {
    /// Acting user
    pub actor_id: String,

    /// Target entity (idea or comment)
    pub target_id: String,

    /// Action class
    pub action: ActionClass,

    /// Signed action value: vote direction, funded amount, or reaction count
    pub value: i64,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl EngagementDoc {
    pub fn new(
        actor_id: impl Into<String>,
        target_id: impl Into<String>,
        action: ActionClass,
        value: i64,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            target_id: target_id.into(),
            action,
            value,
            metadata: Metadata::new(),
        }
    }
}

/// Persisted membership filter for one `(actor, action class)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFilterDoc {
    /// Owning actor
    pub actor_id: String,

    /// Action class this filter guards
    pub action: ActionClass,

    /// Serialized filter, base64
    pub filter_b64: String,

    /// Optimistic concurrency version
    pub version: i64,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl ActionFilterDoc {
    /// Fresh filter document for an actor that has not acted yet.
    pub fn new(actor_id: impl Into<String>, action: ActionClass) -> Self {
        let filter = MembershipFilter::new(FILTER_EXPECTED_TARGETS, FILTER_FALSE_POSITIVE_RATE);
        Self {
            actor_id: actor_id.into(),
            action,
            filter_b64: BASE64.encode(filter.to_bytes()),
            version: 0,
            metadata: Metadata::new(),
        }
    }

    /// Decode the embedded filter.
    pub fn filter(&self) -> Result<MembershipFilter> {
        let bytes = BASE64.decode(&self.filter_b64).map_err(|e| {
            crate::types::EngineError::Storage(format!("action filter bytes corrupt: {e}"))
        })?;
        MembershipFilter::from_bytes(&bytes)
    }

    /// Store an updated filter and bump the version.
    pub fn set_filter(&mut self, filter: &MembershipFilter) {
        self.filter_b64 = BASE64.encode(filter.to_bytes());
        self.version += 1;
        self.metadata.touch();
    }
}

pub fn engagement_key(
    scope: &ScopeId,
    action: ActionClass,
    target_id: &str,
    actor_id: &str,
) -> ItemKey {
    ItemKey::new(
        partition(scope, ENGAGEMENT_FAMILY),
        format!("{}#{target_id}#{actor_id}", action.as_str()),
    )
}

/// Sort-key prefix covering every engagement of one class on one target.
pub fn engagement_prefix(action: ActionClass, target_id: &str) -> String {
    format!("{}#{target_id}#", action.as_str())
}

pub fn filter_key(scope: &ScopeId, actor_id: &str, action: ActionClass) -> ItemKey {
    ItemKey::new(
        partition(scope, FILTER_FAMILY),
        format!("{actor_id}#{}", action.as_str()),
    )
}
