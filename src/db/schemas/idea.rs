//! Idea record schema
//!
//! Ideas are the primary content entity: immutable body once created,
//! mutable aggregate tallies updated only via atomic increments.

use serde::{Deserialize, Serialize};

use super::{partition, Metadata};
use crate::db::ItemKey;
use crate::types::ScopeId;

/// Record family for ideas
pub const IDEA_FAMILY: &str = "idea";

/// Aggregate tally fields, updated by atomic increment only.
pub const FIELD_VOTES_UP: &str = "votes_up";
pub const FIELD_VOTES_DOWN: &str = "votes_down";
pub const FIELD_FUNDED_AMOUNT: &str = "funded_amount";
pub const FIELD_REACTION_COUNT: &str = "reaction_count";
pub const FIELD_COMMENT_COUNT: &str = "comment_count";

/// Idea record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaDoc {
    /// Idea identifier
    pub id: String,

    /// Authoring user
    pub author_id: String,

    /// Title
    pub title: String,

    /// Body text
    pub body: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Lifecycle status (open, adopted, archived)
    #[serde(default = "default_status")]
    pub status: String,

    /// Positive vote tally
    #[serde(default)]
    pub votes_up: i64,

    /// Negative vote tally
    #[serde(default)]
    pub votes_down: i64,

    /// Total funded amount, in minor currency units
    #[serde(default)]
    pub funded_amount: i64,

    /// Reaction tally
    #[serde(default)]
    pub reaction_count: i64,

    /// Comment tally
    #[serde(default)]
    pub comment_count: i64,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_status() -> String {
    "open".to_string()
}

impl IdeaDoc {
    pub fn new(
        id: impl Into<String>,
        author_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            title: title.into(),
            body: body.into(),
            tags,
            status: default_status(),
            votes_up: 0,
            votes_down: 0,
            funded_amount: 0,
            reaction_count: 0,
            comment_count: 0,
            metadata: Metadata::new(),
        }
    }
}

pub fn idea_key(scope: &ScopeId, idea_id: &str) -> ItemKey {
    ItemKey::new(partition(scope, IDEA_FAMILY), idea_id)
}
