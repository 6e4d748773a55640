//! Comment record schema
//!
//! Comments nest under an idea; the sort key `"{idea_id}#{comment_id}"`
//! keeps one idea's thread enumerable under a single prefix.

use serde::{Deserialize, Serialize};

use super::{partition, Metadata};
use crate::db::ItemKey;
use crate::types::ScopeId;

/// Record family for comments
pub const COMMENT_FAMILY: &str = "comment";

/// Comment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentDoc {
    /// Comment identifier
    pub id: String,

    /// Idea this comment belongs to
    pub idea_id: String,

    /// Authoring user
    pub author_id: String,

    /// Parent comment for threaded replies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Body text
    pub body: String,

    /// Positive vote tally
    #[serde(default)]
    pub votes_up: i64,

    /// Negative vote tally
    #[serde(default)]
    pub votes_down: i64,

    /// Standard metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl CommentDoc {
    pub fn new(
        id: impl Into<String>,
        idea_id: impl Into<String>,
        author_id: impl Into<String>,
        parent_id: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            idea_id: idea_id.into(),
            author_id: author_id.into(),
            parent_id,
            body: body.into(),
            votes_up: 0,
            votes_down: 0,
            metadata: Metadata::new(),
        }
    }
}

pub fn comment_key(scope: &ScopeId, idea_id: &str, comment_id: &str) -> ItemKey {
    ItemKey::new(
        partition(scope, COMMENT_FAMILY),
        format!("{idea_id}#{comment_id}"),
    )
}

/// Sort-key prefix covering every comment of one idea.
pub fn comment_prefix(idea_id: &str) -> String {
    format!("{idea_id}#")
}
