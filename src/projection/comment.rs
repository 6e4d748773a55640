//! Comment projection schema
//!
//! Comments are ranked inside their idea by the Wilson lower-bound score.
//! Vote changes arrive as index-side delta scripts that bump the tallies
//! and recompute the score in place.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::db::schemas::comment::CommentDoc;
use crate::rank;
use crate::search::{DeltaScript, Filter, ScoreRecompute, SearchQuery, SortKey};
use crate::types::{ScopeId, SortOrder};

/// Index family for comment projections
pub const COMMENT_INDEX: &str = "comment";

pub const FIELD_CREATED_AT_MS: &str = "created_at_ms";
pub const FIELD_VOTES_UP: &str = "votes_up";
pub const FIELD_VOTES_DOWN: &str = "votes_down";
pub const FIELD_SCORE: &str = "score";

/// Projected comment document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentProjection {
    /// Comment id (document id in the index)
    pub id: String,

    /// Owning idea
    pub idea_id: String,

    /// Authoring user
    pub author_id: String,

    /// Parent comment for threads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Vote tallies mirrored for ranking
    pub votes_up: i64,
    pub votes_down: i64,

    /// Wilson lower-bound score from the tallies
    pub score: f64,

    /// Creation time as epoch milliseconds
    pub created_at_ms: i64,
}

impl CommentProjection {
    pub fn from_doc(doc: &CommentDoc, confidence: f64) -> Self {
        Self {
            id: doc.id.clone(),
            idea_id: doc.idea_id.clone(),
            author_id: doc.author_id.clone(),
            parent_id: doc.parent_id.clone(),
            votes_up: doc.votes_up,
            votes_down: doc.votes_down,
            score: rank::score_from_tally(
                confidence,
                doc.votes_up.max(0) as u64,
                doc.votes_down.max(0) as u64,
            ),
            created_at_ms: doc.metadata.created_at.timestamp_millis(),
        }
    }

    pub fn to_value(&self) -> JsonValue {
        json!(self)
    }
}

/// Delta script for one comment vote: bump the tally, recompute the score
/// from the post-increment pair. Yields the same score a full reprojection
/// would.
pub fn vote_delta(up: bool, confidence: f64) -> DeltaScript {
    let field = if up { FIELD_VOTES_UP } else { FIELD_VOTES_DOWN };
    DeltaScript {
        increments: vec![(field.to_string(), 1)],
        recompute: Some(ScoreRecompute {
            score_field: FIELD_SCORE.to_string(),
            positive_field: FIELD_VOTES_UP.to_string(),
            negative_field: FIELD_VOTES_DOWN.to_string(),
            confidence,
        }),
    }
}

/// Query parameters for one idea's comment page.
#[derive(Debug, Clone)]
pub struct CommentQuery {
    pub idea_id: String,
    pub sort: SortOrder,
    pub page_size: usize,
}

impl CommentQuery {
    pub fn new(idea_id: impl Into<String>, sort: SortOrder) -> Self {
        Self {
            idea_id: idea_id.into(),
            sort,
            page_size: 20,
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Number of sort fields; resume positions carry one extra id element.
    pub fn sort_arity(&self) -> usize {
        1
    }

    pub fn to_search_query(&self, scope: &ScopeId) -> SearchQuery {
        let sort = match self.sort {
            SortOrder::Top => SortKey::desc(FIELD_SCORE),
            SortOrder::New => SortKey::desc(FIELD_CREATED_AT_MS),
        };

        SearchQuery::new(scope.clone())
            .filter(Filter::Term {
                field: "idea_id".into(),
                value: json!(self.idea_id),
            })
            .sort_by(sort)
            .with_limit(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_score_matches_tally() {
        let mut doc = CommentDoc::new("c-1", "idea-1", "user-1", None, "agreed");
        doc.votes_up = 4;
        doc.votes_down = 1;

        let projection = CommentProjection::from_doc(&doc, 0.9);
        assert_eq!(projection.score, rank::score_from_tally(0.9, 4, 1));
    }

    #[test]
    fn test_vote_delta_shape() {
        let script = vote_delta(false, 0.95);
        assert_eq!(script.increments, vec![(FIELD_VOTES_DOWN.to_string(), 1)]);
        assert!(script.recompute.is_some());
    }
}
