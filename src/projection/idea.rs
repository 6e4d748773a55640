//! Idea projection schema
//!
//! Denormalized view of idea records optimized for ranked and filtered
//! queries: status, tags, author, full-text tokens, and the aggregate
//! tallies the Top sort reads.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::tokenize;
use crate::db::schemas::idea::IdeaDoc;
use crate::rank;
use crate::search::{Filter, SearchQuery, SortKey};
use crate::types::{ScopeId, SortOrder};

/// Index family for idea projections
pub const IDEA_INDEX: &str = "idea";

pub const FIELD_CREATED_AT_MS: &str = "created_at_ms";
pub const FIELD_VOTES_UP: &str = "votes_up";
pub const FIELD_VOTES_DOWN: &str = "votes_down";
pub const FIELD_VOTE_VALUE: &str = "vote_value";
pub const FIELD_FUNDED_AMOUNT: &str = "funded_amount";
pub const FIELD_REACTION_COUNT: &str = "reaction_count";
pub const FIELD_SCORE: &str = "score";

/// Projected idea document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaProjection {
    /// Idea id (document id in the index)
    pub id: String,

    /// Authoring user
    pub author_id: String,

    /// Title, kept for result snippets
    pub title: String,

    /// Lifecycle status
    pub status: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Search tokens from title and body
    #[serde(default)]
    pub search_tokens: Vec<String>,

    /// Aggregate tallies mirrored for sorting
    pub votes_up: i64,
    pub votes_down: i64,
    /// Net votes, the middle key of the Top sort
    pub vote_value: i64,
    pub funded_amount: i64,
    pub reaction_count: i64,
    pub comment_count: i64,

    /// Wilson lower-bound score from the vote tallies
    pub score: f64,

    /// Creation time as epoch milliseconds, the New sort key
    pub created_at_ms: i64,
}

impl IdeaProjection {
    /// Project a record into its index document.
    pub fn from_doc(doc: &IdeaDoc, confidence: f64) -> Self {
        let mut search_tokens = tokenize(&doc.title);
        search_tokens.extend(tokenize(&doc.body));
        for tag in &doc.tags {
            search_tokens.push(tag.to_lowercase());
        }
        search_tokens.sort();
        search_tokens.dedup();

        Self {
            id: doc.id.clone(),
            author_id: doc.author_id.clone(),
            title: doc.title.clone(),
            status: doc.status.clone(),
            tags: doc.tags.clone(),
            search_tokens,
            votes_up: doc.votes_up,
            votes_down: doc.votes_down,
            vote_value: doc.votes_up - doc.votes_down,
            funded_amount: doc.funded_amount,
            reaction_count: doc.reaction_count,
            comment_count: doc.comment_count,
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

/// Query parameters for idea pages.
#[derive(Debug, Clone)]
pub struct IdeaQuery {
    pub sort: SortOrder,
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub author_id: Option<String>,
    pub search: Option<String>,
    pub page_size: usize,
}

impl IdeaQuery {
    pub fn new(sort: SortOrder) -> Self {
        Self {
            sort,
            status: None,
            tags: Vec::new(),
            author_id: None,
            search: None,
            page_size: 20,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn by_author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Number of sort fields; resume positions carry one extra id element.
    pub fn sort_arity(&self) -> usize {
        match self.sort {
            SortOrder::Top => 3,
            SortOrder::New => 1,
        }
    }

    /// Lower into an index query for the given scope.
    pub fn to_search_query(&self, scope: &ScopeId) -> SearchQuery {
        let mut query = SearchQuery::new(scope.clone()).with_limit(self.page_size);

        match self.sort {
            SortOrder::Top => {
                query = query
                    .sort_by(SortKey::desc(FIELD_FUNDED_AMOUNT))
                    .sort_by(SortKey::desc(FIELD_VOTE_VALUE))
                    .sort_by(SortKey::desc(FIELD_REACTION_COUNT));
            }
            SortOrder::New => {
                query = query.sort_by(SortKey::desc(FIELD_CREATED_AT_MS));
            }
        }

        if let Some(status) = &self.status {
            query = query.filter(Filter::Term {
                field: "status".into(),
                value: json!(status),
            });
        }
        for tag in &self.tags {
            query = query.filter(Filter::Term {
                field: "tags".into(),
                value: json!(tag),
            });
        }
        if let Some(author_id) = &self.author_id {
            query = query.filter(Filter::Term {
                field: "author_id".into(),
                value: json!(author_id),
            });
        }
        if let Some(search) = &self.search {
            let tokens = tokenize(search);
            if !tokens.is_empty() {
                query = query.filter(Filter::AllTokens {
                    field: "search_tokens".into(),
                    tokens,
                });
            }
        }

        query
    }
}
