//! Comment store
//!
//! Comments live under their idea (composite record key) and rank by the
//! Wilson lower-bound score. Vote changes take the incremental path: an
//! index-side delta script bumps the tallies and recomputes the score,
//! which lands on the same value a full reprojection would.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{spawn_index_write, EntityKind, EntityStore, IndexingTicket, Mutation, Page, StoreContext};
use super::idea::IdeaStore;
use crate::db::schemas::comment::{CommentDoc, COMMENT_FAMILY};
use crate::db::schemas::idea::FIELD_COMMENT_COUNT;
use crate::db::{schemas, ItemKey};
use crate::projection::comment::{
    vote_delta, CommentProjection, CommentQuery, COMMENT_INDEX, FIELD_VOTES_DOWN, FIELD_VOTES_UP,
};
use crate::search::RefreshMode;
use crate::types::{Result, ScopeId};

/// Kind descriptor for comments. Ids are composite: `"{idea_id}#{id}"`.
pub struct CommentKind;

impl EntityKind for CommentKind {
    type Doc = CommentDoc;

    const INDEX_FAMILY: &'static str = COMMENT_INDEX;

    fn id(doc: &CommentDoc) -> String {
        format!("{}#{}", doc.idea_id, doc.id)
    }

    fn key(scope: &ScopeId, id: &str) -> ItemKey {
        ItemKey::new(schemas::partition(scope, COMMENT_FAMILY), id)
    }

    fn project(doc: &CommentDoc, confidence: f64) -> JsonValue {
        CommentProjection::from_doc(doc, confidence).to_value()
    }
}

/// Store for comments.
#[derive(Clone)]
pub struct CommentStore {
    comments: EntityStore<CommentKind>,
    ideas: IdeaStore,
    ctx: StoreContext,
}

impl CommentStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            comments: EntityStore::new(ctx.clone()),
            ideas: IdeaStore::new(ctx.clone()),
            ctx,
        }
    }

    /// Create a comment under an existing idea and bump the idea's comment
    /// tally.
    pub async fn create(
        &self,
        scope: &ScopeId,
        idea_id: &str,
        author_id: impl Into<String>,
        parent_id: Option<String>,
        body: impl Into<String>,
    ) -> Result<Mutation<CommentDoc>> {
        // The idea must exist; comments never dangle
        self.ideas.get(scope, idea_id).await?;

        let doc = CommentDoc::new(
            Uuid::new_v4().to_string(),
            idea_id,
            author_id,
            parent_id,
            body,
        );
        let mutation = self.comments.create(scope, doc).await?;

        // The idea's own projection refreshes in the background; the
        // comment's ticket is the one the caller cares about
        let _ = self
            .ideas
            .bump_tallies(scope, idea_id, &[(FIELD_COMMENT_COUNT, 1)])
            .await?;

        Ok(mutation)
    }

    pub async fn get(&self, scope: &ScopeId, idea_id: &str, comment_id: &str) -> Result<CommentDoc> {
        self.comments
            .get(scope, &format!("{idea_id}#{comment_id}"))
            .await
    }

    /// One page of an idea's comments.
    pub async fn page(
        &self,
        scope: &ScopeId,
        query: &CommentQuery,
        cursor: Option<&str>,
    ) -> Result<Page<CommentDoc>> {
        self.comments
            .query_page(scope, query.to_search_query(scope), query.sort_arity(), cursor)
            .await
    }

    /// Apply one vote to a comment.
    ///
    /// The record store takes the atomic increment; the index takes a delta
    /// script that bumps the mirrored tally and recomputes the score in
    /// place — no read-modify-write round trip against the index.
    pub async fn apply_vote(
        &self,
        scope: &ScopeId,
        idea_id: &str,
        comment_id: &str,
        up: bool,
    ) -> Result<Mutation<CommentDoc>> {
        let composite = format!("{idea_id}#{comment_id}");
        let field = if up { FIELD_VOTES_UP } else { FIELD_VOTES_DOWN };

        let doc = self
            .comments
            .increment_fields(scope, &composite, &[(field, 1)])
            .await?;

        let index = self.ctx.index.clone();
        let index_scope = scope.clone();
        let script = vote_delta(up, self.ctx.settings.confidence_level());
        let indexing: IndexingTicket = spawn_index_write(COMMENT_INDEX, async move {
            index
                .apply_delta(COMMENT_INDEX, &index_scope, &composite, script, RefreshMode::Eventual)
                .await
        });

        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank;
    use crate::stores::testutil::{memory_context, scope};
    use crate::types::{EngineError, SortOrder};

    async fn idea_with_comments(ctx: &StoreContext, count: usize) -> (IdeaStore, CommentStore, String) {
        let ideas = IdeaStore::new(ctx.clone());
        let comments = CommentStore::new(ctx.clone());

        let idea = ideas
            .create(&scope(), "user-1", "Idea", "body", vec![])
            .await
            .unwrap();
        idea.indexing.wait().await.unwrap();
        let idea_id = idea.entity.id.clone();

        for i in 0..count {
            let created = comments
                .create(&scope(), &idea_id, "user-2", None, format!("comment {i}"))
                .await
                .unwrap();
            created.indexing.wait().await.unwrap();
        }

        (ideas, comments, idea_id)
    }

    #[tokio::test]
    async fn test_create_requires_idea() {
        let comments = CommentStore::new(memory_context());
        let err = comments
            .create(&scope(), "ghost-idea", "user-1", None, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_bumps_idea_comment_count() {
        let ctx = memory_context();
        let (ideas, _, idea_id) = idea_with_comments(&ctx, 3).await;

        let idea = ideas.get(&scope(), &idea_id).await.unwrap();
        assert_eq!(idea.comment_count, 3);
    }

    #[tokio::test]
    async fn test_page_by_idea() {
        let ctx = memory_context();
        let (_, comments, idea_id) = idea_with_comments(&ctx, 5).await;

        let query = CommentQuery::new(&idea_id, SortOrder::New).with_page_size(2);

        let page1 = comments.page(&scope(), &query, None).await.unwrap();
        assert_eq!(page1.items.len(), 2);
        let page2 = comments
            .page(&scope(), &query, page1.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 2);
        let page3 = comments
            .page(&scope(), &query, page2.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page3.items.len(), 1);
        assert!(page3.next_cursor.is_none());

        for doc in page1.items.iter().chain(&page2.items).chain(&page3.items) {
            assert_eq!(doc.idea_id, idea_id);
        }
    }

    #[tokio::test]
    async fn test_vote_delta_equals_full_recompute() {
        let ctx = memory_context();
        let (_, comments, idea_id) = idea_with_comments(&ctx, 1).await;

        let page = comments
            .page(
                &scope(),
                &CommentQuery::new(&idea_id, SortOrder::New).with_page_size(1),
                None,
            )
            .await
            .unwrap();
        let comment_id = page.items[0].id.clone();

        for up in [true, true, false, true] {
            comments
                .apply_vote(&scope(), &idea_id, &comment_id, up)
                .await
                .unwrap()
                .indexing
                .wait()
                .await
                .unwrap();
        }

        // Authoritative tallies from the record store
        let doc = comments.get(&scope(), &idea_id, &comment_id).await.unwrap();
        assert_eq!((doc.votes_up, doc.votes_down), (3, 1));

        // The incrementally-maintained index score equals a recompute from
        // the raw tallies
        let expected = rank::score_from_tally(
            ctx.settings.confidence_level(),
            doc.votes_up as u64,
            doc.votes_down as u64,
        );
        let ranked = comments
            .page(
                &scope(),
                &CommentQuery::new(&idea_id, SortOrder::Top).with_page_size(1),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ranked.items[0].id, comment_id);

        // Pull the projected score straight off the index
        let search_page = ctx
            .index
            .search(
                COMMENT_INDEX,
                &CommentQuery::new(&idea_id, SortOrder::Top)
                    .with_page_size(1)
                    .to_search_query(&scope()),
            )
            .await
            .unwrap();
        let projected_score = search_page.hits[0].sort_values[0].as_f64().unwrap();
        assert_eq!(projected_score, expected);
    }

    #[tokio::test]
    async fn test_top_sort_prefers_better_tallies() {
        let ctx = memory_context();
        let (_, comments, idea_id) = idea_with_comments(&ctx, 2).await;

        let page = comments
            .page(
                &scope(),
                &CommentQuery::new(&idea_id, SortOrder::New).with_page_size(2),
                None,
            )
            .await
            .unwrap();
        let (first, second) = (page.items[0].id.clone(), page.items[1].id.clone());

        // Three upvotes for one, one downvote for the other
        for _ in 0..3 {
            comments
                .apply_vote(&scope(), &idea_id, &first, true)
                .await
                .unwrap()
                .indexing
                .wait()
                .await
                .unwrap();
        }
        comments
            .apply_vote(&scope(), &idea_id, &second, false)
            .await
            .unwrap()
            .indexing
            .wait()
            .await
            .unwrap();

        let ranked = comments
            .page(
                &scope(),
                &CommentQuery::new(&idea_id, SortOrder::Top).with_page_size(2),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ranked.items[0].id, first);
        assert_eq!(ranked.items[1].id, second);
    }
}
