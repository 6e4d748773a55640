//! Idea store
//!
//! The content-side entity store: conditional creation, ranked/filtered
//! pages hydrated from the record store, aggregate tally bumps with full
//! reprojection, and cascade deletion of the idea's thread.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{
    batch_delete_with_retry, spawn_index_write, EntityKind, EntityStore, IndexingTicket, Mutation,
    Page, StoreContext,
};
use crate::db::schemas::comment::{comment_prefix, COMMENT_FAMILY};
use crate::db::schemas::engagement::{engagement_prefix, ActionClass, ENGAGEMENT_FAMILY};
use crate::db::schemas::idea::{idea_key, IdeaDoc};
use crate::db::{schemas, ItemKey, RangeQuery};
use crate::projection::comment::COMMENT_INDEX;
use crate::projection::idea::{IdeaProjection, IdeaQuery, IDEA_INDEX};
use crate::search::RefreshMode;
use crate::types::{EngineError, Result, ScopeId};

/// Kind descriptor for ideas.
pub struct IdeaKind;

impl EntityKind for IdeaKind {
    type Doc = IdeaDoc;

    const INDEX_FAMILY: &'static str = IDEA_INDEX;

    fn id(doc: &IdeaDoc) -> String {
        doc.id.clone()
    }

    fn key(scope: &ScopeId, id: &str) -> ItemKey {
        idea_key(scope, id)
    }

    fn project(doc: &IdeaDoc, confidence: f64) -> JsonValue {
        IdeaProjection::from_doc(doc, confidence).to_value()
    }
}

/// Store for ideas.
#[derive(Clone)]
pub struct IdeaStore {
    ideas: EntityStore<IdeaKind>,
    ctx: StoreContext,
}

impl IdeaStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ideas: EntityStore::new(ctx.clone()),
            ctx,
        }
    }

    /// Create an idea.
    pub async fn create(
        &self,
        scope: &ScopeId,
        author_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Mutation<IdeaDoc>> {
        let doc = IdeaDoc::new(Uuid::new_v4().to_string(), author_id, title, body, tags);
        if doc.title.trim().is_empty() {
            return Err(EngineError::Validation("idea title must not be empty".into()));
        }
        self.ideas.create(scope, doc).await
    }

    pub async fn get(&self, scope: &ScopeId, id: &str) -> Result<IdeaDoc> {
        self.ideas.get(scope, id).await
    }

    /// Hydrate many ideas, preserving the given order.
    pub async fn get_many(&self, scope: &ScopeId, ids: &[String]) -> Result<Vec<IdeaDoc>> {
        self.ideas.get_many(scope, ids).await
    }

    /// One page of ideas. The cursor, when given, must come unmodified from
    /// the previous page of the same query in the same scope.
    pub async fn query(
        &self,
        scope: &ScopeId,
        query: &IdeaQuery,
        cursor: Option<&str>,
    ) -> Result<Page<IdeaDoc>> {
        self.ideas
            .query_page(scope, query.to_search_query(scope), query.sort_arity(), cursor)
            .await
    }

    /// Bump aggregate tallies and reproject the whole document — the idea
    /// index carries several sort fields, so a full recompute keeps them
    /// coherent in one write.
    pub async fn bump_tallies(
        &self,
        scope: &ScopeId,
        id: &str,
        deltas: &[(&str, i64)],
    ) -> Result<Mutation<IdeaDoc>> {
        let doc = self.ideas.increment_fields(scope, id, deltas).await?;
        let indexing = self.ideas.reindex(scope, &doc);
        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }

    /// Delete an idea and cascade over its comments and engagement rows.
    /// Idempotent: a second delete finds nothing and raises nothing.
    pub async fn delete(&self, scope: &ScopeId, id: &str) -> Result<IndexingTicket> {
        // Comments first: enumerate the idea's thread prefix
        let comment_ids = self
            .collect_sorts(
                RangeQuery::new(schemas::partition(scope, COMMENT_FAMILY))
                    .with_prefix(comment_prefix(id)),
            )
            .await?;

        let comment_keys: Vec<ItemKey> = comment_ids
            .iter()
            .map(|sort| ItemKey::new(schemas::partition(scope, COMMENT_FAMILY), sort.clone()))
            .collect();
        batch_delete_with_retry(&self.ctx.store, &self.ctx.settings, comment_keys).await?;

        // Engagement rows for the idea and its comments share the target
        // prefix within each action class
        let mut engagement_keys = Vec::new();
        for action in [ActionClass::Vote, ActionClass::Fund, ActionClass::Express] {
            let sorts = self
                .collect_sorts(
                    RangeQuery::new(schemas::partition(scope, ENGAGEMENT_FAMILY))
                        .with_prefix(engagement_prefix(action, id)),
                )
                .await?;
            engagement_keys.extend(
                sorts
                    .into_iter()
                    .map(|sort| ItemKey::new(schemas::partition(scope, ENGAGEMENT_FAMILY), sort)),
            );
        }
        batch_delete_with_retry(&self.ctx.store, &self.ctx.settings, engagement_keys).await?;

        // Comment projections: same composite ids as the record sort keys
        let index = self.ctx.index.clone();
        let index_scope = scope.clone();
        let _ = spawn_index_write(COMMENT_INDEX, async move {
            for comment_id in comment_ids {
                index
                    .delete_document(COMMENT_INDEX, &index_scope, &comment_id, RefreshMode::Eventual)
                    .await?;
            }
            Ok(())
        });

        self.ideas.delete(scope, id).await
    }

    /// Collect every sort key matching a range query, paging through.
    async fn collect_sorts(&self, base: RangeQuery) -> Result<Vec<String>> {
        let mut sorts = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = base.clone().with_limit(self.ctx.settings.batch_size());
            if let Some(after) = after.take() {
                query = query.after(after);
            }

            let page = self.ctx.store.query_range(&query).await?;
            sorts.extend(page.items.into_iter().map(|(key, _)| key.sort));

            match page.last_key {
                Some(last) => after = Some(last),
                None => break,
            }
        }

        Ok(sorts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testutil::{memory_context, scope};
    use crate::types::{EngineError, SortOrder};
    use std::time::Duration;

    async fn seed_five(store: &IdeaStore) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 1..=5 {
            let created = store
                .create(
                    &scope(),
                    "user-1",
                    format!("Idea {i}"),
                    "body",
                    vec!["energy".into()],
                )
                .await
                .unwrap();
            created.indexing.wait().await.unwrap();
            ids.push(created.entity.id.clone());
            // Distinct creation timestamps keep the New sort deterministic
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        ids
    }

    #[tokio::test]
    async fn test_pagination_covers_everything_in_stable_order() {
        let store = IdeaStore::new(memory_context());
        let ids = seed_five(&store).await;

        let query = IdeaQuery::new(SortOrder::New).with_page_size(2);

        let page1 = store.query(&scope(), &query, None).await.unwrap();
        let titles1: Vec<&str> = page1.items.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles1, vec!["Idea 5", "Idea 4"]);
        let cursor1 = page1.next_cursor.expect("page 1 must mint a cursor");

        let page2 = store.query(&scope(), &query, Some(cursor1.as_str())).await.unwrap();
        let titles2: Vec<&str> = page2.items.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles2, vec!["Idea 3", "Idea 2"]);
        let cursor2 = page2.next_cursor.expect("page 2 must mint a cursor");

        let page3 = store.query(&scope(), &query, Some(cursor2.as_str())).await.unwrap();
        let titles3: Vec<&str> = page3.items.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles3, vec!["Idea 1"]);
        assert!(page3.next_cursor.is_none());

        // Concatenation equals the full set, no repeats, no gaps
        let mut seen: Vec<String> = page1
            .items
            .iter()
            .chain(&page2.items)
            .chain(&page3.items)
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(seen.len(), 5);
        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_cursor_from_other_scope_rejected() {
        let store = IdeaStore::new(memory_context());
        seed_five(&store).await;

        let query = IdeaQuery::new(SortOrder::New).with_page_size(2);
        let page = store.query(&scope(), &query, None).await.unwrap();
        let cursor = page.next_cursor.unwrap();

        let err = store
            .query(&ScopeId::new("proj-other"), &query, Some(cursor.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursor));
    }

    #[tokio::test]
    async fn test_cursor_shape_must_match_query() {
        let store = IdeaStore::new(memory_context());
        seed_five(&store).await;

        let new_query = IdeaQuery::new(SortOrder::New).with_page_size(2);
        let cursor = store
            .query(&scope(), &new_query, None)
            .await
            .unwrap()
            .next_cursor
            .unwrap();

        // A New-sort cursor cannot resume a Top-sort query
        let top_query = IdeaQuery::new(SortOrder::Top).with_page_size(2);
        let err = store
            .query(&scope(), &top_query, Some(cursor.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursor));
    }

    #[tokio::test]
    async fn test_top_sort_orders_by_funded_then_votes() {
        let store = IdeaStore::new(memory_context());

        // Wait out each creation projection so the tally reprojections
        // below are the last index writes
        let a = store
            .create(&scope(), "u", "rich", "b", vec![])
            .await
            .unwrap();
        a.indexing.wait().await.unwrap();
        let b = store
            .create(&scope(), "u", "popular", "b", vec![])
            .await
            .unwrap();
        b.indexing.wait().await.unwrap();
        let c = store
            .create(&scope(), "u", "quiet", "b", vec![])
            .await
            .unwrap();
        c.indexing.wait().await.unwrap();

        store
            .bump_tallies(&scope(), &a.entity.id, &[("funded_amount", 500)])
            .await
            .unwrap()
            .indexing
            .wait()
            .await
            .unwrap();
        store
            .bump_tallies(&scope(), &b.entity.id, &[("votes_up", 10)])
            .await
            .unwrap()
            .indexing
            .wait()
            .await
            .unwrap();
        store
            .bump_tallies(&scope(), &c.entity.id, &[("votes_up", 1)])
            .await
            .unwrap()
            .indexing
            .wait()
            .await
            .unwrap();

        let query = IdeaQuery::new(SortOrder::Top).with_page_size(10);
        let page = store.query(&scope(), &query, None).await.unwrap();
        let titles: Vec<&str> = page.items.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["rich", "popular", "quiet"]);
    }

    #[tokio::test]
    async fn test_filters_narrow_results() {
        let store = IdeaStore::new(memory_context());

        let tagged = store
            .create(&scope(), "u", "Solar roofs", "b", vec!["energy".into()])
            .await
            .unwrap();
        tagged.indexing.wait().await.unwrap();
        let other = store
            .create(&scope(), "u", "Bike lanes", "b", vec!["transit".into()])
            .await
            .unwrap();
        other.indexing.wait().await.unwrap();

        let query = IdeaQuery::new(SortOrder::New)
            .with_tag("energy")
            .with_page_size(10);
        let page = store.query(&scope(), &query, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Solar roofs");

        let query = IdeaQuery::new(SortOrder::New)
            .with_search("solar")
            .with_page_size(10);
        let page = store.query(&scope(), &query, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_bump_tallies_requires_existing_idea() {
        let store = IdeaStore::new(memory_context());
        let err = store
            .bump_tallies(&scope(), "ghost", &[("votes_up", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_from_index() {
        let store = IdeaStore::new(memory_context());
        let created = store
            .create(&scope(), "u", "Doomed", "b", vec![])
            .await
            .unwrap();
        created.indexing.wait().await.unwrap();
        let id = created.entity.id.clone();

        store.delete(&scope(), &id).await.unwrap().wait().await.unwrap();

        assert!(matches!(
            store.get(&scope(), &id).await,
            Err(EngineError::NotFound(_))
        ));
        let query = IdeaQuery::new(SortOrder::New).with_page_size(10);
        assert!(store.query(&scope(), &query, None).await.unwrap().items.is_empty());

        // Idempotent
        store.delete(&scope(), &id).await.unwrap();
    }
}
