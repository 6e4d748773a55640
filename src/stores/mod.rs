//! Entity stores: the dual-store write/query pipeline
//!
//! One generic pipeline serves every entity family. A mutation validates,
//! writes the record store synchronously under a conditional expression,
//! derives the family's index projection, and issues the index write
//! asynchronously — returning the entity together with an
//! [`IndexingTicket`] the caller may await (read-after-write on the index)
//! or drop (fire-and-forget; the committed record write stands either way).
//!
//! Queries run against the search index, return entity ids plus an opaque
//! cursor, and hydrate full entities through ordered batch reads of the
//! record store.

pub mod account;
pub mod comment;
pub mod engagement;
pub mod idea;
pub mod user;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::config::EngineSettings;
use crate::cursor::{CursorCodec, CursorPosition};
use crate::db::{
    schemas, ItemKey, RecordStore, WriteCondition, MAX_BATCH_ITEMS,
};
use crate::search::{RefreshMode, SearchIndex, SearchQuery};
use crate::types::{EngineError, Result, ScopeId};

pub use account::AccountStore;
pub use comment::CommentStore;
pub use engagement::{ActionOutcome, EngagementStore};
pub use idea::IdeaStore;
pub use user::UserStore;

/// Completion handle for one asynchronous index write.
///
/// Resolves when the index write lands (or fails). Dropping the ticket
/// abandons the wait, never the write, and never rolls back the record
/// store.
#[derive(Debug)]
pub struct IndexingTicket {
    rx: oneshot::Receiver<Result<()>>,
}

impl IndexingTicket {
    /// Wait for the index write to land. Index failures surface here and
    /// only here; the mutation itself already succeeded.
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Index("indexing task abandoned".into())),
        }
    }

    /// An already-resolved ticket, for operations with nothing to index.
    pub fn completed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { rx }
    }
}

/// Spawn an index write and hand back its ticket. Failures are logged here
/// so fire-and-forget callers do not lose them silently.
pub(crate) fn spawn_index_write<F>(label: &'static str, fut: F) -> IndexingTicket
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = fut.await;
        if let Err(e) = &result {
            error!(error = %e, op = label, "index write failed");
        }
        // Receiver may be gone (fire-and-forget); that is fine
        let _ = tx.send(result);
    });
    IndexingTicket { rx }
}

/// Result of a mutating entity-store operation.
#[derive(Debug)]
pub struct Mutation<T> {
    pub entity: T,
    pub indexing: IndexingTicket,
}

/// One hydrated page of query results.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Shared handles every store is built from.
#[derive(Clone)]
pub struct StoreContext {
    pub store: Arc<dyn RecordStore>,
    pub index: Arc<dyn SearchIndex>,
    pub settings: Arc<EngineSettings>,
}

impl StoreContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            index,
            settings,
        }
    }

    pub fn cursor_codec(&self) -> CursorCodec {
        CursorCodec::new(self.settings.clone())
    }
}

/// Key schema + projection for one entity family. Concrete stores supply
/// only this and their query builders; the pipeline is shared.
pub trait EntityKind: Send + Sync + 'static {
    type Doc: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Index family the projections land in.
    const INDEX_FAMILY: &'static str;

    /// Entity id within its scope. May be composite (comments key under
    /// their idea).
    fn id(doc: &Self::Doc) -> String;

    /// Record-store key.
    fn key(scope: &ScopeId, id: &str) -> ItemKey;

    /// Derive the index projection. Only search/sort/filter fields belong
    /// here; hydration never trusts projected values.
    fn project(doc: &Self::Doc, confidence: f64) -> JsonValue;
}

/// Generic dual-store pipeline for one entity family.
pub struct EntityStore<K: EntityKind> {
    ctx: StoreContext,
    _kind: PhantomData<K>,
}

impl<K: EntityKind> Clone for EntityStore<K> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: EntityKind> EntityStore<K> {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    /// Create the entity. Requires the key absent; a lost race surfaces as
    /// `Conflict` with the first write untouched.
    pub async fn create(&self, scope: &ScopeId, doc: K::Doc) -> Result<Mutation<K::Doc>> {
        let key = K::key(scope, &K::id(&doc));
        let item = schemas::to_item(&doc)?;

        self.ctx
            .store
            .put(&key, item, WriteCondition::KeyAbsent)
            .await?;

        let indexing = self.reindex(scope, &doc);
        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }

    /// Point read; `NotFound` when absent.
    pub async fn get(&self, scope: &ScopeId, id: &str) -> Result<K::Doc> {
        self.try_get(scope, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(K::key(scope, id).display()))
    }

    /// Point read returning `None` when absent.
    pub async fn try_get(&self, scope: &ScopeId, id: &str) -> Result<Option<K::Doc>> {
        match self.ctx.store.get(&K::key(scope, id)).await? {
            Some(item) => Ok(Some(schemas::from_item(item)?)),
            None => Ok(None),
        }
    }

    /// Ordered batch hydration. Missing ids are skipped (the index may
    /// briefly reference entities deleted from the record store).
    pub async fn get_many(&self, scope: &ScopeId, ids: &[String]) -> Result<Vec<K::Doc>> {
        let mut docs = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_BATCH_ITEMS) {
            let keys: Vec<ItemKey> = chunk.iter().map(|id| K::key(scope, id)).collect();
            for (id, item) in chunk.iter().zip(self.ctx.store.batch_get(&keys).await?) {
                match item {
                    Some(item) => docs.push(schemas::from_item(item)?),
                    None => warn!(id = %id, family = K::INDEX_FAMILY, "hydration miss, skipping id"),
                }
            }
        }

        Ok(docs)
    }

    /// Atomically bump aggregate fields on the record, then re-read the
    /// authoritative row. Callers decide how the index learns about it
    /// (full reprojection or a delta script).
    pub async fn increment_fields(
        &self,
        scope: &ScopeId,
        id: &str,
        deltas: &[(&str, i64)],
    ) -> Result<K::Doc> {
        let key = K::key(scope, id);

        // The row must exist; increments never create entities
        if self.ctx.store.get(&key).await?.is_none() {
            return Err(EngineError::NotFound(key.display()));
        }

        for (field, delta) in deltas {
            self.ctx.store.increment(&key, field, *delta, None).await?;
        }

        self.get(scope, id).await
    }

    /// Issue the async index write for the entity's current state.
    pub fn reindex(&self, scope: &ScopeId, doc: &K::Doc) -> IndexingTicket {
        let index = self.ctx.index.clone();
        let scope = scope.clone();
        let id = K::id(doc);
        let projection = K::project(doc, self.ctx.settings.confidence_level());

        spawn_index_write(K::INDEX_FAMILY, async move {
            index
                .put_document(K::INDEX_FAMILY, &scope, &id, projection, RefreshMode::Eventual)
                .await
        })
    }

    /// Delete the record and issue the async index delete. Idempotent.
    pub async fn delete(&self, scope: &ScopeId, id: &str) -> Result<IndexingTicket> {
        self.ctx.store.delete(&K::key(scope, id)).await?;

        let index = self.ctx.index.clone();
        let scope = scope.clone();
        let id = id.to_string();
        Ok(spawn_index_write(K::INDEX_FAMILY, async move {
            index
                .delete_document(K::INDEX_FAMILY, &scope, &id, RefreshMode::Eventual)
                .await
        }))
    }

    /// Run an index query, mint the next cursor, and hydrate the page from
    /// the record store in index order.
    pub async fn query_page(
        &self,
        scope: &ScopeId,
        mut query: SearchQuery,
        sort_arity: usize,
        cursor: Option<&str>,
    ) -> Result<Page<K::Doc>> {
        let codec = self.ctx.cursor_codec();

        if let Some(cursor) = cursor {
            let position = codec.decode(cursor, scope)?;
            // A cursor from a query with a different sort shape cannot
            // resume this one
            let arity_ok = position
                .after
                .as_array()
                .map(|values| values.len() == sort_arity + 1)
                .unwrap_or(false);
            if !arity_ok {
                return Err(EngineError::InvalidCursor);
            }
            query = query.after(position.after);
        }

        let page = self.ctx.index.search(K::INDEX_FAMILY, &query).await?;

        let ids: Vec<String> = page.hits.iter().map(|hit| hit.id.clone()).collect();
        let items = self.get_many(scope, &ids).await?;

        let next_cursor = match page.next {
            Some(after) => Some(codec.encode(&CursorPosition::new(scope, after))?),
            None => None,
        };

        Ok(Page { items, next_cursor })
    }
}

/// Delete keys in bounded batches, retrying only the unprocessed subset.
/// After the retry budget is spent the failure escalates as
/// `PartialBatchFailure` — logged, never silently dropped.
pub(crate) async fn batch_delete_with_retry(
    store: &Arc<dyn RecordStore>,
    settings: &EngineSettings,
    keys: Vec<ItemKey>,
) -> Result<()> {
    let attempted = keys.len();
    let mut pending = keys;
    let mut retries = 0u32;

    while !pending.is_empty() {
        let mut unprocessed = Vec::new();
        for chunk in pending.chunks(MAX_BATCH_ITEMS.min(settings.batch_size())) {
            unprocessed.extend(store.batch_delete(chunk).await?.unprocessed);
        }

        if unprocessed.is_empty() {
            return Ok(());
        }

        retries += 1;
        if retries > settings.batch_retry_budget() {
            error!(
                attempted,
                unprocessed = unprocessed.len(),
                retries,
                "batch delete exhausted its retry budget"
            );
            return Err(EngineError::PartialBatchFailure {
                attempted,
                unprocessed: unprocessed.len(),
                retries,
            });
        }
        pending = unprocessed;
    }

    Ok(())
}

/// Administrative cleanup: delete every record and index document of one
/// scope. The only path that may enumerate a whole scope, and it is itself
/// scoped and batched. Returns the number of records removed.
pub async fn purge_scope(ctx: &StoreContext, scope: &ScopeId) -> Result<u64> {
    use crate::counter::{SEEN_FAMILY, SHARD_FAMILY};
    use crate::db::schemas::account::{ACCOUNT_FAMILY, SESSION_FAMILY};
    use crate::db::schemas::comment::COMMENT_FAMILY;
    use crate::db::schemas::engagement::{ENGAGEMENT_FAMILY, FILTER_FAMILY};
    use crate::db::schemas::idea::IDEA_FAMILY;
    use crate::db::schemas::user::{IDENTIFIER_FAMILY, USER_FAMILY};
    use crate::db::RangeQuery;

    const RECORD_FAMILIES: [&str; 10] = [
        ACCOUNT_FAMILY,
        SESSION_FAMILY,
        USER_FAMILY,
        IDENTIFIER_FAMILY,
        IDEA_FAMILY,
        COMMENT_FAMILY,
        ENGAGEMENT_FAMILY,
        FILTER_FAMILY,
        SHARD_FAMILY,
        SEEN_FAMILY,
    ];
    const INDEX_FAMILIES: [&str; 4] = ["account", "user", "idea", "comment"];

    let mut removed = 0u64;

    for family in RECORD_FAMILIES {
        let partition = schemas::partition(scope, family);
        loop {
            let page = ctx
                .store
                .query_range(
                    &RangeQuery::new(partition.clone()).with_limit(ctx.settings.batch_size()),
                )
                .await?;
            if page.items.is_empty() {
                break;
            }

            // Each pass re-queries from the front; deletions drain the
            // partition until the page comes back empty
            let keys: Vec<ItemKey> = page.items.into_iter().map(|(key, _)| key).collect();
            removed += keys.len() as u64;
            batch_delete_with_retry(&ctx.store, &ctx.settings, keys).await?;
        }
    }

    for family in INDEX_FAMILIES {
        ctx.index.purge_scope(family, scope).await?;
    }

    Ok(removed)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BatchDeleteOutcome, Item, RangePage, RangeQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ticket_completed_resolves() {
        IndexingTicket::completed().wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawned_ticket_reports_failure() {
        let ticket = spawn_index_write("test", async {
            Err(EngineError::Index("refused".into()))
        });
        assert!(matches!(
            ticket.wait().await,
            Err(EngineError::Index(_))
        ));
    }

    /// Record store that refuses to delete a fixed number of keys per
    /// batch, to drive the retry path.
    struct StubbornStore {
        inner: crate::db::MemoryRecordStore,
        refuse_per_batch: usize,
        refusals_left: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for StubbornStore {
        async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &ItemKey, item: Item, condition: WriteCondition) -> Result<()> {
            self.inner.put(key, item, condition).await
        }
        async fn update_fields(
            &self,
            key: &ItemKey,
            fields: Item,
            condition: WriteCondition,
        ) -> Result<()> {
            self.inner.update_fields(key, fields, condition).await
        }
        async fn increment(
            &self,
            key: &ItemKey,
            field: &str,
            delta: i64,
            expires_at: Option<i64>,
        ) -> Result<i64> {
            self.inner.increment(key, field, delta, expires_at).await
        }
        async fn delete(&self, key: &ItemKey) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn batch_get(&self, keys: &[ItemKey]) -> Result<Vec<Option<Item>>> {
            self.inner.batch_get(keys).await
        }
        async fn batch_delete(&self, keys: &[ItemKey]) -> Result<BatchDeleteOutcome> {
            let refuse = self
                .refusals_left
                .load(Ordering::SeqCst)
                .min(self.refuse_per_batch)
                .min(keys.len());
            self.refusals_left.fetch_sub(refuse, Ordering::SeqCst);

            let (kept, processed) = keys.split_at(refuse);
            self.inner.batch_delete(processed).await?;
            Ok(BatchDeleteOutcome {
                unprocessed: kept.to_vec(),
            })
        }
        async fn query_range(&self, query: &RangeQuery) -> Result<RangePage> {
            self.inner.query_range(query).await
        }
        async fn transact_put(&self, puts: Vec<crate::db::ConditionalPut>) -> Result<()> {
            self.inner.transact_put(puts).await
        }
    }

    #[tokio::test]
    async fn test_batch_delete_retries_unprocessed_subset() {
        let store = StubbornStore {
            inner: crate::db::MemoryRecordStore::new(),
            refuse_per_batch: 2,
            refusals_left: AtomicUsize::new(4),
        };
        let keys: Vec<ItemKey> = (0..10).map(|i| ItemKey::new("p", format!("k{i}"))).collect();
        for key in &keys {
            store
                .put(key, Item::new(), WriteCondition::None)
                .await
                .unwrap();
        }

        let store: Arc<dyn RecordStore> = Arc::new(store);
        let settings = EngineSettings::for_tests();

        batch_delete_with_retry(&store, &settings, keys.clone())
            .await
            .unwrap();

        for key in &keys {
            assert!(store.get(key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_purge_scope_leaves_other_scopes_alone() {
        let ctx = testutil::memory_context();
        let ideas = idea::IdeaStore::new(ctx.clone());
        let accounts = account::AccountStore::new(ctx.clone());

        let doomed = ScopeId::new("proj-doomed");
        let kept = ScopeId::new("proj-kept");

        for scope in [&doomed, &kept] {
            accounts.create(scope, "acct-1", "Acme").await.unwrap();
            let idea = ideas
                .create(scope, "u", "Idea", "body", vec![])
                .await
                .unwrap();
            idea.indexing.wait().await.unwrap();
        }

        let removed = purge_scope(&ctx, &doomed).await.unwrap();
        assert!(removed >= 2);

        assert!(matches!(
            accounts.get(&doomed, "acct-1").await,
            Err(EngineError::NotFound(_))
        ));
        // The other scope is untouched
        accounts.get(&kept, "acct-1").await.unwrap();
        let query = crate::projection::idea::IdeaQuery::new(crate::types::SortOrder::New)
            .with_page_size(10);
        assert_eq!(ideas.query(&kept, &query, None).await.unwrap().items.len(), 1);
        assert!(ideas.query(&doomed, &query, None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_batch_delete_escalates_after_budget() {
        let store = StubbornStore {
            inner: crate::db::MemoryRecordStore::new(),
            refuse_per_batch: 1,
            // Refuses forever
            refusals_left: AtomicUsize::new(usize::MAX),
        };
        let keys: Vec<ItemKey> = (0..3).map(|i| ItemKey::new("p", format!("k{i}"))).collect();
        for key in &keys {
            store
                .put(key, Item::new(), WriteCondition::None)
                .await
                .unwrap();
        }

        let store: Arc<dyn RecordStore> = Arc::new(store);
        let settings = EngineSettings::for_tests();

        let err = batch_delete_with_retry(&store, &settings, keys)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PartialBatchFailure { .. }));
    }
}
