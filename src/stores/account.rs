//! Account store
//!
//! Accounts own sessions; revoking an account cascades over every session
//! via the session partition's prefix, deleting in bounded batches.

use serde_json::{json, Value as JsonValue};

use super::{
    batch_delete_with_retry, EntityKind, EntityStore, IndexingTicket, Mutation, StoreContext,
};
use crate::db::schemas::account::{
    account_key, session_key, session_partition, session_prefix, AccountDoc, SessionDoc,
};
use crate::db::{schemas, ItemKey, RangeQuery, WriteCondition};
use crate::types::{Result, ScopeId};

/// Kind descriptor for accounts.
pub struct AccountKind;

impl EntityKind for AccountKind {
    type Doc = AccountDoc;

    const INDEX_FAMILY: &'static str = "account";

    fn id(doc: &AccountDoc) -> String {
        doc.id.clone()
    }

    fn key(scope: &ScopeId, id: &str) -> ItemKey {
        account_key(scope, id)
    }

    fn project(doc: &AccountDoc, _confidence: f64) -> JsonValue {
        json!({
            "id": doc.id,
            "name": doc.name,
            "plan": doc.plan,
            "suspended": doc.suspended,
            "created_at_ms": doc.metadata.created_at.timestamp_millis(),
        })
    }
}

/// Store for accounts and their sessions.
#[derive(Clone)]
pub struct AccountStore {
    accounts: EntityStore<AccountKind>,
    ctx: StoreContext,
}

impl AccountStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            accounts: EntityStore::new(ctx.clone()),
            ctx,
        }
    }

    /// Create an account. A second create with the same id loses the
    /// not-exists condition and surfaces `Conflict`.
    pub async fn create(
        &self,
        scope: &ScopeId,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Mutation<AccountDoc>> {
        self.accounts
            .create(scope, AccountDoc::new(id, name))
            .await
    }

    pub async fn get(&self, scope: &ScopeId, id: &str) -> Result<AccountDoc> {
        self.accounts.get(scope, id).await
    }

    /// Change the billing plan under an optimistic version check. A stale
    /// version surfaces `Conflict`; callers retry with fresh state.
    pub async fn set_plan(
        &self,
        scope: &ScopeId,
        id: &str,
        plan: impl Into<String>,
    ) -> Result<Mutation<AccountDoc>> {
        let mut doc = self.accounts.get(scope, id).await?;
        let expected_version = doc.version;

        doc.plan = plan.into();
        doc.version += 1;
        doc.metadata.touch();

        self.ctx
            .store
            .update_fields(
                &account_key(scope, id),
                schemas::to_item(&doc)?,
                WriteCondition::FieldEquals {
                    field: "version".into(),
                    value: json!(expected_version),
                },
            )
            .await?;

        let indexing = self.accounts.reindex(scope, &doc);
        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }

    /// Suspend the account, same optimistic discipline as `set_plan`.
    pub async fn suspend(&self, scope: &ScopeId, id: &str) -> Result<Mutation<AccountDoc>> {
        let mut doc = self.accounts.get(scope, id).await?;
        let expected_version = doc.version;

        doc.suspended = true;
        doc.version += 1;
        doc.metadata.touch();

        self.ctx
            .store
            .update_fields(
                &account_key(scope, id),
                schemas::to_item(&doc)?,
                WriteCondition::FieldEquals {
                    field: "version".into(),
                    value: json!(expected_version),
                },
            )
            .await?;

        let indexing = self.accounts.reindex(scope, &doc);
        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }

    /// Issue a session for an existing account.
    pub async fn issue_session(
        &self,
        scope: &ScopeId,
        account_id: &str,
        token_fingerprint: impl Into<String>,
    ) -> Result<SessionDoc> {
        // The account must exist; sessions never outlive their account
        self.accounts.get(scope, account_id).await?;

        let session = SessionDoc::new(account_id, token_fingerprint);
        self.ctx
            .store
            .put(
                &session_key(scope, account_id, &session.session_id),
                schemas::to_item(&session)?,
                WriteCondition::KeyAbsent,
            )
            .await?;

        Ok(session)
    }

    /// Every live session of one account.
    pub async fn list_sessions(&self, scope: &ScopeId, account_id: &str) -> Result<Vec<SessionDoc>> {
        let mut sessions = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = RangeQuery::new(session_partition(scope))
                .with_prefix(session_prefix(account_id))
                .with_limit(self.ctx.settings.batch_size());
            if let Some(after) = after.take() {
                query = query.after(after);
            }

            let page = self.ctx.store.query_range(&query).await?;
            for (_, item) in page.items {
                sessions.push(schemas::from_item(item)?);
            }

            match page.last_key {
                Some(last) => after = Some(last),
                None => break,
            }
        }

        Ok(sessions)
    }

    /// Revoke the account: delete it and every session, in bounded batches
    /// with retry of the unprocessed subset. Idempotent — revoking an
    /// already-revoked account deletes nothing and raises nothing.
    pub async fn revoke(&self, scope: &ScopeId, account_id: &str) -> Result<IndexingTicket> {
        // Enumerate via the session prefix, then delete in batches
        let session_keys: Vec<ItemKey> = self
            .list_sessions(scope, account_id)
            .await?
            .iter()
            .map(|session| session_key(scope, account_id, &session.session_id))
            .collect();

        batch_delete_with_retry(&self.ctx.store, &self.ctx.settings, session_keys).await?;

        self.accounts.delete(scope, account_id).await
    }
}
