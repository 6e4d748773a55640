//! User store
//!
//! Creating a user is one logical action spanning two records: the user row
//! and a claim row per unique identifier. Both go through the bounded
//! all-or-nothing transactional write, so a taken identifier surfaces as a
//! specific `Conflict` and leaves no partial state.

use serde_json::{json, Value as JsonValue};

use super::{EntityKind, EntityStore, IndexingTicket, Mutation, StoreContext};
use crate::db::schemas::engagement::{filter_key, ActionClass};
use crate::db::schemas::user::{
    identifier_key, user_key, IdentifierClaimDoc, UserDoc, IDENTIFIER_FAMILY,
};
use crate::db::{schemas, ConditionalPut, ItemKey, WriteCondition};
use crate::types::{EngineError, Result, ScopeId};

/// Kind descriptor for users.
pub struct UserKind;

impl EntityKind for UserKind {
    type Doc = UserDoc;

    const INDEX_FAMILY: &'static str = "user";

    fn id(doc: &UserDoc) -> String {
        doc.id.clone()
    }

    fn key(scope: &ScopeId, id: &str) -> ItemKey {
        user_key(scope, id)
    }

    fn project(doc: &UserDoc, _confidence: f64) -> JsonValue {
        json!({
            "id": doc.id,
            "display_name": doc.display_name,
            "identifier": doc.identifier,
            "is_active": doc.is_active,
            "created_at_ms": doc.metadata.created_at.timestamp_millis(),
        })
    }
}

/// Store for users and their unique identifier claims.
#[derive(Clone)]
pub struct UserStore {
    users: EntityStore<UserKind>,
    ctx: StoreContext,
}

impl UserStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            users: EntityStore::new(ctx.clone()),
            ctx,
        }
    }

    /// Create a user and claim their identifier, all-or-nothing.
    pub async fn create(
        &self,
        scope: &ScopeId,
        id: impl Into<String>,
        display_name: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Result<Mutation<UserDoc>> {
        let doc = UserDoc::new(id, display_name, identifier);
        if doc.identifier.trim().is_empty() {
            return Err(EngineError::Validation("identifier must not be empty".into()));
        }
        let claim = IdentifierClaimDoc::new(&doc.identifier, &doc.id);

        let puts = vec![
            ConditionalPut {
                key: user_key(scope, &doc.id),
                item: schemas::to_item(&doc)?,
                condition: WriteCondition::KeyAbsent,
            },
            ConditionalPut {
                key: identifier_key(scope, &doc.identifier),
                item: schemas::to_item(&claim)?,
                condition: WriteCondition::KeyAbsent,
            },
        ];

        self.ctx
            .store
            .transact_put(puts)
            .await
            .map_err(|e| match e {
                // Surface the identifier clash as an actionable message,
                // distinct from a generic failure
                EngineError::Conflict(msg) if msg.contains(IDENTIFIER_FAMILY) => {
                    EngineError::Conflict(format!("identifier already taken: {}", doc.identifier))
                }
                other => other,
            })?;

        let indexing = self.users.reindex(scope, &doc);
        Ok(Mutation {
            entity: doc,
            indexing,
        })
    }

    pub async fn get(&self, scope: &ScopeId, id: &str) -> Result<UserDoc> {
        self.users.get(scope, id).await
    }

    /// Resolve an identifier through its claim row, then hydrate the user.
    pub async fn find_by_identifier(&self, scope: &ScopeId, identifier: &str) -> Result<UserDoc> {
        let claim_item = self
            .ctx
            .store
            .get(&identifier_key(scope, identifier))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("identifier {identifier}")))?;

        let claim: IdentifierClaimDoc = schemas::from_item(claim_item)?;
        self.users.get(scope, &claim.user_id).await
    }

    /// Delete a user, releasing the identifier claim and dropping the
    /// actor's membership filters. Idempotent on retries.
    pub async fn delete(&self, scope: &ScopeId, id: &str) -> Result<IndexingTicket> {
        let Some(doc) = self.users.try_get(scope, id).await? else {
            return Ok(IndexingTicket::completed());
        };

        let mut keys = vec![identifier_key(scope, &doc.identifier)];
        for action in [ActionClass::Vote, ActionClass::Fund, ActionClass::Express] {
            keys.push(filter_key(scope, id, action));
        }
        super::batch_delete_with_retry(&self.ctx.store, &self.ctx.settings, keys).await?;

        self.users.delete(scope, id).await
    }
}
