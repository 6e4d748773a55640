//! Engagement store: votes, funds, expressions
//!
//! The idempotent action pipeline. Before any side effect, the actor's
//! membership filter answers "has this actor already acted on this
//! target" — a `false` from the filter's insert gate skips everything and
//! returns the prior state unchanged (repeat-click safety). The filter
//! write is version-conditioned so a concurrent duplicate submission loses
//! the condition instead of double-counting; the engagement row, created
//! with a not-exists condition, is the durable record of acceptance.

use serde_json::json;

use super::comment::CommentStore;
use super::idea::IdeaStore;
use super::{IndexingTicket, StoreContext};
use crate::db::schemas::comment::CommentDoc;
use crate::db::schemas::engagement::{
    engagement_key, filter_key, ActionClass, ActionFilterDoc, EngagementDoc,
};
use crate::db::schemas::idea::{
    IdeaDoc, FIELD_FUNDED_AMOUNT, FIELD_REACTION_COUNT, FIELD_VOTES_DOWN, FIELD_VOTES_UP,
};
use crate::db::{schemas, WriteCondition};
use crate::types::{EngineError, Result, ScopeId};

/// Result of a guarded action.
///
/// `accepted == false` means the action was recognized as a repeat (filter
/// hit or a lost race on the durable row): `entity` is the prior, unchanged
/// state and the ticket is already resolved.
#[derive(Debug)]
pub struct ActionOutcome<T> {
    pub accepted: bool,
    pub entity: T,
    pub indexing: IndexingTicket,
}

/// Store for guarded engagement actions.
#[derive(Clone)]
pub struct EngagementStore {
    ideas: IdeaStore,
    comments: CommentStore,
    ctx: StoreContext,
}

impl EngagementStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ideas: IdeaStore::new(ctx.clone()),
            comments: CommentStore::new(ctx.clone()),
            ctx,
        }
    }

    /// Vote on an idea. One vote per actor per idea, ever.
    pub async fn vote_idea(
        &self,
        scope: &ScopeId,
        actor_id: &str,
        idea_id: &str,
        up: bool,
    ) -> Result<ActionOutcome<IdeaDoc>> {
        // Target must exist before any guard state is touched
        let current = self.ideas.get(scope, idea_id).await?;

        let accepted = self.pass_filter(scope, actor_id, ActionClass::Vote, idea_id).await?
            && self
                .record_action(
                    scope,
                    EngagementDoc::new(actor_id, idea_id, ActionClass::Vote, if up { 1 } else { -1 }),
                )
                .await?;

        if !accepted {
            return Ok(ActionOutcome {
                accepted: false,
                entity: current,
                indexing: IndexingTicket::completed(),
            });
        }

        let field = if up { FIELD_VOTES_UP } else { FIELD_VOTES_DOWN };
        let mutation = self.ideas.bump_tallies(scope, idea_id, &[(field, 1)]).await?;

        Ok(ActionOutcome {
            accepted: true,
            entity: mutation.entity,
            indexing: mutation.indexing,
        })
    }

    /// Fund an idea. One funding action per actor per idea.
    pub async fn fund_idea(
        &self,
        scope: &ScopeId,
        actor_id: &str,
        idea_id: &str,
        amount: i64,
    ) -> Result<ActionOutcome<IdeaDoc>> {
        if amount <= 0 {
            return Err(EngineError::Validation(format!(
                "funding amount must be positive, got {amount}"
            )));
        }

        let current = self.ideas.get(scope, idea_id).await?;

        let accepted = self.pass_filter(scope, actor_id, ActionClass::Fund, idea_id).await?
            && self
                .record_action(
                    scope,
                    EngagementDoc::new(actor_id, idea_id, ActionClass::Fund, amount),
                )
                .await?;

        if !accepted {
            return Ok(ActionOutcome {
                accepted: false,
                entity: current,
                indexing: IndexingTicket::completed(),
            });
        }

        let mutation = self
            .ideas
            .bump_tallies(scope, idea_id, &[(FIELD_FUNDED_AMOUNT, amount)])
            .await?;

        Ok(ActionOutcome {
            accepted: true,
            entity: mutation.entity,
            indexing: mutation.indexing,
        })
    }

    /// React to an idea. One reaction per actor per idea.
    pub async fn express_on_idea(
        &self,
        scope: &ScopeId,
        actor_id: &str,
        idea_id: &str,
    ) -> Result<ActionOutcome<IdeaDoc>> {
        let current = self.ideas.get(scope, idea_id).await?;

        let accepted = self
            .pass_filter(scope, actor_id, ActionClass::Express, idea_id)
            .await?
            && self
                .record_action(
                    scope,
                    EngagementDoc::new(actor_id, idea_id, ActionClass::Express, 1),
                )
                .await?;

        if !accepted {
            return Ok(ActionOutcome {
                accepted: false,
                entity: current,
                indexing: IndexingTicket::completed(),
            });
        }

        let mutation = self
            .ideas
            .bump_tallies(scope, idea_id, &[(FIELD_REACTION_COUNT, 1)])
            .await?;

        Ok(ActionOutcome {
            accepted: true,
            entity: mutation.entity,
            indexing: mutation.indexing,
        })
    }

    /// Vote on a comment. The index side takes the incremental delta path.
    pub async fn vote_comment(
        &self,
        scope: &ScopeId,
        actor_id: &str,
        idea_id: &str,
        comment_id: &str,
        up: bool,
    ) -> Result<ActionOutcome<CommentDoc>> {
        let current = self.comments.get(scope, idea_id, comment_id).await?;
        let target = format!("{idea_id}#{comment_id}");

        let accepted = self.pass_filter(scope, actor_id, ActionClass::Vote, &target).await?
            && self
                .record_action(
                    scope,
                    EngagementDoc::new(actor_id, &target, ActionClass::Vote, if up { 1 } else { -1 }),
                )
                .await?;

        if !accepted {
            return Ok(ActionOutcome {
                accepted: false,
                entity: current,
                indexing: IndexingTicket::completed(),
            });
        }

        let mutation = self.comments.apply_vote(scope, idea_id, comment_id, up).await?;
        Ok(ActionOutcome {
            accepted: true,
            entity: mutation.entity,
            indexing: mutation.indexing,
        })
    }

    /// Every recorded action of one class on one target, in actor order.
    /// Served straight from the record store's engagement rows; this family
    /// has no index projection to consult.
    pub async fn list_actions(
        &self,
        scope: &ScopeId,
        action: ActionClass,
        target_id: &str,
    ) -> Result<Vec<EngagementDoc>> {
        use crate::db::schemas::engagement::{engagement_prefix, ENGAGEMENT_FAMILY};
        use crate::db::RangeQuery;

        let mut actions = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = RangeQuery::new(schemas::partition(scope, ENGAGEMENT_FAMILY))
                .with_prefix(engagement_prefix(action, target_id))
                .with_limit(self.ctx.settings.batch_size());
            if let Some(after) = after.take() {
                query = query.after(after);
            }

            let page = self.ctx.store.query_range(&query).await?;
            for (_, item) in page.items {
                let doc: EngagementDoc = schemas::from_item(item)?;
                // The sort prefix also covers comment targets nested under
                // this idea; keep exact matches only
                if doc.target_id == target_id {
                    actions.push(doc);
                }
            }

            match page.last_key {
                Some(last) => after = Some(last),
                None => break,
            }
        }

        Ok(actions)
    }

    /// Run the membership-filter gate for one `(actor, class, target)`.
    ///
    /// Returns `false` when the actor already acted on this target (or a
    /// filter false positive collided — acceptable, the action is
    /// idempotent). The filter write carries an expected-version condition;
    /// a lost race reloads once, then surfaces `Conflict`.
    async fn pass_filter(
        &self,
        scope: &ScopeId,
        actor_id: &str,
        action: ActionClass,
        target: &str,
    ) -> Result<bool> {
        let key = filter_key(scope, actor_id, action);

        for attempt in 0..2 {
            let (mut doc, existed) = match self.ctx.store.get(&key).await? {
                Some(item) => (schemas::from_item::<ActionFilterDoc>(item)?, true),
                None => (ActionFilterDoc::new(actor_id, action), false),
            };

            let expected_version = doc.version;
            let mut filter = doc.filter()?;

            // The single gate: not newly added means skip all side effects
            if !filter.insert(target.as_bytes()) {
                return Ok(false);
            }
            doc.set_filter(&filter);

            let condition = if existed {
                WriteCondition::FieldEquals {
                    field: "version".into(),
                    value: json!(expected_version),
                }
            } else {
                WriteCondition::KeyAbsent
            };

            match self
                .ctx
                .store
                .put(&key, schemas::to_item(&doc)?, condition)
                .await
            {
                Ok(()) => return Ok(true),
                Err(EngineError::Conflict(_)) if attempt == 0 => {
                    // Concurrent submission won; reload and re-check
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Conflict(format!(
            "concurrent {} submissions for actor {actor_id}",
            action.as_str()
        )))
    }

    /// Write the durable engagement row. `false` means another writer
    /// already recorded this action (filter raced across processes).
    async fn record_action(&self, scope: &ScopeId, doc: EngagementDoc) -> Result<bool> {
        let key = engagement_key(scope, doc.action, &doc.target_id, &doc.actor_id);
        match self
            .ctx
            .store
            .put(&key, schemas::to_item(&doc)?, WriteCondition::KeyAbsent)
            .await
        {
            Ok(()) => Ok(true),
            Err(EngineError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testutil::{memory_context, scope};

    async fn idea(ctx: &StoreContext) -> String {
        let ideas = IdeaStore::new(ctx.clone());
        let created = ideas
            .create(&scope(), "author", "Idea", "body", vec![])
            .await
            .unwrap();
        created.indexing.wait().await.unwrap();
        created.entity.id.clone()
    }

    #[tokio::test]
    async fn test_double_vote_counts_once() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        let first = store
            .vote_idea(&scope(), "user-1", &idea_id, true)
            .await
            .unwrap();
        assert!(first.accepted);
        assert_eq!(first.entity.votes_up, 1);

        let second = store
            .vote_idea(&scope(), "user-1", &idea_id, true)
            .await
            .unwrap();
        assert!(!second.accepted);
        // Prior state returned unchanged, not an error
        assert_eq!(second.entity.votes_up, 1);
        second.indexing.wait().await.unwrap();

        let ideas = IdeaStore::new(ctx);
        assert_eq!(ideas.get(&scope(), &idea_id).await.unwrap().votes_up, 1);
    }

    #[tokio::test]
    async fn test_flip_flop_vote_still_counts_once() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        store
            .vote_idea(&scope(), "user-1", &idea_id, false)
            .await
            .unwrap();
        // Same actor, same target, opposite direction: still a repeat
        let flip = store
            .vote_idea(&scope(), "user-1", &idea_id, true)
            .await
            .unwrap();
        assert!(!flip.accepted);

        let doc = IdeaStore::new(ctx).get(&scope(), &idea_id).await.unwrap();
        assert_eq!((doc.votes_up, doc.votes_down), (0, 1));
    }

    #[tokio::test]
    async fn test_distinct_actors_all_count() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        for i in 0..5 {
            let outcome = store
                .vote_idea(&scope(), &format!("user-{i}"), &idea_id, true)
                .await
                .unwrap();
            assert!(outcome.accepted);
        }

        let doc = IdeaStore::new(ctx).get(&scope(), &idea_id).await.unwrap();
        assert_eq!(doc.votes_up, 5);
    }

    #[tokio::test]
    async fn test_fund_accumulates_across_actors_once_each() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        assert!(store.fund_idea(&scope(), "user-1", &idea_id, 100).await.unwrap().accepted);
        assert!(store.fund_idea(&scope(), "user-2", &idea_id, 250).await.unwrap().accepted);
        // Retry from user-1 is dropped
        assert!(!store.fund_idea(&scope(), "user-1", &idea_id, 999).await.unwrap().accepted);

        let doc = IdeaStore::new(ctx).get(&scope(), &idea_id).await.unwrap();
        assert_eq!(doc.funded_amount, 350);
    }

    #[tokio::test]
    async fn test_list_actions_enumerates_target() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        store.fund_idea(&scope(), "user-1", &idea_id, 100).await.unwrap();
        store.fund_idea(&scope(), "user-2", &idea_id, 250).await.unwrap();
        store.vote_idea(&scope(), "user-1", &idea_id, true).await.unwrap();

        let funds = store
            .list_actions(&scope(), ActionClass::Fund, &idea_id)
            .await
            .unwrap();
        assert_eq!(funds.len(), 2);
        assert_eq!(funds.iter().map(|a| a.value).sum::<i64>(), 350);

        let votes = store
            .list_actions(&scope(), ActionClass::Vote, &idea_id)
            .await
            .unwrap();
        assert_eq!(votes.len(), 1);
    }

    #[tokio::test]
    async fn test_fund_rejects_nonpositive_amount() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        let err = store
            .fund_idea(&scope(), "user-1", &idea_id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_action_classes_guard_independently() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        // Same actor, same target, three different classes: all accepted
        assert!(store.vote_idea(&scope(), "user-1", &idea_id, true).await.unwrap().accepted);
        assert!(store.fund_idea(&scope(), "user-1", &idea_id, 50).await.unwrap().accepted);
        assert!(store.express_on_idea(&scope(), "user-1", &idea_id).await.unwrap().accepted);

        let doc = IdeaStore::new(ctx).get(&scope(), &idea_id).await.unwrap();
        assert_eq!(doc.votes_up, 1);
        assert_eq!(doc.funded_amount, 50);
        assert_eq!(doc.reaction_count, 1);
    }

    #[tokio::test]
    async fn test_idea_and_comment_votes_are_distinct_targets() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx.clone());
        let comments = CommentStore::new(ctx.clone());
        let idea_id = idea(&ctx).await;

        let comment = comments
            .create(&scope(), &idea_id, "author", None, "hello")
            .await
            .unwrap();
        comment.indexing.wait().await.unwrap();
        let comment_id = comment.entity.id.clone();

        assert!(store.vote_idea(&scope(), "user-1", &idea_id, true).await.unwrap().accepted);
        let on_comment = store
            .vote_comment(&scope(), "user-1", &idea_id, &comment_id, true)
            .await
            .unwrap();
        assert!(on_comment.accepted);
        assert_eq!(on_comment.entity.votes_up, 1);

        // Repeat on the comment is dropped
        let repeat = store
            .vote_comment(&scope(), "user-1", &idea_id, &comment_id, true)
            .await
            .unwrap();
        assert!(!repeat.accepted);
        assert_eq!(repeat.entity.votes_up, 1);
    }

    #[tokio::test]
    async fn test_filter_state_survives_process_restart() {
        let ctx = memory_context();
        let idea_id = idea(&ctx).await;

        let store = EngagementStore::new(ctx.clone());
        assert!(store.vote_idea(&scope(), "user-1", &idea_id, true).await.unwrap().accepted);

        // A fresh store over the same record store sees the persisted filter
        let restarted = EngagementStore::new(ctx.clone());
        let repeat = restarted
            .vote_idea(&scope(), "user-1", &idea_id, true)
            .await
            .unwrap();
        assert!(!repeat.accepted);
    }

    #[tokio::test]
    async fn test_vote_on_missing_idea_is_not_found() {
        let ctx = memory_context();
        let store = EngagementStore::new(ctx);
        let err = store
            .vote_idea(&scope(), "user-1", "ghost", true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
