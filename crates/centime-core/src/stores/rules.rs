//! Reactive notification rule store

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::QueryCache;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ChangeEvent, Direction, MatchPattern, NotificationRule, RuleWithPatterns};

use super::{TransactionStore, EVENT_CHANNEL_CAPACITY};

struct Inner {
    db: Database,
    list: QueryCache<(), Vec<RuleWithPatterns>>,
    by_id: QueryCache<String, Option<RuleWithPatterns>>,
    events: broadcast::Sender<ChangeEvent<NotificationRule>>,
    transactions: TransactionStore,
}

/// Memoized, change-publishing view over notification rules
#[derive(Clone)]
pub struct RuleStore {
    inner: Arc<Inner>,
}

impl RuleStore {
    pub fn new(db: Database, transactions: TransactionStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                list: QueryCache::new(),
                by_id: QueryCache::new(),
                events,
                transactions,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<NotificationRule>> {
        self.inner.events.subscribe()
    }

    pub async fn query(&self) -> Result<Vec<RuleWithPatterns>> {
        let db = self.inner.db.clone();
        self.inner
            .list
            .get_or_compute((), || async move { db.list_rules() })
            .await
    }

    pub async fn query_by_id(&self, id: &str) -> Result<Option<RuleWithPatterns>> {
        let db = self.inner.db.clone();
        let id_owned = id.to_string();
        self.inner
            .by_id
            .get_or_compute(id.to_string(), || async move {
                db.get_rule_with_patterns(&id_owned)
            })
            .await
    }

    pub async fn create(
        &self,
        name: &str,
        direction: Direction,
        scope: &[String],
        patterns: &[String],
    ) -> Result<RuleWithPatterns> {
        let created = self.inner.db.create_rule(name, direction, scope, patterns)?;
        self.invalidate_for(&created.rule.id);
        self.publish(ChangeEvent::Insert(created.rule.clone()));
        Ok(created)
    }

    /// Persist a user edit. Editing a system rule taints it permanently.
    pub async fn update(&self, rule: &NotificationRule) -> Result<NotificationRule> {
        let stored = self.inner.db.update_rule(rule)?;
        self.invalidate_for(&stored.id);
        self.publish(ChangeEvent::Update(stored.clone()));
        Ok(stored)
    }

    /// Replace a rule's pattern set (user edit path; taints system rules)
    pub async fn replace_patterns(
        &self,
        rule_id: &str,
        texts: &[String],
    ) -> Result<Vec<MatchPattern>> {
        let patterns = self.inner.db.replace_rule_patterns(rule_id, texts)?;
        self.invalidate_for(rule_id);
        if let Some(rule) = self.inner.db.get_rule(rule_id)? {
            self.publish(ChangeEvent::Update(rule));
        }
        Ok(patterns)
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<NotificationRule> {
        let stored = self.inner.db.set_rule_enabled(rule_id, enabled)?;
        self.invalidate_for(rule_id);
        self.publish(ChangeEvent::Update(stored.clone()));
        Ok(stored)
    }

    /// Delete a rule and its patterns. Deletions may cascade into
    /// transactions in the store, so those caches are invalidated too.
    pub async fn delete(&self, rule_id: &str) -> Result<NotificationRule> {
        let existing = self
            .inner
            .db
            .get_rule(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("Rule {}", rule_id)))?;

        self.inner.db.delete_rule(rule_id)?;
        self.invalidate_for(rule_id);
        self.inner.transactions.invalidate_after_cascade();
        self.publish(ChangeEvent::Delete(existing.clone()));
        Ok(existing)
    }

    /// Clear all rule caches. Called after guarantee seeding rewrites
    /// built-ins underneath the store.
    pub(crate) fn invalidate_all(&self) {
        self.inner.list.invalidate_all();
        self.inner.by_id.invalidate_all();
    }

    fn invalidate_for(&self, rule_id: &str) {
        self.inner.list.invalidate(&());
        self.inner.by_id.invalidate(&rule_id.to_string());
    }

    fn publish(&self, event: ChangeEvent<NotificationRule>) {
        let _ = self.inner.events.send(event);
    }
}
