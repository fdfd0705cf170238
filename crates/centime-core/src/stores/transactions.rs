//! Reactive transaction store

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::QueryCache;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ChangeEvent, NewTransaction, Transaction};

use super::EVENT_CHANNEL_CAPACITY;

struct Inner {
    db: Database,
    list: QueryCache<(), Vec<Transaction>>,
    by_id: QueryCache<i64, Option<Transaction>>,
    by_category: QueryCache<i64, Vec<Transaction>>,
    events: broadcast::Sender<ChangeEvent<Transaction>>,
}

/// Memoized, change-publishing view over the transaction table
#[derive(Clone)]
pub struct TransactionStore {
    inner: Arc<Inner>,
}

impl TransactionStore {
    pub fn new(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                list: QueryCache::new(),
                by_id: QueryCache::new(),
                by_category: QueryCache::new(),
                events,
            }),
        }
    }

    /// Subscribe to change events. Each subscriber sees events in write order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<Transaction>> {
        self.inner.events.subscribe()
    }

    pub async fn query(&self) -> Result<Vec<Transaction>> {
        let db = self.inner.db.clone();
        self.inner
            .list
            .get_or_compute((), || async move { db.list_transactions() })
            .await
    }

    pub async fn query_by_id(&self, id: i64) -> Result<Option<Transaction>> {
        let db = self.inner.db.clone();
        self.inner
            .by_id
            .get_or_compute(id, || async move { db.get_transaction(id) })
            .await
    }

    pub async fn query_by_category(&self, category_id: i64) -> Result<Vec<Transaction>> {
        let db = self.inner.db.clone();
        self.inner
            .by_category
            .get_or_compute(category_id, || async move {
                db.list_transactions_by_category(category_id)
            })
            .await
    }

    pub async fn insert(&self, new: &NewTransaction) -> Result<Transaction> {
        let transaction = self.inner.db.insert_transaction(new)?;
        self.invalidate_for(&transaction);
        self.publish(ChangeEvent::Insert(transaction.clone()));
        Ok(transaction)
    }

    /// Insert a transaction derived from a candidate event
    ///
    /// The back-reference stamp and the candidate's `used` flip happen in one
    /// storage transaction. The candidate store is refreshed separately by the
    /// engine facade.
    pub async fn insert_from_candidate(
        &self,
        new: &NewTransaction,
        candidate_id: i64,
    ) -> Result<Transaction> {
        let transaction = self
            .inner
            .db
            .insert_transaction_from_candidate(new, candidate_id)?;
        self.invalidate_for(&transaction);
        self.publish(ChangeEvent::Insert(transaction.clone()));
        Ok(transaction)
    }

    pub async fn update(&self, transaction: &Transaction) -> Result<Transaction> {
        // The previous category set also needs invalidating
        let before = self.inner.db.get_transaction(transaction.id)?;

        let stored = self.inner.db.update_transaction(transaction)?;
        if let Some(before) = before {
            self.invalidate_for(&before);
        }
        self.invalidate_for(&stored);
        self.publish(ChangeEvent::Update(stored.clone()));
        Ok(stored)
    }

    pub async fn delete(&self, id: i64) -> Result<Transaction> {
        let existing = self
            .inner
            .db
            .get_transaction(id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;

        self.inner.db.delete_transaction(id)?;
        self.invalidate_for(&existing);
        self.publish(ChangeEvent::Delete(existing.clone()));
        Ok(existing)
    }

    fn invalidate_for(&self, transaction: &Transaction) {
        self.inner.list.invalidate(&());
        self.inner.by_id.invalidate(&transaction.id);
        for category_id in &transaction.categories {
            self.inner.by_category.invalidate(category_id);
        }
    }

    /// Clear every cache. Called by sibling stores whose deletions may have
    /// cascaded into transactions (rule delete, candidate delete, category
    /// delete).
    pub(crate) fn invalidate_after_cascade(&self) {
        self.inner.list.invalidate_all();
        self.inner.by_id.invalidate_all();
        self.inner.by_category.invalidate_all();
    }

    fn publish(&self, event: ChangeEvent<Transaction>) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}
