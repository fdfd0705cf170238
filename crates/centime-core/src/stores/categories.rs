//! Reactive category store

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::QueryCache;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Category, ChangeEvent};

use super::{TransactionStore, EVENT_CHANNEL_CAPACITY};

struct Inner {
    db: Database,
    list: QueryCache<(), Vec<Category>>,
    by_id: QueryCache<i64, Option<Category>>,
    events: broadcast::Sender<ChangeEvent<Category>>,
    transactions: TransactionStore,
}

#[derive(Clone)]
pub struct CategoryStore {
    inner: Arc<Inner>,
}

impl CategoryStore {
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

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<Category>> {
        self.inner.events.subscribe()
    }

    pub async fn query(&self) -> Result<Vec<Category>> {
        let db = self.inner.db.clone();
        self.inner
            .list
            .get_or_compute((), || async move { db.list_categories() })
            .await
    }

    pub async fn query_by_id(&self, id: i64) -> Result<Option<Category>> {
        let db = self.inner.db.clone();
        self.inner
            .by_id
            .get_or_compute(id, || async move { db.get_category(id) })
            .await
    }

    pub async fn upsert(&self, name: &str) -> Result<Category> {
        let category = self.inner.db.upsert_category(name)?;
        self.invalidate_for(category.id);
        self.publish(ChangeEvent::Insert(category.clone()));
        Ok(category)
    }

    pub async fn rename(&self, id: i64, name: &str) -> Result<Category> {
        let category = self.inner.db.rename_category(id, name)?;
        self.invalidate_for(id);
        self.publish(ChangeEvent::Update(category.clone()));
        Ok(category)
    }

    /// Delete a category. Junction rows cascade, so transaction caches
    /// holding the old category lists are invalidated too.
    pub async fn delete(&self, id: i64) -> Result<Category> {
        let existing = self
            .inner
            .db
            .get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("Category {}", id)))?;

        self.inner.db.delete_category(id)?;
        self.invalidate_for(id);
        self.inner.transactions.invalidate_after_cascade();
        self.publish(ChangeEvent::Delete(existing.clone()));
        Ok(existing)
    }

    fn invalidate_for(&self, id: i64) {
        self.inner.list.invalidate(&());
        self.inner.by_id.invalidate(&id);
    }

    fn publish(&self, event: ChangeEvent<Category>) {
        let _ = self.inner.events.send(event);
    }
}
