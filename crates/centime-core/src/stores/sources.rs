//! Reactive payment source store

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::QueryCache;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ChangeEvent, Source};

use super::EVENT_CHANNEL_CAPACITY;

struct Inner {
    db: Database,
    list: QueryCache<(), Vec<Source>>,
    by_id: QueryCache<i64, Option<Source>>,
    events: broadcast::Sender<ChangeEvent<Source>>,
}

#[derive(Clone)]
pub struct SourceStore {
    inner: Arc<Inner>,
}

impl SourceStore {
    pub fn new(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                list: QueryCache::new(),
                by_id: QueryCache::new(),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<Source>> {
        self.inner.events.subscribe()
    }

    pub async fn query(&self) -> Result<Vec<Source>> {
        let db = self.inner.db.clone();
        self.inner
            .list
            .get_or_compute((), || async move { db.list_sources() })
            .await
    }

    pub async fn query_by_id(&self, id: i64) -> Result<Option<Source>> {
        let db = self.inner.db.clone();
        self.inner
            .by_id
            .get_or_compute(id, || async move { db.get_source(id) })
            .await
    }

    pub async fn upsert(&self, name: &str) -> Result<Source> {
        let source = self.inner.db.upsert_source(name)?;
        self.invalidate_for(source.id);
        self.publish(ChangeEvent::Insert(source.clone()));
        Ok(source)
    }

    pub async fn rename(&self, id: i64, name: &str) -> Result<Source> {
        let source = self.inner.db.rename_source(id, name)?;
        self.invalidate_for(id);
        self.publish(ChangeEvent::Update(source.clone()));
        Ok(source)
    }

    pub async fn delete(&self, id: i64) -> Result<Source> {
        let existing = self
            .inner
            .db
            .get_source(id)?
            .ok_or_else(|| Error::NotFound(format!("Source {}", id)))?;

        self.inner.db.delete_source(id)?;
        self.invalidate_for(id);
        self.publish(ChangeEvent::Delete(existing.clone()));
        Ok(existing)
    }

    fn invalidate_for(&self, id: i64) {
        self.inner.list.invalidate(&());
        self.inner.by_id.invalidate(&id);
    }

    fn publish(&self, event: ChangeEvent<Source>) {
        let _ = self.inner.events.send(event);
    }
}
