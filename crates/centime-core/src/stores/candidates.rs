//! Reactive candidate event store (dedup/consumption)

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::QueryCache;
use crate::db::{CandidateUpsert, Database};
use crate::error::{Error, Result};
use crate::models::{CandidateEvent, ChangeEvent, NewCandidateEvent};

use super::{TransactionStore, EVENT_CHANNEL_CAPACITY};

struct Inner {
    db: Database,
    list: QueryCache<(), Vec<CandidateEvent>>,
    unused: QueryCache<(), Vec<CandidateEvent>>,
    by_id: QueryCache<i64, Option<CandidateEvent>>,
    by_key: QueryCache<String, Vec<CandidateEvent>>,
    events: broadcast::Sender<ChangeEvent<CandidateEvent>>,
    transactions: TransactionStore,
}

/// Memoized, change-publishing view over candidate events
#[derive(Clone)]
pub struct CandidateStore {
    inner: Arc<Inner>,
}

impl CandidateStore {
    pub fn new(db: Database, transactions: TransactionStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                list: QueryCache::new(),
                unused: QueryCache::new(),
                by_id: QueryCache::new(),
                by_key: QueryCache::new(),
                events,
                transactions,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<CandidateEvent>> {
        self.inner.events.subscribe()
    }

    pub async fn query(&self) -> Result<Vec<CandidateEvent>> {
        let db = self.inner.db.clone();
        self.inner
            .list
            .get_or_compute((), || async move { db.list_candidates() })
            .await
    }

    /// Candidates awaiting user confirmation. Consumed events never appear.
    pub async fn query_unused(&self) -> Result<Vec<CandidateEvent>> {
        let db = self.inner.db.clone();
        self.inner
            .unused
            .get_or_compute((), || async move { db.list_unused_candidates() })
            .await
    }

    pub async fn query_by_id(&self, id: i64) -> Result<Option<CandidateEvent>> {
        let db = self.inner.db.clone();
        self.inner
            .by_id
            .get_or_compute(id, || async move { db.get_candidate(id) })
            .await
    }

    pub async fn query_by_notification_key(&self, key: &str) -> Result<Vec<CandidateEvent>> {
        let db = self.inner.db.clone();
        let key_owned = key.to_string();
        self.inner
            .by_key
            .get_or_compute(key.to_string(), || async move {
                db.list_candidates_by_notification_key(&key_owned)
            })
            .await
    }

    /// Upsert an extraction result by its identity key
    ///
    /// A redelivered alert updates the existing row rather than duplicating
    /// it; the `used` flag is never reset by the merge.
    pub async fn upsert(&self, new: &NewCandidateEvent) -> Result<CandidateUpsert> {
        let outcome = self.inner.db.upsert_candidate(new)?;

        let event = outcome.event().clone();
        self.invalidate_for(&event);
        match &outcome {
            CandidateUpsert::Inserted(_) => self.publish(ChangeEvent::Insert(event)),
            CandidateUpsert::Updated(_) => self.publish(ChangeEvent::Update(event)),
        }
        Ok(outcome)
    }

    /// Flip `used` to true. Consuming an already-consumed event is a no-op:
    /// the stored state is returned unchanged and no event is published.
    pub async fn mark_consumed(&self, id: i64) -> Result<CandidateEvent> {
        let existing = self
            .inner
            .db
            .get_candidate(id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", id)))?;
        if existing.used {
            debug!(id, "Candidate already consumed");
            return Ok(existing);
        }

        let updated = self.inner.db.mark_candidate_used(id)?;
        self.invalidate_for(&updated);
        self.publish(ChangeEvent::Update(updated.clone()));
        Ok(updated)
    }

    /// Re-read and republish a candidate whose `used` flag was flipped as part
    /// of a transaction-creation write (engine facade path)
    pub(crate) async fn note_consumed(&self, id: i64) -> Result<CandidateEvent> {
        let event = self
            .inner
            .db
            .get_candidate(id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", id)))?;
        self.invalidate_for(&event);
        self.publish(ChangeEvent::Update(event.clone()));
        Ok(event)
    }

    pub async fn set_categories(&self, id: i64, categories: &[i64]) -> Result<CandidateEvent> {
        let updated = self.inner.db.set_candidate_categories(id, categories)?;
        self.invalidate_for(&updated);
        self.publish(ChangeEvent::Update(updated.clone()));
        Ok(updated)
    }

    /// Delete a candidate. Referencing transactions cascade in the store, so
    /// the transaction caches are invalidated as well.
    pub async fn delete(&self, id: i64) -> Result<CandidateEvent> {
        let existing = self
            .inner
            .db
            .get_candidate(id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", id)))?;

        self.inner.db.delete_candidate(id)?;
        self.invalidate_for(&existing);
        self.inner.transactions.invalidate_after_cascade();
        self.publish(ChangeEvent::Delete(existing.clone()));
        Ok(existing)
    }

    /// Clear all candidate caches. Called when activity tables are wiped
    /// underneath the store.
    pub(crate) fn invalidate_all(&self) {
        self.inner.list.invalidate_all();
        self.inner.unused.invalidate_all();
        self.inner.by_id.invalidate_all();
        self.inner.by_key.invalidate_all();
    }

    fn invalidate_for(&self, event: &CandidateEvent) {
        self.inner.list.invalidate(&());
        self.inner.unused.invalidate(&());
        self.inner.by_id.invalidate(&event.id);
        self.inner
            .by_key
            .invalidate(&event.source_notification_key);
    }

    fn publish(&self, event: ChangeEvent<CandidateEvent>) {
        let _ = self.inner.events.send(event);
    }
}
