//! Engine facade: extraction, seeding, and the reactive stores wired together
//!
//! Data flow: OS alert -> extraction dispatcher -> candidate upsert -> cache
//! invalidation and change events -> the UI confirms a candidate into a
//! transaction, marking it consumed.

use tracing::{debug, warn};

use crate::db::{CandidateUpsert, Database};
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::models::{Alert, CandidateEvent, NewCandidateEvent, NewTransaction, Transaction};
use crate::seed::{self, SeedReport};
use crate::stores::Stores;

pub struct Engine {
    db: Database,
    extractor: Extractor,
    pub stores: Stores,
}

impl Engine {
    pub fn new(db: Database) -> Self {
        Self {
            extractor: Extractor::new(db.clone()),
            stores: Stores::new(db.clone()),
            db,
        }
    }

    /// Run guarantee seeding. Called once at startup; safe to re-run and to
    /// interleave with ordinary rule reads.
    pub fn ensure_seeded(&self) -> SeedReport {
        let report = seed::ensure_seeded(&self.db);
        // Built-ins may have been rewritten underneath the rule caches
        self.stores.rules.invalidate_all();
        self.extractor.clear_compiled();
        report
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Wipe recorded activity (candidates and transactions) while keeping
    /// rules, categories, and sources intact.
    pub async fn reset_activity(&self) -> Result<()> {
        self.db.soft_reset()?;
        self.stores.candidates.invalidate_all();
        self.stores.transactions.invalidate_after_cascade();
        Ok(())
    }

    /// Process one OS alert
    ///
    /// A miss (no rule matched, or only malformed amounts) is a normal
    /// outcome: the alert is discarded silently and `Ok(None)` returned.
    /// A storage failure is surfaced to the caller but leaves the engine
    /// usable; the alert is simply not recorded and may be retried on the
    /// next delivery.
    pub async fn handle_alert(&self, alert: &Alert) -> Result<Option<CandidateUpsert>> {
        let Some(m) = self.extractor.extract(&alert.package_name, &alert.text)? else {
            debug!(package = %alert.package_name, "Alert did not match any rule");
            return Ok(None);
        };

        let new = NewCandidateEvent::from_match(alert, &m);
        match self.stores.candidates.upsert(&new).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                warn!(
                    package = %alert.package_name,
                    "Failed to record candidate event: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Build a transaction draft from a candidate for the confirmation screen
    pub fn transaction_draft(&self, candidate: &CandidateEvent) -> NewTransaction {
        let date = chrono::DateTime::from_timestamp_millis(candidate.source_post_time)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| chrono::Utc::now().date_naive());

        NewTransaction {
            categories: candidate.categories.clone(),
            name: candidate
                .merchant
                .clone()
                .unwrap_or_else(|| candidate.title.clone()),
            amount_cents: candidate.amount_cents,
            date,
            direction: candidate.direction,
            note: candidate.description.clone().unwrap_or_default(),
        }
    }

    /// Turn a candidate event into a real transaction, marking it consumed
    ///
    /// The transaction insert and the `used` flip are one storage
    /// transaction; an already-consumed candidate is rejected.
    pub async fn confirm_candidate(
        &self,
        candidate_id: i64,
        new: &NewTransaction,
    ) -> Result<Transaction> {
        let candidate = self
            .stores
            .candidates
            .query_by_id(candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", candidate_id)))?;
        if candidate.used {
            return Err(Error::InvalidData(format!(
                "Candidate event {} already consumed",
                candidate_id
            )));
        }

        let transaction = self
            .stores
            .transactions
            .insert_from_candidate(new, candidate_id)
            .await?;
        self.stores.candidates.note_consumed(candidate_id).await?;
        Ok(transaction)
    }
}
