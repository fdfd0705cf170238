//! Reactive cache layer
//!
//! One store per entity type wraps the database access layer with memoized
//! single-flight queries, per- and cross-entity invalidation, and a broadcast
//! change-event stream. The stores hold no authoritative state; everything
//! cached is an invalidatable projection of the database.
//!
//! Change events fire after the underlying write and cache invalidation have
//! succeeded, never before. Multiple subscribers may attach; each sees events
//! in write order.

use crate::db::Database;

mod candidates;
mod categories;
mod rules;
mod sources;
mod transactions;

pub use candidates::CandidateStore;
pub use categories::CategoryStore;
pub use rules::RuleStore;
pub use sources::SourceStore;
pub use transactions::TransactionStore;

/// Broadcast buffer per store; a lagging subscriber loses oldest events
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The full set of entity stores over one database
///
/// Explicitly constructed with process-wide lifetime; stores are cheap clones
/// of shared inner state, so one authoritative cache exists per entity type.
#[derive(Clone)]
pub struct Stores {
    pub transactions: TransactionStore,
    pub candidates: CandidateStore,
    pub rules: RuleStore,
    pub categories: CategoryStore,
    pub sources: SourceStore,
}

impl Stores {
    pub fn new(db: Database) -> Self {
        // Transactions first: sibling stores invalidate its caches when their
        // deletions cascade.
        let transactions = TransactionStore::new(db.clone());
        let candidates = CandidateStore::new(db.clone(), transactions.clone());
        let rules = RuleStore::new(db.clone(), transactions.clone());
        let categories = CategoryStore::new(db.clone(), transactions.clone());
        let sources = SourceStore::new(db);

        Self {
            transactions,
            candidates,
            rules,
            categories,
            sources,
        }
    }
}
