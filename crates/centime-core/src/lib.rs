//! Centime Core Library
//!
//! Shared functionality for the Centime personal finance tracker:
//! - Database access and migrations
//! - Notification rule catalog and regex extraction dispatcher
//! - Guarantee seeder for built-in vendor rules
//! - Candidate event dedup/consumption store
//! - Reactive cache layer with single-flight queries and change-event streams
//! - Engine facade tying alert handling to candidate confirmation

pub mod cache;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod seed;
pub mod stores;

pub use cache::QueryCache;
pub use db::{CandidateUpsert, Database, SystemRuleUpsert};
pub use error::{Error, Result};
pub use extract::{parse_amount_cents, Extractor, COMMON_MAIL_PACKAGES};
pub use models::{
    Alert, CandidateEvent, Category, ChangeEvent, Direction, MatchPattern, NewCandidateEvent,
    NewTransaction, NotificationRule, RuleWithPatterns, Source, StructuredMatch, Transaction,
};
pub use pipeline::Engine;
pub use seed::{ensure_seeded, BuiltinRule, SeedReport, BUILTIN_RULES};
pub use stores::{
    CandidateStore, CategoryStore, RuleStore, SourceStore, Stores, TransactionStore,
};
