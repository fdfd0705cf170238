//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `rules` - Notification rule, scope, and match pattern operations
//! - `candidates` - Candidate event dedup/consumption store
//! - `transactions` - Transaction CRUD and category associations
//! - `categories` - Spending category operations
//! - `sources` - Payment source operations

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod candidates;
mod categories;
mod rules;
mod sources;
mod transactions;

#[cfg(test)]
mod tests;

pub use candidates::CandidateUpsert;
pub use rules::SystemRuleUpsert;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "CENTIME_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the
/// same key, regardless of database path. This allows moving/renaming/restoring
/// the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"centime-salt-v01";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `CENTIME_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `CENTIME_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use an unencrypted database (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `CENTIME_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        // Foreign keys are a per-connection pragma; the rule -> pattern and
        // candidate -> transaction cascades depend on it, so set it in the
        // pool initializer rather than once in migrations.
        let key_pragma = match passphrase {
            Some(pass) => {
                let key = derive_key(pass)?;
                Some(format!("PRAGMA key = 'x\"{}\"';", key))
            }
            None => None,
        };

        let manager = manager.with_init(move |conn| {
            if let Some(ref pragma) = key_pragma {
                conn.execute_batch(pragma)?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/centime_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Soft reset: clear all transactional data but preserve configuration
    ///
    /// Clears: transactions, transaction_categories, candidate_events
    /// Preserves: notification_rules, match_patterns, scopes, categories, sources
    pub fn soft_reset(&self) -> Result<()> {
        let conn = self.conn()?;

        // Delete in order respecting foreign key constraints
        conn.execute_batch(
            r#"
            DELETE FROM transaction_categories;
            DELETE FROM transactions;
            DELETE FROM candidate_events;
            "#,
        )?;

        info!("Database soft reset complete");
        Ok(())
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Performance pragmas for local storage
            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory
            PRAGMA temp_store = MEMORY;

            -- Notification rules (user-defined and built-in extraction rules)
            -- id is an opaque TEXT key: built-ins ship with fixed ids so the
            -- guarantee seeder can find them across installs and app updates.
            CREATE TABLE IF NOT EXISTS notification_rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                direction TEXT NOT NULL DEFAULT 'spend',   -- spend, earn
                enabled BOOLEAN NOT NULL DEFAULT 1,
                system BOOLEAN NOT NULL DEFAULT 0,         -- true only for built-ins
                tainted_on DATETIME,                       -- first user edit of a system rule
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Rule scope (which source applications a rule may match)
            CREATE TABLE IF NOT EXISTS notification_rule_scopes (
                rule_id TEXT NOT NULL REFERENCES notification_rules(id) ON DELETE CASCADE,
                package_name TEXT NOT NULL,
                PRIMARY KEY (rule_id, package_name)
            );

            CREATE INDEX IF NOT EXISTS idx_rule_scopes_package ON notification_rule_scopes(package_name);

            -- Match patterns (regex templates, owned by exactly one rule)
            CREATE TABLE IF NOT EXISTS match_patterns (
                id INTEGER PRIMARY KEY,
                rule_id TEXT NOT NULL REFERENCES notification_rules(id) ON DELETE CASCADE,
                position INTEGER NOT NULL DEFAULT 0,       -- declaration order within the rule
                text TEXT NOT NULL,                        -- regex source with named groups
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_match_patterns_rule ON match_patterns(rule_id, position);

            -- Candidate events (structured extraction results pending confirmation)
            -- The UNIQUE constraint is the dedup identity key: OS redeliveries
            -- and notification updates upsert into the same row.
            CREATE TABLE IF NOT EXISTS candidate_events (
                id INTEGER PRIMARY KEY,
                categories TEXT NOT NULL DEFAULT '[]',     -- JSON array of category ids
                source_notification_id INTEGER NOT NULL,
                source_notification_key TEXT NOT NULL DEFAULT '',
                source_notification_group TEXT NOT NULL DEFAULT '',
                source_package TEXT NOT NULL,
                source_post_time INTEGER NOT NULL DEFAULT 0,  -- epoch millis
                matched_text TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                title TEXT NOT NULL,
                direction TEXT NOT NULL,
                account TEXT,
                date TEXT,
                merchant TEXT,
                description TEXT,
                used BOOLEAN NOT NULL DEFAULT 0,           -- consumed into a transaction
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(source_notification_id, source_notification_key,
                       source_notification_group, source_package, matched_text)
            );

            CREATE INDEX IF NOT EXISTS idx_candidate_events_used ON candidate_events(used);
            CREATE INDEX IF NOT EXISTS idx_candidate_events_key ON candidate_events(source_notification_key);

            -- Categories
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Payment sources
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Transactions
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                date DATE NOT NULL,
                direction TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                automatic_id INTEGER REFERENCES candidate_events(id) ON DELETE CASCADE,
                automatic_created_date DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_automatic ON transactions(automatic_id);

            -- Transaction-Category junction (many-to-many)
            CREATE TABLE IF NOT EXISTS transaction_categories (
                transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (transaction_id, category_id)
            );

            CREATE INDEX IF NOT EXISTS idx_transaction_categories_category ON transaction_categories(category_id);
            "#,
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}
