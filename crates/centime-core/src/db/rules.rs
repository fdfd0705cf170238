//! Notification rule, scope, and match pattern operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Direction, MatchPattern, NotificationRule, RuleWithPatterns};

/// Result of a system-rule upsert during guarantee seeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRuleUpsert {
    /// Rule did not exist and was inserted
    Inserted,
    /// Rule existed untainted; name, scope, and patterns were refreshed
    Refreshed,
    /// Rule has been edited by the user and was left untouched
    SkippedTainted,
}

/// Generate an opaque, stable id for a user-created rule
fn generate_rule_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    // Zero-padded so lexicographic id order matches creation order within
    // one timestamp tick
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("user-{}-{:06}", Utc::now().timestamp_millis(), n % 1_000_000)
}

fn load_scope(conn: &Connection, rule_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT package_name FROM notification_rule_scopes WHERE rule_id = ? ORDER BY package_name",
    )?;
    let rows = stmt.query_map(params![rule_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn load_patterns(conn: &Connection, rule_id: &str) -> Result<Vec<MatchPattern>> {
    let mut stmt = conn.prepare(
        "SELECT id, rule_id, position, text, created_at FROM match_patterns
         WHERE rule_id = ? ORDER BY position, id",
    )?;
    let rows = stmt.query_map(params![rule_id], |row| {
        Ok(MatchPattern {
            id: row.get(0)?,
            rule_id: row.get(1)?,
            position: row.get(2)?,
            text: row.get(3)?,
            created_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<MatchPattern>>>()?)
}

fn read_rule(conn: &Connection, id: &str) -> Result<Option<NotificationRule>> {
    let rule = conn
        .query_row(
            "SELECT id, name, direction, enabled, system, tainted_on, created_at
             FROM notification_rules WHERE id = ?",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, direction, enabled, system, tainted_on, created_at)) = rule else {
        return Ok(None);
    };

    let scope = load_scope(conn, &id)?;
    Ok(Some(NotificationRule {
        id,
        created_at: parse_datetime(&created_at),
        name,
        direction: direction
            .parse::<Direction>()
            .map_err(Error::InvalidData)?,
        enabled,
        system,
        scope,
        tainted_on: tainted_on.map(|s| parse_datetime(&s)),
    }))
}

fn write_scope(conn: &Connection, rule_id: &str, scope: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM notification_rule_scopes WHERE rule_id = ?",
        params![rule_id],
    )?;
    for package in scope {
        conn.execute(
            "INSERT OR IGNORE INTO notification_rule_scopes (rule_id, package_name) VALUES (?, ?)",
            params![rule_id, package],
        )?;
    }
    Ok(())
}

fn write_patterns(conn: &Connection, rule_id: &str, texts: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM match_patterns WHERE rule_id = ?",
        params![rule_id],
    )?;
    for (position, text) in texts.iter().enumerate() {
        conn.execute(
            "INSERT INTO match_patterns (rule_id, position, text) VALUES (?, ?, ?)",
            params![rule_id, position as i64, text],
        )?;
    }
    Ok(())
}

impl Database {
    /// Create a user-defined rule with its patterns
    pub fn create_rule(
        &self,
        name: &str,
        direction: Direction,
        scope: &[String],
        patterns: &[String],
    ) -> Result<RuleWithPatterns> {
        let id = generate_rule_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO notification_rules (id, name, direction, enabled, system)
             VALUES (?, ?, ?, 1, 0)",
            params![id, name, direction.as_str()],
        )?;
        write_scope(&tx, &id, scope)?;
        write_patterns(&tx, &id, patterns)?;
        tx.commit()?;

        self.get_rule_with_patterns(&id)?
            .ok_or_else(|| Error::NotFound(format!("Rule {} after insert", id)))
    }

    /// Look up a rule (scope included) by id
    pub fn get_rule(&self, id: &str) -> Result<Option<NotificationRule>> {
        let conn = self.conn()?;
        read_rule(&conn, id)
    }

    /// Look up a rule together with its patterns in declaration order
    pub fn get_rule_with_patterns(&self, id: &str) -> Result<Option<RuleWithPatterns>> {
        let conn = self.conn()?;
        let Some(rule) = read_rule(&conn, id)? else {
            return Ok(None);
        };
        let patterns = load_patterns(&conn, &rule.id)?;
        Ok(Some(RuleWithPatterns { rule, patterns }))
    }

    /// List all rules with patterns, in stable (created_at, id) order
    pub fn list_rules(&self) -> Result<Vec<RuleWithPatterns>> {
        let conn = self.conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT id FROM notification_rules ORDER BY created_at, id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rule) = read_rule(&conn, &id)? {
                let patterns = load_patterns(&conn, &id)?;
                out.push(RuleWithPatterns { rule, patterns });
            }
        }
        Ok(out)
    }

    /// List enabled rules whose scope contains `package`, in stable
    /// (created_at, id) order
    ///
    /// The scope check happens here, before any pattern evaluation: a rule
    /// never sees an alert from an application outside its scope.
    pub fn list_enabled_rules_for_package(&self, package: &str) -> Result<Vec<RuleWithPatterns>> {
        let conn = self.conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT r.id FROM notification_rules r
                 JOIN notification_rule_scopes s ON s.rule_id = r.id
                 WHERE r.enabled = 1 AND s.package_name = ?
                 ORDER BY r.created_at, r.id",
            )?;
            let rows = stmt.query_map(params![package], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rule) = read_rule(&conn, &id)? {
                let patterns = load_patterns(&conn, &id)?;
                out.push(RuleWithPatterns { rule, patterns });
            }
        }
        Ok(out)
    }

    /// Persist a user edit to a rule's fields (name, direction, enabled, scope)
    ///
    /// Editing a system rule stamps `tainted_on` on the first edit, which
    /// permanently exempts the rule from guarantee reseeding.
    pub fn update_rule(&self, rule: &NotificationRule) -> Result<NotificationRule> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE notification_rules SET name = ?, direction = ?, enabled = ? WHERE id = ?",
            params![rule.name, rule.direction.as_str(), rule.enabled, rule.id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Rule {}", rule.id)));
        }
        write_scope(&tx, &rule.id, &rule.scope)?;
        taint_if_system(&tx, &rule.id)?;
        tx.commit()?;

        self.get_rule(&rule.id)?
            .ok_or_else(|| Error::NotFound(format!("Rule {}", rule.id)))
    }

    /// Replace a rule's pattern set (user edit path; taints system rules)
    pub fn replace_rule_patterns(
        &self,
        rule_id: &str,
        texts: &[String],
    ) -> Result<Vec<MatchPattern>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM notification_rules WHERE id = ?",
                params![rule_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Rule {}", rule_id)));
        }

        write_patterns(&tx, rule_id, texts)?;
        taint_if_system(&tx, rule_id)?;
        tx.commit()?;

        let conn = self.conn()?;
        load_patterns(&conn, rule_id)
    }

    /// Toggle a rule on or off
    ///
    /// Deliberately does not taint: the seeder never touches `enabled`, so a
    /// disabled built-in still receives shipped pattern fixes.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<NotificationRule> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE notification_rules SET enabled = ? WHERE id = ?",
            params![enabled, rule_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Rule {}", rule_id)));
        }
        self.get_rule(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("Rule {}", rule_id)))
    }

    /// Delete a rule; its patterns and scope rows cascade in the same
    /// transaction. Returns false if the rule did not exist.
    pub fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM notification_rules WHERE id = ?",
            params![rule_id],
        )?;
        Ok(deleted > 0)
    }

    /// Upsert one built-in rule definition (guarantee seeding path)
    ///
    /// - absent: insert as-is with `system = 1`
    /// - present and untainted: overwrite name, direction, scope, and patterns
    ///   with the shipped definition (this is how regex fixes reach installs)
    /// - present and tainted: skip entirely; user intent wins
    ///
    /// Never touches `enabled` or `tainted_on`.
    pub fn upsert_system_rule(
        &self,
        id: &str,
        name: &str,
        direction: Direction,
        scope: &[String],
        patterns: &[String],
    ) -> Result<SystemRuleUpsert> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT tainted_on FROM notification_rules WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO notification_rules (id, name, direction, enabled, system)
                     VALUES (?, ?, ?, 1, 1)",
                    params![id, name, direction.as_str()],
                )?;
                write_scope(&tx, id, scope)?;
                write_patterns(&tx, id, patterns)?;
                SystemRuleUpsert::Inserted
            }
            Some(None) => {
                tx.execute(
                    "UPDATE notification_rules SET name = ?, direction = ? WHERE id = ?",
                    params![name, direction.as_str(), id],
                )?;
                write_scope(&tx, id, scope)?;
                write_patterns(&tx, id, patterns)?;
                SystemRuleUpsert::Refreshed
            }
            Some(Some(_)) => {
                debug!(rule_id = id, "Skipping tainted system rule");
                SystemRuleUpsert::SkippedTainted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

/// Stamp `tainted_on` on a system rule if this is its first user edit
fn taint_if_system(conn: &Connection, rule_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE notification_rules SET tainted_on = CURRENT_TIMESTAMP
         WHERE id = ? AND system = 1 AND tainted_on IS NULL",
        params![rule_id],
    )?;
    Ok(())
}
