//! Candidate event dedup/consumption store
//!
//! Each successful extraction is persisted keyed by its composite natural key
//! (notification id, key, group, package, matched text). OS redeliveries and
//! notification updates carry the same key and must land in the same row.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{CandidateEvent, Direction, NewCandidateEvent};

/// Result of upserting a candidate event
#[derive(Debug, Clone)]
pub enum CandidateUpsert {
    /// No row existed for the identity key; a new row was inserted
    Inserted(CandidateEvent),
    /// A row existed; its structured fields were merged. `used` is never
    /// reset by the merge.
    Updated(CandidateEvent),
}

impl CandidateUpsert {
    pub fn event(&self) -> &CandidateEvent {
        match self {
            Self::Inserted(e) | Self::Updated(e) => e,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

fn read_candidate(conn: &Connection, id: i64) -> Result<Option<CandidateEvent>> {
    conn.query_row(
        "SELECT id, categories, source_notification_id, source_notification_key,
                source_notification_group, source_package, source_post_time,
                matched_text, amount_cents, title, direction, account, date,
                merchant, description, used, created_at
         FROM candidate_events WHERE id = ?",
        params![id],
        row_to_candidate,
    )
    .optional()?
    .transpose()
}

fn row_to_candidate(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<std::result::Result<CandidateEvent, Error>> {
    let categories_json: String = row.get(1)?;
    let direction_str: String = row.get(10)?;
    let created_at: String = row.get(16)?;

    Ok((|| {
        Ok(CandidateEvent {
            id: row.get(0)?,
            categories: serde_json::from_str(&categories_json)?,
            source_notification_id: row.get(2)?,
            source_notification_key: row.get(3)?,
            source_notification_group: row.get(4)?,
            source_package: row.get(5)?,
            source_post_time: row.get(6)?,
            matched_text: row.get(7)?,
            amount_cents: row.get(8)?,
            title: row.get(9)?,
            direction: direction_str
                .parse::<Direction>()
                .map_err(Error::InvalidData)?,
            account: row.get(11)?,
            date: row.get(12)?,
            merchant: row.get(13)?,
            description: row.get(14)?,
            used: row.get(15)?,
            created_at: parse_datetime(&created_at),
        })
    })())
}

fn list_candidates_where(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CandidateEvent>> {
    let sql = format!(
        "SELECT id, categories, source_notification_id, source_notification_key,
                source_notification_group, source_package, source_post_time,
                matched_text, amount_cents, title, direction, account, date,
                merchant, description, used, created_at
         FROM candidate_events {} ORDER BY source_post_time DESC, id DESC",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, row_to_candidate)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

impl Database {
    /// Upsert a candidate event by its identity key
    ///
    /// Find-or-create runs as a single immediate transaction so two deliveries
    /// of the same alert in quick succession cannot race into two rows.
    pub fn upsert_candidate(&self, new: &NewCandidateEvent) -> Result<CandidateUpsert> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM candidate_events
                 WHERE source_notification_id = ? AND source_notification_key = ?
                   AND source_notification_group = ? AND source_package = ?
                   AND matched_text = ?",
                params![
                    new.source_notification_id,
                    new.source_notification_key,
                    new.source_notification_group,
                    new.source_package,
                    new.matched_text,
                ],
                |row| row.get(0),
            )
            .optional()?;

        let (id, inserted) = match existing {
            Some(id) => {
                // Merge structured fields; used and created_at are untouched.
                // Categories keep any user-assigned set unless the new payload
                // carries one.
                tx.execute(
                    "UPDATE candidate_events SET
                        source_post_time = ?, amount_cents = ?, title = ?,
                        direction = ?, account = ?, date = ?, merchant = ?,
                        description = ?
                     WHERE id = ?",
                    params![
                        new.source_post_time,
                        new.amount_cents,
                        new.title,
                        new.direction.as_str(),
                        new.account,
                        new.date,
                        new.merchant,
                        new.description,
                        id,
                    ],
                )?;
                if !new.categories.is_empty() {
                    tx.execute(
                        "UPDATE candidate_events SET categories = ? WHERE id = ?",
                        params![serde_json::to_string(&new.categories)?, id],
                    )?;
                }
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO candidate_events (
                        categories, source_notification_id, source_notification_key,
                        source_notification_group, source_package, source_post_time,
                        matched_text, amount_cents, title, direction, account,
                        date, merchant, description)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        serde_json::to_string(&new.categories)?,
                        new.source_notification_id,
                        new.source_notification_key,
                        new.source_notification_group,
                        new.source_package,
                        new.source_post_time,
                        new.matched_text,
                        new.amount_cents,
                        new.title,
                        new.direction.as_str(),
                        new.account,
                        new.date,
                        new.merchant,
                        new.description,
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        let event = read_candidate(&tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {} after upsert", id)))?;
        tx.commit()?;

        Ok(if inserted {
            CandidateUpsert::Inserted(event)
        } else {
            CandidateUpsert::Updated(event)
        })
    }

    pub fn get_candidate(&self, id: i64) -> Result<Option<CandidateEvent>> {
        let conn = self.conn()?;
        read_candidate(&conn, id)
    }

    pub fn list_candidates(&self) -> Result<Vec<CandidateEvent>> {
        let conn = self.conn()?;
        list_candidates_where(&conn, "", &[])
    }

    /// Candidates not yet consumed into a transaction
    pub fn list_unused_candidates(&self) -> Result<Vec<CandidateEvent>> {
        let conn = self.conn()?;
        list_candidates_where(&conn, "WHERE used = 0", &[])
    }

    pub fn list_candidates_by_notification_key(&self, key: &str) -> Result<Vec<CandidateEvent>> {
        let conn = self.conn()?;
        list_candidates_where(&conn, "WHERE source_notification_key = ?", &[&key])
    }

    /// Flip `used` to true. Idempotent: consuming an already-consumed event
    /// is a no-op that returns the same state.
    pub fn mark_candidate_used(&self, id: i64) -> Result<CandidateEvent> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE candidate_events SET used = 1 WHERE id = ?",
            params![id],
        )?;
        read_candidate(&conn, id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", id)))
    }

    /// Delete a candidate event. Transactions referencing it cascade.
    pub fn delete_candidate(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM candidate_events WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    /// Assign suggested categories to a candidate event
    pub fn set_candidate_categories(&self, id: i64, categories: &[i64]) -> Result<CandidateEvent> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE candidate_events SET categories = ? WHERE id = ?",
            params![serde_json::to_string(categories)?, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Candidate event {}", id)));
        }
        read_candidate(&conn, id)?
            .ok_or_else(|| Error::NotFound(format!("Candidate event {}", id)))
    }
}
