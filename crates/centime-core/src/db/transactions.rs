//! Transaction operations

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Direction, NewTransaction, Transaction};

fn load_categories(conn: &Connection, transaction_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT category_id FROM transaction_categories
         WHERE transaction_id = ? ORDER BY category_id",
    )?;
    let rows = stmt.query_map(params![transaction_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

fn read_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let row = conn
        .query_row(
            "SELECT id, name, amount_cents, date, direction, note, automatic_id,
                    automatic_created_date, created_at
             FROM transactions WHERE id = ?",
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, amount_cents, date, direction, note, automatic_id, auto_date, created_at)) =
        row
    else {
        return Ok(None);
    };

    let categories = load_categories(conn, id)?;
    Ok(Some(Transaction {
        id,
        created_at: parse_datetime(&created_at),
        categories,
        name,
        amount_cents,
        date: date
            .parse()
            .map_err(|e| Error::InvalidData(format!("Bad transaction date '{}': {}", date, e)))?,
        direction: direction
            .parse::<Direction>()
            .map_err(Error::InvalidData)?,
        note,
        automatic_id,
        automatic_created_date: auto_date.map(|s| parse_datetime(&s)),
    }))
}

fn write_categories(conn: &Connection, transaction_id: i64, categories: &[i64]) -> Result<()> {
    conn.execute(
        "DELETE FROM transaction_categories WHERE transaction_id = ?",
        params![transaction_id],
    )?;
    for category_id in categories {
        conn.execute(
            "INSERT OR IGNORE INTO transaction_categories (transaction_id, category_id)
             VALUES (?, ?)",
            params![transaction_id, category_id],
        )?;
    }
    Ok(())
}

impl Database {
    /// Insert a manually entered transaction
    pub fn insert_transaction(&self, new: &NewTransaction) -> Result<Transaction> {
        self.insert_transaction_inner(new, None)
    }

    /// Insert a transaction derived from a candidate event, stamping the
    /// back-reference and marking the candidate consumed in one transaction
    ///
    /// Fails if the candidate is missing or already consumed, so a candidate
    /// can feed at most one transaction even under concurrent confirms.
    pub fn insert_transaction_from_candidate(
        &self,
        new: &NewTransaction,
        candidate_id: i64,
    ) -> Result<Transaction> {
        self.insert_transaction_inner(new, Some(candidate_id))
    }

    fn insert_transaction_inner(
        &self,
        new: &NewTransaction,
        candidate_id: Option<i64>,
    ) -> Result<Transaction> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let automatic_created: Option<String> = match candidate_id {
            Some(cid) => {
                let created: Option<String> = tx
                    .query_row(
                        "SELECT created_at FROM candidate_events WHERE id = ?",
                        params![cid],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(created) = created else {
                    return Err(Error::NotFound(format!("Candidate event {}", cid)));
                };
                Some(created)
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO transactions (name, amount_cents, date, direction, note,
                                       automatic_id, automatic_created_date)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                new.name,
                new.amount_cents,
                new.date.to_string(),
                new.direction.as_str(),
                new.note,
                candidate_id,
                automatic_created,
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_categories(&tx, id, &new.categories)?;

        if let Some(cid) = candidate_id {
            // The guarded claim is the consumption gate: any pre-check the
            // caller ran may be stale, this update cannot be.
            let claimed = tx.execute(
                "UPDATE candidate_events SET used = 1 WHERE id = ? AND used = 0",
                params![cid],
            )?;
            if claimed == 0 {
                return Err(Error::InvalidData(format!(
                    "Candidate event {} already consumed",
                    cid
                )));
            }
        }

        let transaction = read_transaction(&tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {} after insert", id)))?;
        tx.commit()?;
        Ok(transaction)
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        read_transaction(&conn, id)
    }

    /// List all transactions, newest date first
    pub fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let ids: Vec<i64> = {
            let mut stmt =
                conn.prepare("SELECT id FROM transactions ORDER BY date DESC, id DESC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = read_transaction(&conn, id)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    /// List transactions carrying a given category
    pub fn list_transactions_by_category(&self, category_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT t.id FROM transactions t
                 JOIN transaction_categories tc ON tc.transaction_id = t.id
                 WHERE tc.category_id = ?
                 ORDER BY t.date DESC, t.id DESC",
            )?;
            let rows = stmt.query_map(params![category_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = read_transaction(&conn, id)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    /// Persist an edit to a transaction's mutable fields and categories
    pub fn update_transaction(&self, transaction: &Transaction) -> Result<Transaction> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE transactions SET name = ?, amount_cents = ?, date = ?,
                    direction = ?, note = ?
             WHERE id = ?",
            params![
                transaction.name,
                transaction.amount_cents,
                transaction.date.to_string(),
                transaction.direction.as_str(),
                transaction.note,
                transaction.id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Transaction {}", transaction.id)));
        }
        write_categories(&tx, transaction.id, &transaction.categories)?;

        let stored = read_transaction(&tx, transaction.id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction.id)))?;
        tx.commit()?;
        Ok(stored)
    }

    /// Delete a transaction; junction rows cascade
    pub fn delete_transaction(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM transactions WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }
}
