//! Payment source operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::Source;

impl Database {
    /// Create a source, or return the existing one with the same name
    pub fn upsert_source(&self, name: &str) -> Result<Source> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM sources WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute("INSERT INTO sources (name) VALUES (?)", params![name])?;
                conn.last_insert_rowid()
            }
        };

        self.get_source(id)?
            .ok_or_else(|| Error::NotFound(format!("Source {}", id)))
    }

    pub fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, created_at FROM sources WHERE id = ?",
            params![id],
            |row| {
                Ok(Source {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM sources ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Source {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn rename_source(&self, id: i64, name: &str) -> Result<Source> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sources SET name = ? WHERE id = ?",
            params![name, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Source {}", id)));
        }
        self.get_source(id)?
            .ok_or_else(|| Error::NotFound(format!("Source {}", id)))
    }

    pub fn delete_source(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sources WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }
}
