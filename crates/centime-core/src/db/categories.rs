//! Spending category operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::Category;

impl Database {
    /// Create a category, or return the existing one with the same name
    pub fn upsert_category(&self, name: &str) -> Result<Category> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute("INSERT INTO categories (name) VALUES (?)", params![name])?;
                conn.last_insert_rowid()
            }
        };

        self.get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("Category {}", id)))
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, created_at FROM categories WHERE id = ?",
            params![id],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM categories ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn rename_category(&self, id: i64, name: &str) -> Result<Category> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET name = ? WHERE id = ?",
            params![name, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Category {}", id)));
        }
        self.get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("Category {}", id)))
    }

    /// Delete a category; junction rows referencing it cascade
    pub fn delete_category(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM categories WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }
}
