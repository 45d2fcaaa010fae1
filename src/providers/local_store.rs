//! Local SQLite storage for API credentials

use crate::Result;
use crate::db::DbPool;

/// Durable credential store, keyed by name
pub struct KeyStore {
    db: DbPool,
}

impl KeyStore {
    /// Create a key store backed by the given pool
    #[must_use]
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Retrieve the stored value for `key`, or `None` if not set
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .db
            .get()
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        let result = conn.query_row(
            "SELECT value FROM credentials WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(crate::Error::Database(e.to_string())),
        }
    }

    /// Insert or replace the value for `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .db
            .get()
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO credentials (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value],
        )
        .map_err(|e| crate::Error::Database(e.to_string()))?;
        tracing::debug!(key, "credential stored");
        Ok(())
    }

    /// Remove the stored value for `key`; returns whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self
            .db
            .get()
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        let removed = conn
            .execute(
                "DELETE FROM credentials WHERE key = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        Ok(removed > 0)
    }

    /// Return all keys that have a stored value
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list(&self) -> Result<Vec<String>> {
        let conn = self
            .db
            .get()
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT key FROM credentials ORDER BY key")
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| crate::Error::Database(e.to_string()))?
            .flatten()
            .collect();
        Ok(keys)
    }
}
