//! SQLite backing for the durable store

use super::StorageBackend;
use crate::cache::{
    entry::CacheEntry,
    types::{CacheKey, Category},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        category   TEXT NOT NULL,
        key        TEXT NOT NULL,
        value      TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (category, key)
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_created
        ON cache_entries (category, created_at);
    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
        ON cache_entries (expires_at);
";

/// SQLite-backed store
///
/// Thread-safe via `Mutex<Connection>`; timestamps are stored as epoch
/// milliseconds and values as JSON text.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("conn", &"<sqlite>")
            .finish()
    }
}

impl SqliteBackend {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite cache database at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite cache database");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CacheError::Storage(format!("invalid timestamp: {}", ms)))
}

impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, category: &Category, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, created_at, expires_at FROM cache_entries
                 WHERE category = ?1 AND key = ?2",
                params![category.as_str(), key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((value, created_at, expires_at)) => Ok(Some(CacheEntry {
                key: key.to_string(),
                value: serde_json::from_str(&value)?,
                created_at: from_millis(created_at)?,
                expires_at: from_millis(expires_at)?,
            })),
        }
    }

    fn put(&self, category: &Category, entry: &CacheEntry) -> Result<()> {
        let value = serde_json::to_string(&entry.value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (category, key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                category.as_str(),
                entry.key,
                value,
                entry.created_at.timestamp_millis(),
                entry.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, category: &Category, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM cache_entries WHERE category = ?1 AND key = ?2",
            params![category.as_str(), key],
        )?;
        Ok(())
    }

    fn clear(&self, category: &Category) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE category = ?1",
            params![category.as_str()],
        )?;
        Ok(removed)
    }

    fn count(&self, category: &Category) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_live(&self, category: &Category, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE category = ?1 AND expires_at > ?2",
            params![category.as_str(), now.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn keys(&self, category: &Category) -> Result<Vec<CacheKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM cache_entries WHERE category = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let keys = stmt
            .query_map(params![category.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn evict_oldest(&self, category: &Category, keep: usize) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;

        let excess = count - keep as i64;
        if excess <= 0 {
            return Ok(0);
        }

        // rowid breaks created_at ties in insertion order
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE rowid IN (
                 SELECT rowid FROM cache_entries WHERE category = ?1
                 ORDER BY created_at ASC, rowid ASC LIMIT ?2
             )",
            params![category.as_str(), excess],
        )?;
        Ok(removed)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }
}
