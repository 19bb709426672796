//! Todogram Storage
//!
//! SQLite persistence for per-chat todo lists and the update cursor

use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Ordered todo items keyed by owner.
///
/// Every call is synchronous and commits before returning. Implementations
/// serialize access internally so callers never need their own lock.
pub trait ItemStore: Send + Sync {
    /// Appends `description` to the end of the owner's list.
    fn add(&self, owner: &str, description: &str) -> Result<()>;

    /// Removes every item of `owner` whose description matches byte for byte.
    /// Returns how many rows went away; zero is not an error.
    fn delete(&self, owner: &str, description: &str) -> Result<usize>;

    /// Descriptions in insertion order, oldest first.
    fn list(&self, owner: &str) -> Result<Vec<String>>;

    fn count(&self, owner: &str) -> Result<usize>;
}

/// Last processed update id per gateway, for restarts without replay.
pub trait CursorStore: Send + Sync {
    fn load_cursor(&self, gateway: &str) -> Result<Option<i64>>;

    /// Stores `value` unless a larger one is already recorded.
    fn save_cursor(&self, gateway: &str, value: i64) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = rusqlite::Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        info!(path = %db_path.display(), "Item store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Creates tables and indexes. Safe to run on every start.
    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS items (
                description TEXT,
                owner TEXT
            );

            CREATE INDEX IF NOT EXISTS itemIndex ON items (description ASC);
            CREATE INDEX IF NOT EXISTS ownIndex ON items (owner ASC);

            CREATE TABLE IF NOT EXISTS cursors (
                gateway TEXT PRIMARY KEY,
                value INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Every owner holding at least one item, with its item count, in order
    /// of first insertion.
    pub fn owners(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT owner, COUNT(*)
             FROM items
             GROUP BY owner
             ORDER BY MIN(rowid)",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (owner, count) = row?;
            result.push((owner, count as usize));
        }
        Ok(result)
    }
}

impl ItemStore for SqliteStore {
    fn add(&self, owner: &str, description: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO items (description, owner) VALUES (?1, ?2)",
            (description, owner),
        )?;
        debug!(owner, "Item added");
        Ok(())
    }

    fn delete(&self, owner: &str, description: &str) -> Result<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM items WHERE description = ?1 AND owner = ?2",
            (description, owner),
        )?;
        debug!(owner, removed, "Item delete");
        Ok(removed)
    }

    fn list(&self, owner: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT description FROM items WHERE owner = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([owner], |row| row.get::<_, String>(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn count(&self, owner: &str) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM items WHERE owner = ?1",
            [owner],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl CursorStore for SqliteStore {
    fn load_cursor(&self, gateway: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM cursors WHERE gateway = ?1 LIMIT 1")?;
        let value: Option<i64> = stmt.query_row([gateway], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn save_cursor(&self, gateway: &str, value: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO cursors (gateway, value)
             VALUES (?1, ?2)
             ON CONFLICT(gateway)
             DO UPDATE SET value = MAX(value, excluded.value), updated_at = CURRENT_TIMESTAMP",
            (gateway, value),
        )?;
        Ok(())
    }
}
