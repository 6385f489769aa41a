//! Key/value property storage for sync state.
//!
//! The orchestrator only needs string properties keyed by name; the SQLite
//! store persists them across runs, the memory store backs tests and
//! dry runs.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CalendarError;

/// Persistent string properties.
pub trait PropertyStore: Send + Sync {
    fn get_property(&self, key: &str) -> Result<Option<String>, CalendarError>;

    fn set_property(&self, key: &str, value: &str) -> Result<(), CalendarError>;

    /// Removing a missing key is not an error.
    fn delete_property(&self, key: &str) -> Result<(), CalendarError>;

    /// All properties ordered by key.
    fn properties(&self) -> Result<Vec<(String, String)>, CalendarError>;
}

/// SQLite-backed property store.
pub struct SqlitePropertyStore {
    conn: Mutex<Connection>,
}

impl SqlitePropertyStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CalendarError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CalendarError::StoreError(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self, CalendarError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CalendarError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS properties (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl PropertyStore for SqlitePropertyStore {
    fn get_property(&self, key: &str) -> Result<Option<String>, CalendarError> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM properties WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_property(&self, key: &str, value: &str) -> Result<(), CalendarError> {
        let now = Utc::now().timestamp_millis();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO properties (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn delete_property(&self, key: &str) -> Result<(), CalendarError> {
        self.conn
            .lock()
            .execute("DELETE FROM properties WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn properties(&self) -> Result<Vec<(String, String)>, CalendarError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM properties ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let properties = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(properties)
    }
}

/// In-process property store; contents are lost on drop.
#[derive(Default)]
pub struct MemoryPropertyStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from existing properties, e.g. to dry-run against real state.
    pub fn from_properties(properties: Vec<(String, String)>) -> Self {
        Self {
            values: Mutex::new(properties.into_iter().collect()),
        }
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get_property(&self, key: &str) -> Result<Option<String>, CalendarError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<(), CalendarError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_property(&self, key: &str) -> Result<(), CalendarError> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn properties(&self) -> Result<Vec<(String, String)>, CalendarError> {
        Ok(self
            .values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl<S: PropertyStore + ?Sized> PropertyStore for std::sync::Arc<S> {
    fn get_property(&self, key: &str) -> Result<Option<String>, CalendarError> {
        (**self).get_property(key)
    }

    fn set_property(&self, key: &str, value: &str) -> Result<(), CalendarError> {
        (**self).set_property(key, value)
    }

    fn delete_property(&self, key: &str) -> Result<(), CalendarError> {
        (**self).delete_property(key)
    }

    fn properties(&self) -> Result<Vec<(String, String)>, CalendarError> {
        (**self).properties()
    }
}
