//! SQLite-backed key/value document.
//!
//! One `kv` table; every value is a JSON string.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::backend::KvBackend;
use super::data_dir;
use crate::error::{CoreError, StorageError};

/// SQLite database holding the persisted state document.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open the database at `<data_dir>/watchlimit.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("watchlimit.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("database connection poisoned".into()))
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let mut out = HashMap::new();
        for key in keys {
            let raw: Option<String> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            if let Some(raw) = raw {
                let value = serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                })?;
                out.insert(key.to_string(), value);
            }
        }
        Ok(out)
    }

    fn set(&self, entries: &[(&str, Value)]) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kv_roundtrip() {
        let db = SqliteBackend::open_memory().unwrap();
        assert!(db.get(&["test"]).unwrap().is_empty());
        db.set(&[("test", json!({"a": [1, 2]}))]).unwrap();
        assert_eq!(db.get(&["test"]).unwrap()["test"], json!({"a": [1, 2]}));
    }

    #[test]
    fn batch_set_overwrites() {
        let db = SqliteBackend::open_memory().unwrap();
        db.set(&[("a", json!(1)), ("b", json!("x"))]).unwrap();
        db.set(&[("a", json!(2))]).unwrap();
        let got = db.get(&["a", "b"]).unwrap();
        assert_eq!(got["a"], json!(2));
        assert_eq!(got["b"], json!("x"));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let db = SqliteBackend::open_at(&path).unwrap();
            db.set(&[("extensionEnabled", json!(false))]).unwrap();
        }
        let db = SqliteBackend::open_at(&path).unwrap();
        assert_eq!(db.get(&["extensionEnabled"]).unwrap()["extensionEnabled"], json!(false));
    }

    #[test]
    fn corrupt_value_is_reported() {
        let db = SqliteBackend::open_memory().unwrap();
        db.conn()
            .unwrap()
            .execute("INSERT INTO kv (key, value) VALUES ('bad', '{not json')", [])
            .unwrap();
        assert!(matches!(db.get(&["bad"]), Err(StorageError::Corrupt { .. })));
    }
}
