use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{StateError, StateStore};

/// SQLite-backed state. Writes are buffered in memory and committed in one
/// transaction on [`StateStore::flush`]; reads see buffered writes.
#[derive(Debug)]
pub struct SqliteState {
    conn: Mutex<Connection>,
    /// `None` marks a pending delete.
    pending: Mutex<HashMap<String, Option<Value>>>,
}

impl SqliteState {
    pub fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StateError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.lock().expect("state pending mutex poisoned").len()
    }

    fn read_committed(&self, key: &str) -> Result<Option<Value>, StateError> {
        let conn = self.conn.lock().expect("state db mutex poisoned");
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| StateError::Decode {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn commit(&self, pending: &[(String, Option<Value>)]) -> Result<(), StateError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().expect("state db mutex poisoned");
        let tx = conn.transaction()?;
        for (key, value) in pending {
            match value {
                Some(value) => {
                    tx.execute(
                        "
INSERT INTO state(key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
",
                        params![key, value.to_string(), now],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM state WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl StateStore for SqliteState {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        if let Some(buffered) = self
            .pending
            .lock()
            .expect("state pending mutex poisoned")
            .get(key)
        {
            return Ok(buffered.clone());
        }
        self.read_committed(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.pending
            .lock()
            .expect("state pending mutex poisoned")
            .insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        self.pending
            .lock()
            .expect("state pending mutex poisoned")
            .insert(key.to_string(), None);
        Ok(())
    }

    /// Pending writes stay buffered until the transaction commits, so a
    /// failed flush can be retried.
    fn flush(&self) -> Result<(), StateError> {
        let pending: Vec<(String, Option<Value>)> = {
            let guard = self.pending.lock().expect("state pending mutex poisoned");
            if guard.is_empty() {
                return Ok(());
            }
            guard
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        self.commit(&pending)?;

        // keys rewritten while committing stay pending
        let mut guard = self.pending.lock().expect("state pending mutex poisoned");
        for (key, value) in &pending {
            if guard.get(key) == Some(value) {
                guard.remove(key);
            }
        }
        tracing::debug!(keys = pending.len(), "flushed state");
        Ok(())
    }
}
