//! Durable key/value state shared by the ref-ID translator and the
//! checkpoint manager.

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use sqlite::SqliteState;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode state value for key {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to decode state value for key {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

/// Persistent store keyed by string. Writes may be buffered until
/// [`StateStore::flush`].
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StateError>;
    fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.get(key)?.is_some())
    }
    fn delete(&self, key: &str) -> Result<(), StateError>;
    fn flush(&self) -> Result<(), StateError>;
}

impl dyn StateStore {
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        self.get(key)?
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StateError::Decode {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, value)
    }
}

/// In-process store, used by tests and one-shot commands.
#[derive(Debug, Default)]
pub struct MemoryState {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("state mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryState {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self
            .entries
            .lock()
            .expect("state mutex poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.entries
            .lock()
            .expect("state mutex poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        self.entries
            .lock()
            .expect("state mutex poisoned")
            .remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn typed_helpers_round_through_json() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::new());
        state.set_as("ids", &vec![1_u64, 2, 3]).expect("set");
        let got: Option<Vec<u64>> = state.get_as("ids").expect("get");
        assert_eq!(got, Some(vec![1, 2, 3]));
        assert!(state.exists("ids").expect("exists"));

        state.delete("ids").expect("delete");
        assert!(!state.exists("ids").expect("exists"));
    }

    #[test]
    fn decode_error_names_the_key() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryState::new());
        state.set("n", json!("not-a-number")).expect("set");
        let err = state.get_as::<u64>("n").expect_err("decode should fail");
        assert!(err.to_string().contains("key n"));
    }
}
