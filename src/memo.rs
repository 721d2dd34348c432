//! Process-lifetime memo of work item type metadata.
//!
//! Entries are filled on first lookup and never invalidated. A failed
//! lookup is not cached, so the next caller retries it.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct WorkItemTypeCache {
    has_resolution: Mutex<HashMap<String, bool>>,
    completed_state: Mutex<HashMap<String, Option<String>>>,
}

impl WorkItemTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `item_type` defines allowed values for its resolution field.
    /// Lookup failures count as "no".
    pub fn has_resolution<F, E>(&self, item_type: &str, fetch: F) -> bool
    where
        F: FnOnce() -> Result<bool, E>,
        E: Display,
    {
        if let Some(has) = self
            .has_resolution
            .lock()
            .expect("resolution memo mutex poisoned")
            .get(item_type)
        {
            return *has;
        }

        match fetch() {
            Ok(has) => {
                self.has_resolution
                    .lock()
                    .expect("resolution memo mutex poisoned")
                    .insert(item_type.to_string(), has);
                has
            }
            Err(err) => {
                tracing::warn!(item_type, error = %err, "resolution lookup failed");
                false
            }
        }
    }

    /// Name of the state in `item_type`'s completed category, if any.
    pub fn completed_state<F, E>(&self, item_type: &str, fetch: F) -> Option<String>
    where
        F: FnOnce() -> Result<Option<String>, E>,
        E: Display,
    {
        if let Some(state) = self
            .completed_state
            .lock()
            .expect("completed state memo mutex poisoned")
            .get(item_type)
        {
            return state.clone();
        }

        match fetch() {
            Ok(state) => {
                self.completed_state
                    .lock()
                    .expect("completed state memo mutex poisoned")
                    .insert(item_type.to_string(), state.clone());
                state
            }
            Err(err) => {
                tracing::warn!(item_type, error = %err, "completed state lookup failed");
                None
            }
        }
    }
}
