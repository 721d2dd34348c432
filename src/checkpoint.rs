//! Per-project "last successful sync" timestamps.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::state::{StateError, StateStore};

const UPDATED_PREFIX: &str = "updated_";
const WEBHOOKS_PREFIX: &str = "webhooks_";

/// How much of a project to fetch on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No usable checkpoint: fetch everything.
    Historical,
    Incremental { since: DateTime<Utc> },
}

impl SyncMode {
    pub fn from_checkpoint(checkpoint: Option<DateTime<Utc>>) -> Self {
        match checkpoint {
            Some(since) if since.timestamp() > 0 || since.timestamp_subsec_nanos() > 0 => {
                Self::Incremental { since }
            }
            _ => Self::Historical,
        }
    }

    pub fn is_historical(&self) -> bool {
        matches!(self, Self::Historical)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Historical => None,
            Self::Incremental { since } => Some(*since),
        }
    }

    /// Whether a child resource must be (re)fetched. Active resources are
    /// always reconsidered since their state can change without a
    /// comparable timestamp moving.
    pub fn should_refresh(&self, last_modified: Option<DateTime<Utc>>, is_active: bool) -> bool {
        match self {
            Self::Historical => true,
            Self::Incremental { since } => {
                is_active || last_modified.is_some_and(|modified| modified > *since)
            }
        }
    }
}

#[derive(Clone)]
pub struct CheckpointManager {
    state: Arc<dyn StateStore>,
}

impl CheckpointManager {
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    pub fn key(project_ref_id: &str) -> String {
        format!("{UPDATED_PREFIX}{project_ref_id}")
    }

    /// Unparseable stored values are treated as absent so the project falls
    /// back to a historical sync.
    pub fn get_checkpoint(&self, project_ref_id: &str) -> Result<Option<DateTime<Utc>>, StateError> {
        let key = Self::key(project_ref_id);
        let Some(raw) = self.state.get_as::<String>(&key)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Ok(Some(parsed.with_timezone(&Utc))),
            Err(err) => {
                tracing::warn!(key, value = %raw, error = %err, "ignoring unparseable checkpoint");
                Ok(None)
            }
        }
    }

    pub fn sync_mode(&self, project_ref_id: &str) -> Result<SyncMode, StateError> {
        Ok(SyncMode::from_checkpoint(self.get_checkpoint(project_ref_id)?))
    }

    pub fn set_checkpoint(&self, project_ref_id: &str, at: DateTime<Utc>) -> Result<(), StateError> {
        let value = at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.state.set_as(&Self::key(project_ref_id), &value)
    }

    pub fn flush(&self) -> Result<(), StateError> {
        self.state.flush()
    }

    pub fn webhook_ids(&self, project_ref_id: &str) -> Result<Vec<String>, StateError> {
        Ok(self
            .state
            .get_as::<Vec<String>>(&format!("{WEBHOOKS_PREFIX}{project_ref_id}"))?
            .unwrap_or_default())
    }

    pub fn set_webhook_ids(&self, project_ref_id: &str, ids: &[String]) -> Result<(), StateError> {
        let key = format!("{WEBHOOKS_PREFIX}{project_ref_id}");
        if ids.is_empty() {
            self.state.delete(&key)
        } else {
            self.state.set_as(&key, ids)
        }
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager").finish_non_exhaustive()
    }
}
