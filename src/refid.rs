//! Opaque ref ids and the durable reverse mapping back to native ids.
//!
//! A ref id is the SHA-256 of the customer id and every context component,
//! so re-exporting the same item always yields the same id. The native
//! context is written once under the ref id and never overwritten.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::{StateError, StateStore};

const SEPARATOR: u8 = 0x1f;

/// Hex SHA-256 over `parts`, unit-separated so `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
pub fn stable_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update([SEPARATOR]);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Native coordinates recoverable from a ref id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefContext {
    Issue {
        project_id: String,
        issue_id: i64,
    },
    PullRequest {
        project_id: String,
        repo_id: String,
        pull_request_id: i64,
    },
}

impl RefContext {
    fn components(&self) -> Vec<String> {
        match self {
            Self::Issue {
                project_id,
                issue_id,
            } => vec![project_id.clone(), issue_id.to_string()],
            Self::PullRequest {
                project_id,
                repo_id,
                pull_request_id,
            } => vec![
                project_id.clone(),
                repo_id.clone(),
                pull_request_id.to_string(),
            ],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefIdError {
    #[error("no native ids recorded for ref id {0}")]
    NotFound(String),
    #[error("ref id {ref_id} maps to a {found}, expected a {expected}")]
    WrongKind {
        ref_id: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    State(#[from] StateError),
}

pub struct RefIdTranslator {
    customer_id: String,
    state: Arc<dyn StateStore>,
    // serializes the exists/set pair so concurrent creators write once
    write_lock: Mutex<()>,
}

impl RefIdTranslator {
    pub fn new(customer_id: impl Into<String>, state: Arc<dyn StateStore>) -> Self {
        Self {
            customer_id: customer_id.into(),
            state,
            write_lock: Mutex::new(()),
        }
    }

    pub fn ref_id_for(&self, context: &RefContext) -> String {
        stable_hash(std::iter::once(self.customer_id.clone()).chain(context.components()))
    }

    pub fn create_ref_id(&self, context: &RefContext) -> Result<String, RefIdError> {
        let ref_id = self.ref_id_for(context);
        let _guard = self.write_lock.lock().expect("ref id mutex poisoned");
        if !self.state.exists(&ref_id)? {
            self.state.set_as(&ref_id, context)?;
            tracing::trace!(ref_id = %ref_id, ?context, "recorded ref id");
        }
        Ok(ref_id)
    }

    pub fn resolve_ref_id(&self, ref_id: &str) -> Result<RefContext, RefIdError> {
        self.state
            .get_as::<RefContext>(ref_id)?
            .ok_or_else(|| RefIdError::NotFound(ref_id.to_string()))
    }

    pub fn issue_ref_id(&self, project_id: &str, issue_id: i64) -> Result<String, RefIdError> {
        self.create_ref_id(&RefContext::Issue {
            project_id: project_id.to_string(),
            issue_id,
        })
    }

    pub fn pull_request_ref_id(
        &self,
        project_id: &str,
        repo_id: &str,
        pull_request_id: i64,
    ) -> Result<String, RefIdError> {
        self.create_ref_id(&RefContext::PullRequest {
            project_id: project_id.to_string(),
            repo_id: repo_id.to_string(),
            pull_request_id,
        })
    }

    /// Returns `(project_id, issue_id)`.
    pub fn resolve_issue(&self, ref_id: &str) -> Result<(String, i64), RefIdError> {
        match self.resolve_ref_id(ref_id)? {
            RefContext::Issue {
                project_id,
                issue_id,
            } => Ok((project_id, issue_id)),
            RefContext::PullRequest { .. } => Err(RefIdError::WrongKind {
                ref_id: ref_id.to_string(),
                expected: "issue",
                found: "pull request",
            }),
        }
    }

    /// Returns `(project_id, repo_id, pull_request_id)`.
    pub fn resolve_pull_request(&self, ref_id: &str) -> Result<(String, String, i64), RefIdError> {
        match self.resolve_ref_id(ref_id)? {
            RefContext::PullRequest {
                project_id,
                repo_id,
                pull_request_id,
            } => Ok((project_id, repo_id, pull_request_id)),
            RefContext::Issue { .. } => Err(RefIdError::WrongKind {
                ref_id: ref_id.to_string(),
                expected: "pull request",
                found: "issue",
            }),
        }
    }
}

impl std::fmt::Debug for RefIdTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefIdTranslator")
            .field("customer_id", &self.customer_id)
            .finish_non_exhaustive()
    }
}
