//! Endpoint mappers: fetch through the paginator and facade, normalize into
//! [`Entity`] values and write them to the pipe.

mod changelog;
mod comments;
mod issues;
mod mutations;
mod projects;
mod pull_requests;
mod repos;
pub mod responses;
mod sprints;
mod teams;
mod threads;
mod users;
mod webhooks;

use std::sync::Arc;

pub use changelog::ChangelogNormalizer;
pub use issues::{wiql_query, WIQL_DATE_FORMAT};
pub use mutations::{IssueCreate, IssueUpdateRequest, PullRequestUpdate};
pub use users::UserRegistry;
pub use webhooks::{derived_marker, WebhookSettings, WEBHOOK_EVENT_TYPES};

use crate::executor::AsyncBatch;
use crate::http::{ApiClient, ApiError};
use crate::memo::WorkItemTypeCache;
use crate::model::{Entity, EntityIds};
use crate::pipe::Pipe;
use crate::refid::RefIdTranslator;
use crate::state::StateStore;

/// Tuning knobs shared by every mapper.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub concurrency: usize,
    pub issue_batch_size: usize,
    pub page_size: usize,
    pub active_issue_states: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            issue_batch_size: crate::config::MAX_ISSUE_BATCH_SIZE,
            page_size: crate::paginate::DEFAULT_PAGE_SIZE,
            active_issue_states: crate::config::default_active_issue_states(),
        }
    }
}

struct ApiInner {
    client: ApiClient,
    state: Arc<dyn StateStore>,
    translator: RefIdTranslator,
    memo: Arc<WorkItemTypeCache>,
    ids: EntityIds,
    pipe: Arc<dyn Pipe>,
    settings: ApiSettings,
}

/// Cheap to clone so work units can own a handle.
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

impl Api {
    pub fn new(
        client: ApiClient,
        state: Arc<dyn StateStore>,
        pipe: Arc<dyn Pipe>,
        ids: EntityIds,
        settings: ApiSettings,
    ) -> Self {
        Self::with_memo(
            client,
            state,
            pipe,
            ids,
            settings,
            Arc::new(WorkItemTypeCache::new()),
        )
    }

    pub fn with_memo(
        client: ApiClient,
        state: Arc<dyn StateStore>,
        pipe: Arc<dyn Pipe>,
        ids: EntityIds,
        settings: ApiSettings,
        memo: Arc<WorkItemTypeCache>,
    ) -> Self {
        let translator = RefIdTranslator::new(ids.customer_id.clone(), Arc::clone(&state));
        Self {
            inner: Arc::new(ApiInner {
                client,
                state,
                translator,
                memo,
                ids,
                pipe,
                settings,
            }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn translator(&self) -> &RefIdTranslator {
        &self.inner.translator
    }

    pub fn ids(&self) -> &EntityIds {
        &self.inner.ids
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.inner.state
    }

    pub(crate) fn memo(&self) -> &WorkItemTypeCache {
        &self.inner.memo
    }

    pub fn write(&self, entity: Entity) -> Result<(), ApiError> {
        self.inner.pipe.write(entity)?;
        Ok(())
    }

    /// Fresh fan-out pool sized by the configured concurrency.
    pub(crate) fn batch(&self) -> AsyncBatch<ApiError> {
        self.batch_of(self.inner.settings.concurrency)
    }

    pub(crate) fn batch_of(&self, concurrency: usize) -> AsyncBatch<ApiError> {
        AsyncBatch::new(concurrency).with_metrics(Arc::clone(self.inner.client.metrics()))
    }

    fn page_size(&self) -> usize {
        self.inner.settings.page_size
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("base_url", &self.inner.client.base_url())
            .field("ids", &self.inner.ids)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// Joins a project id and a relative endpoint.
pub(crate) fn project_path(project_id: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        crate::http::escape(project_id),
        endpoint.trim_start_matches('/')
    )
}
