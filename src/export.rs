//! Full and incremental export runs.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::responses::ProjectResponse;
use crate::api::{Api, UserRegistry};
use crate::checkpoint::{CheckpointManager, SyncMode};
use crate::http::ApiError;
use crate::pipe::Pipe;

/// Step of an export run, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Projects,
    Checkpoint,
    Teams,
    Users,
    Sprints,
    Issues,
    Repos,
    PullRequests,
    Finish,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Projects => "projects",
            Self::Checkpoint => "checkpoint",
            Self::Teams => "teams",
            Self::Users => "users",
            Self::Sprints => "sprints",
            Self::Issues => "issues",
            Self::Repos => "repos",
            Self::PullRequests => "pull requests",
            Self::Finish => "finish",
        };
        f.write_str(name)
    }
}

fn for_project(project: &Option<String>) -> String {
    project
        .as_ref()
        .map(|id| format!(" for project {id}"))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
#[error("export failed in {phase} phase{}: {source}", for_project(.project))]
pub struct ExportError {
    pub phase: Phase,
    pub project: Option<String>,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub projects: usize,
    pub historical: usize,
    pub incremental: usize,
    pub issues: usize,
    pub pull_requests: usize,
    pub users: usize,
}

pub struct Exporter {
    api: Api,
    checkpoints: CheckpointManager,
    pipe: Arc<dyn Pipe>,
}

impl Exporter {
    pub fn new(api: Api, pipe: Arc<dyn Pipe>) -> Self {
        let checkpoints = CheckpointManager::new(Arc::clone(api.state()));
        Self {
            api,
            checkpoints,
            pipe,
        }
    }

    /// Exports every project. With `full`, checkpoints are ignored and every
    /// project is fetched historically.
    pub fn run(&self, full: bool) -> Result<ExportSummary, ExportError> {
        let started = Utc::now();
        tracing::info!(full, "export started");

        let projects = self
            .api
            .fetch_projects()
            .map_err(|source| run_error(Phase::Projects, source))?;

        let registry = Arc::new(UserRegistry::new());
        let mut summary = ExportSummary::default();
        for project in &projects {
            self.export_project(project, full, started, &registry, &mut summary)?;
        }

        self.api
            .write_users(&registry)
            .map_err(|source| run_error(Phase::Users, source))?;
        summary.users = registry.len();

        self.pipe
            .flush()
            .map_err(|err| run_error(Phase::Finish, err.into()))?;
        self.checkpoints
            .flush()
            .map_err(|err| run_error(Phase::Finish, err.into()))?;

        tracing::info!(
            projects = summary.projects,
            historical = summary.historical,
            incremental = summary.incremental,
            issues = summary.issues,
            pull_requests = summary.pull_requests,
            users = summary.users,
            "export finished"
        );
        Ok(summary)
    }

    fn export_project(
        &self,
        project: &ProjectResponse,
        full: bool,
        started: DateTime<Utc>,
        registry: &Arc<UserRegistry>,
        summary: &mut ExportSummary,
    ) -> Result<(), ExportError> {
        let project_id = project.id.as_str();
        let fail = |phase: Phase| {
            move |source: ApiError| ExportError {
                phase,
                project: Some(project_id.to_string()),
                source,
            }
        };

        self.api
            .write_project(project)
            .map_err(fail(Phase::Projects))?;

        let mode = if full {
            SyncMode::Historical
        } else {
            self.checkpoints
                .sync_mode(project_id)
                .map_err(|err| fail(Phase::Checkpoint)(err.into()))?
        };
        match mode {
            SyncMode::Historical => summary.historical += 1,
            SyncMode::Incremental { .. } => summary.incremental += 1,
        }
        tracing::info!(
            project_id,
            name = %project.name,
            historical = mode.is_historical(),
            since = ?mode.since(),
            "exporting project"
        );

        let teams = self.api.fetch_teams(project_id).map_err(fail(Phase::Teams))?;
        self.api
            .fetch_users(project_id, &teams, registry)
            .map_err(fail(Phase::Users))?;
        self.api
            .write_sprints(project_id, &teams)
            .map_err(fail(Phase::Sprints))?;

        summary.issues += self
            .api
            .fetch_all_issues(project_id, &mode)
            .map_err(fail(Phase::Issues))?;

        let repos = self.api.write_repos(project_id).map_err(fail(Phase::Repos))?;
        for repo in &repos {
            summary.pull_requests += self
                .api
                .fetch_pull_requests(project_id, &repo.id, &mode)
                .map_err(fail(Phase::PullRequests))?;
        }

        self.checkpoints
            .set_checkpoint(project_id, started)
            .and_then(|()| self.checkpoints.flush())
            .map_err(|err| fail(Phase::Checkpoint)(err.into()))?;
        summary.projects += 1;
        tracing::info!(project_id, checkpoint = %started, "project exported");
        Ok(())
    }
}

fn run_error(phase: Phase, source: ApiError) -> ExportError {
    ExportError {
        phase,
        project: None,
        source,
    }
}
