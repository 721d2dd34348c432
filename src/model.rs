//! Normalized entities written to the output pipe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::refid::stable_hash;

/// Derives the cross-entity ids that tie records together downstream.
#[derive(Debug, Clone)]
pub struct EntityIds {
    pub customer_id: String,
    pub ref_type: String,
}

impl EntityIds {
    pub fn new(customer_id: impl Into<String>, ref_type: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ref_type: ref_type.into(),
        }
    }

    fn derive(&self, kind: &str, parts: &[&str]) -> String {
        stable_hash(
            [kind, self.customer_id.as_str(), self.ref_type.as_str()]
                .into_iter()
                .chain(parts.iter().copied()),
        )
    }

    pub fn project(&self, project_ref_id: &str) -> String {
        self.derive("work.project", &[project_ref_id])
    }

    pub fn issue(&self, issue_ref_id: &str) -> String {
        self.derive("work.issue", &[issue_ref_id])
    }

    pub fn sprint(&self, iteration_path: &str) -> String {
        self.derive("agile.sprint", &[iteration_path])
    }

    pub fn repo(&self, repo_ref_id: &str) -> String {
        self.derive("sourcecode.repo", &[repo_ref_id])
    }

    pub fn pull_request(&self, repo_ref_id: &str, pull_request_ref_id: &str) -> String {
        self.derive("sourcecode.pull_request", &[repo_ref_id, pull_request_ref_id])
    }

    pub fn commit(&self, repo_ref_id: &str, sha: &str) -> String {
        self.derive("sourcecode.commit", &[repo_ref_id, sha])
    }

    pub fn branch(&self, repo_ref_id: &str, branch: &str, first_sha: &str) -> String {
        self.derive("sourcecode.branch", &[repo_ref_id, branch, first_sha])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Entity {
    Project(Project),
    ProjectCapability(ProjectCapability),
    Repo(Repo),
    PullRequest(PullRequest),
    PullRequestCommit(PullRequestCommit),
    PullRequestComment(PullRequestComment),
    PullRequestReview(PullRequestReview),
    PullRequestReviewRequest(PullRequestReviewRequest),
    Issue(Issue),
    IssueComment(IssueComment),
    IssueUpdate(IssueUpdate),
    Sprint(Sprint),
    WorkUser(WorkUser),
    SourceCodeUser(SourceCodeUser),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::ProjectCapability(_) => "project_capability",
            Self::Repo(_) => "repo",
            Self::PullRequest(_) => "pull_request",
            Self::PullRequestCommit(_) => "pull_request_commit",
            Self::PullRequestComment(_) => "pull_request_comment",
            Self::PullRequestReview(_) => "pull_request_review",
            Self::PullRequestReviewRequest(_) => "pull_request_review_request",
            Self::Issue(_) => "issue",
            Self::IssueComment(_) => "issue_comment",
            Self::IssueUpdate(_) => "issue_update",
            Self::Sprint(_) => "sprint",
            Self::WorkUser(_) => "work_user",
            Self::SourceCodeUser(_) => "source_code_user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub name: String,
    pub identifier: String,
    pub description: String,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCapability {
    pub project_id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub attachments: bool,
    pub change_logs: bool,
    pub due_dates: bool,
    pub epics: bool,
    pub in_progress_states: bool,
    pub kanban_boards: bool,
    pub linked_issues: bool,
    pub parents: bool,
    pub priorities: bool,
    pub resolutions: bool,
    pub sprints: bool,
    pub story_points: bool,
}

impl ProjectCapability {
    pub fn for_project(ids: &EntityIds, project_ref_id: &str) -> Self {
        Self {
            project_id: ids.project(project_ref_id),
            ref_id: project_ref_id.to_string(),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            attachments: false,
            change_logs: true,
            due_dates: true,
            epics: false,
            in_progress_states: true,
            kanban_boards: false,
            linked_issues: false,
            parents: false,
            priorities: true,
            resolutions: true,
            sprints: true,
            story_points: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub name: String,
    pub default_branch: String,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStatus {
    Open,
    Closed,
    Merged,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub branch_name: String,
    pub branch_id: Option<String>,
    pub status: PullRequestStatus,
    pub draft: bool,
    pub created_by_ref_id: String,
    pub closed_by_ref_id: Option<String>,
    pub merged_by_ref_id: Option<String>,
    pub merge_sha: Option<String>,
    pub merge_commit_id: Option<String>,
    pub commit_shas: Vec<String>,
    pub commit_ids: Vec<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub closed_date: Option<DateTime<Utc>>,
    pub merged_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestCommit {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub branch_id: String,
    pub sha: String,
    pub message: String,
    pub url: String,
    pub additions: i64,
    pub deletions: i64,
    pub author_ref_id: String,
    pub committer_ref_id: String,
    pub created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestComment {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub body: String,
    pub user_ref_id: String,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Dismissed,
    ChangesRequested,
    Pending,
    Commented,
    Approved,
}

impl ReviewState {
    pub fn from_vote(vote: &str) -> Option<Self> {
        match vote {
            "-10" => Some(Self::Dismissed),
            "-5" => Some(Self::ChangesRequested),
            "0" => Some(Self::Pending),
            "5" => Some(Self::Commented),
            "10" => Some(Self::Approved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestReview {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub state: ReviewState,
    pub user_ref_id: String,
    pub url: String,
    pub created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestReviewRequest {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub requested_reviewer_ref_id: String,
    pub sender_ref_id: String,
    pub url: String,
    pub created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeLogField {
    Status,
    Resolution,
    AssigneeRefId,
    ReporterRefId,
    Title,
    DueDate,
    Type,
    Tags,
    Priority,
    ProjectId,
    SprintIds,
    ParentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueChangeLog {
    pub ref_id: String,
    pub field: ChangeLogField,
    pub from: String,
    pub to: String,
    pub ordinal: i64,
    pub user_id: String,
    pub created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub project_id: String,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub issue_type: String,
    pub status: String,
    pub resolution: String,
    pub priority: String,
    pub story_points: Option<f64>,
    pub tags: Vec<String>,
    pub assignee_ref_id: String,
    pub creator_ref_id: String,
    pub reporter_ref_id: String,
    pub sprint_ids: Vec<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub change_log: Vec<IssueChangeLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub project_id: String,
    pub issue_id: String,
    pub body: String,
    pub url: String,
    pub user_ref_id: String,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
}

/// Partial update to a previously exported issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueUpdate {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Closed,
    Active,
    Future,
    Unset,
}

impl SprintStatus {
    pub fn from_time_frame(time_frame: &str) -> Self {
        match time_frame {
            "past" => Self::Closed,
            "current" => Self::Active,
            "future" => Self::Future,
            _ => Self::Unset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub name: String,
    pub status: SprintStatus,
    pub started_date: Option<DateTime<Utc>>,
    pub ended_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUser {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub name: String,
    pub username: String,
    pub avatar_url: String,
    pub url: String,
    pub member: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCodeUser {
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub name: String,
    pub username: String,
    pub avatar_url: String,
    pub url: String,
    pub member: bool,
    pub human: bool,
}
