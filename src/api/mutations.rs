use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::responses::WorkItemRef;
use super::{project_path, Api};
use crate::http::{escape, ApiError, Params};

const TITLE_FIELD: &str = "System.Title";
const DESCRIPTION_FIELD: &str = "System.Description";
const STATE_FIELD: &str = "System.State";
const PRIORITY_FIELD: &str = "Microsoft.VSTS.Common.Priority";
const RESOLVED_REASON_FIELD: &str = "Microsoft.VSTS.Common.ResolvedReason";
const ASSIGNED_TO_FIELD: &str = "System.AssignedTo";
const TAGS_FIELD: &str = "System.Tags";

/// New work item.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueCreate {
    pub project_ref_id: String,
    pub issue_type: String,
    pub title: String,
    pub description: String,
    pub priority: Option<String>,
    pub assignee_ref_id: Option<String>,
    pub labels: Option<Vec<String>>,
}

/// Field changes to an exported work item. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueUpdateRequest {
    pub title: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub resolution: Option<String>,
    pub assignee_ref_id: Option<String>,
    pub unset_assignee: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PullRequestUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct PatchOperation {
    op: &'static str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl PatchOperation {
    fn add(field: &str, value: impl Into<String>) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{field}"),
            value: Some(value.into()),
        }
    }

    fn remove(field: &str) -> Self {
        Self {
            op: "remove",
            path: format!("/fields/{field}"),
            value: None,
        }
    }
}

fn create_operations(issue: &IssueCreate) -> Vec<PatchOperation> {
    let mut ops = vec![
        PatchOperation::add(TITLE_FIELD, issue.title.as_str()),
        PatchOperation::add(DESCRIPTION_FIELD, issue.description.as_str()),
    ];
    if let Some(priority) = &issue.priority {
        ops.push(PatchOperation::add(PRIORITY_FIELD, priority.as_str()));
    }
    if let Some(assignee) = &issue.assignee_ref_id {
        ops.push(PatchOperation::add(ASSIGNED_TO_FIELD, assignee.as_str()));
    }
    if let Some(labels) = &issue.labels {
        ops.push(PatchOperation::add(TAGS_FIELD, labels.join("; ")));
    }
    ops
}

fn update_operations(update: &IssueUpdateRequest) -> Vec<PatchOperation> {
    let set = [
        (TITLE_FIELD, &update.title),
        (STATE_FIELD, &update.status),
        (PRIORITY_FIELD, &update.priority),
        (RESOLVED_REASON_FIELD, &update.resolution),
        (ASSIGNED_TO_FIELD, &update.assignee_ref_id),
    ];
    let mut ops: Vec<PatchOperation> = set
        .into_iter()
        .filter_map(|(field, value)| {
            value
                .as_ref()
                .map(|value| PatchOperation::add(field, value.as_str()))
        })
        .collect();
    if update.unset_assignee {
        ops.push(PatchOperation::remove(ASSIGNED_TO_FIELD));
    }
    ops
}

/// Azure status names for the statuses exported pull requests carry.
fn native_pull_request_status(status: &str) -> &str {
    match status {
        "open" => "active",
        "closed" => "abandoned",
        "merged" => "completed",
        other => other,
    }
}

impl Api {
    /// Creates a work item and returns its ref id.
    pub fn create_issue(&self, issue: &IssueCreate) -> Result<String, ApiError> {
        let project_id = issue.project_ref_id.as_str();
        let endpoint = project_path(
            project_id,
            &format!("_apis/wit/workitems/${}", escape(&issue.issue_type)),
        );
        let created: WorkItemRef = self
            .client()
            .post_json_patch(&endpoint, &create_operations(issue), Params::new())
            .map_err(|err| err.context(format!("creating {} in project {project_id}", issue.issue_type)))?;
        tracing::info!(project_id, id = created.id, "created work item");
        Ok(self.translator().issue_ref_id(project_id, created.id)?)
    }

    pub fn update_issue(&self, ref_id: &str, update: &IssueUpdateRequest) -> Result<(), ApiError> {
        let (project_id, issue_id) = self.translator().resolve_issue(ref_id)?;
        let ops = update_operations(update);
        if ops.is_empty() {
            tracing::debug!(ref_id, "no work item fields to update");
            return Ok(());
        }
        let endpoint = project_path(&project_id, &format!("_apis/wit/workitems/{issue_id}"));
        let _: Value = self
            .client()
            .patch_json_patch(&endpoint, &ops, Params::new())
            .map_err(|err| err.context(format!("updating work item {issue_id}")))?;
        tracing::info!(project_id, issue_id, "updated work item");
        Ok(())
    }

    pub fn update_pull_request(
        &self,
        ref_id: &str,
        update: &PullRequestUpdate,
    ) -> Result<(), ApiError> {
        let (project_id, repo_id, pull_request_id) = self.translator().resolve_pull_request(ref_id)?;
        let endpoint = project_path(
            &project_id,
            &format!(
                "_apis/git/repositories/{}/pullrequests/{pull_request_id}",
                escape(&repo_id)
            ),
        );
        let body = PullRequestUpdate {
            status: update
                .status
                .as_deref()
                .map(|s| native_pull_request_status(s).to_string()),
            ..update.clone()
        };
        let _: Value = self
            .client()
            .patch(&endpoint, &body, Params::new())
            .map_err(|err| err.context(format!("updating pull request {pull_request_id}")))?;
        tracing::info!(project_id, repo_id, pull_request_id, "updated pull request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::Method::{PATCH, POST};
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::harness;
    use crate::http::ApiError;
    use crate::refid::RefIdError;

    #[test]
    fn update_uses_add_and_remove_operations() {
        let ops = update_operations(&IssueUpdateRequest {
            title: Some("New title".into()),
            resolution: Some("Fixed".into()),
            unset_assignee: true,
            ..Default::default()
        });
        assert_eq!(
            serde_json::to_value(&ops).expect("encode"),
            json!([
                { "op": "add", "path": "/fields/System.Title", "value": "New title" },
                { "op": "add", "path": "/fields/Microsoft.VSTS.Common.ResolvedReason", "value": "Fixed" },
                { "op": "remove", "path": "/fields/System.AssignedTo" }
            ])
        );
    }

    #[test]
    fn created_issue_can_be_updated_by_ref_id() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/p1/_apis/wit/workitems/$Bug")
                .json_body(json!([
                    { "op": "add", "path": "/fields/System.Title", "value": "Crash" },
                    { "op": "add", "path": "/fields/System.Description", "value": "" },
                    { "op": "add", "path": "/fields/System.Tags", "value": "a; b" }
                ]));
            then.status(200).json_body(json!({ "id": 77 }));
        });
        let update = server.mock(|when, then| {
            when.method(PATCH)
                .path("/p1/_apis/wit/workitems/77")
                .json_body(json!([
                    { "op": "add", "path": "/fields/System.State", "value": "Closed" }
                ]));
            then.status(200).json_body(json!({ "id": 77 }));
        });

        let h = harness(&server);
        let ref_id = h
            .api
            .create_issue(&IssueCreate {
                project_ref_id: "p1".into(),
                issue_type: "Bug".into(),
                title: "Crash".into(),
                labels: Some(vec!["a".into(), "b".into()]),
                ..Default::default()
            })
            .expect("create");
        create.assert();

        h.api
            .update_issue(
                &ref_id,
                &IssueUpdateRequest {
                    status: Some("Closed".into()),
                    ..Default::default()
                },
            )
            .expect("update");
        update.assert();
    }

    #[test]
    fn pull_request_update_resolves_native_ids() {
        let server = MockServer::start();
        let patch = server.mock(|when, then| {
            when.method(PATCH)
                .path("/p1/_apis/git/repositories/r1/pullrequests/5")
                .json_body(json!({ "title": "Renamed", "status": "abandoned" }));
            then.status(200).json_body(json!({ "pullRequestId": 5 }));
        });

        let h = harness(&server);
        let ref_id = h
            .api
            .translator()
            .pull_request_ref_id("p1", "r1", 5)
            .expect("ref id");
        h.api
            .update_pull_request(
                &ref_id,
                &PullRequestUpdate {
                    title: Some("Renamed".into()),
                    status: Some("closed".into()),
                    ..Default::default()
                },
            )
            .expect("update");
        patch.assert();
    }

    #[test]
    fn unknown_ref_id_is_reported() {
        let server = MockServer::start();
        let h = harness(&server);
        let err = h
            .api
            .update_issue("missing", &IssueUpdateRequest::default())
            .expect_err("unknown ref id");
        assert!(matches!(err, ApiError::RefId(RefIdError::NotFound(_))));
    }
}
