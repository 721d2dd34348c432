//! Incremental updates driven by service hook deliveries.

use serde::Deserialize;

use crate::api::Api;
use crate::http::ApiError;
use crate::model::{Entity, IssueUpdate};

const WORK_ITEM_PREFIX: &str = "workitem.";
const PULL_REQUEST_PREFIX: &str = "git.pullrequest.";
const WORK_ITEM_CREATED: &str = "workitem.created";
const WORK_ITEM_DELETED: &str = "workitem.deleted";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("webhook {event_type} carries no {field}")]
    Missing {
        event_type: String,
        field: &'static str,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What a delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    IssueDeactivated { project_id: String, issue_id: i64 },
    IssueRefreshed { project_id: String, issue_id: i64 },
    PullRequestRefreshed { repo_id: String, pull_request_id: i64 },
    Ignored { event_type: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Payload {
    event_type: String,
    resource: Resource,
    resource_containers: ResourceContainers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Resource {
    id: i64,
    work_item_id: i64,
    pull_request_id: i64,
    repository: Option<Repository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Repository {
    id: String,
    project: Container,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceContainers {
    project: Container,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Container {
    id: String,
}

/// Applies one webhook delivery.
pub fn handle(api: &Api, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
    let payload: Payload = serde_json::from_slice(body)?;
    let event_type = payload.event_type.as_str();
    tracing::info!(event_type, "webhook received");

    if event_type.starts_with(WORK_ITEM_PREFIX) {
        handle_work_item(api, &payload)
    } else if event_type.starts_with(PULL_REQUEST_PREFIX) {
        handle_pull_request(api, &payload)
    } else {
        tracing::debug!(event_type, "ignoring webhook");
        Ok(WebhookOutcome::Ignored {
            event_type: payload.event_type.clone(),
        })
    }
}

fn missing(payload: &Payload, field: &'static str) -> WebhookError {
    WebhookError::Missing {
        event_type: payload.event_type.clone(),
        field,
    }
}

fn handle_work_item(api: &Api, payload: &Payload) -> Result<WebhookOutcome, WebhookError> {
    let project_id = payload.resource_containers.project.id.clone();
    if project_id.is_empty() {
        return Err(missing(payload, "project id"));
    }
    let issue_id = match payload.event_type.as_str() {
        WORK_ITEM_CREATED | WORK_ITEM_DELETED => payload.resource.id,
        _ => payload.resource.work_item_id,
    };
    if issue_id == 0 {
        return Err(missing(payload, "work item id"));
    }

    if payload.event_type == WORK_ITEM_DELETED {
        let ref_id = api
            .translator()
            .issue_ref_id(&project_id, issue_id)
            .map_err(ApiError::from)?;
        let ids = api.ids();
        api.write(Entity::IssueUpdate(IssueUpdate {
            id: ids.issue(&ref_id),
            ref_id,
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            active: Some(false),
        }))?;
        return Ok(WebhookOutcome::IssueDeactivated {
            project_id,
            issue_id,
        });
    }

    api.fetch_issues(&project_id, &[issue_id])?;
    api.state().flush().map_err(ApiError::from)?;
    Ok(WebhookOutcome::IssueRefreshed {
        project_id,
        issue_id,
    })
}

fn handle_pull_request(api: &Api, payload: &Payload) -> Result<WebhookOutcome, WebhookError> {
    let repository = payload
        .resource
        .repository
        .as_ref()
        .filter(|repo| !repo.id.is_empty())
        .ok_or_else(|| missing(payload, "repository"))?;
    let project_id = if repository.project.id.is_empty() {
        payload.resource_containers.project.id.as_str()
    } else {
        repository.project.id.as_str()
    };
    if project_id.is_empty() {
        return Err(missing(payload, "project id"));
    }
    let pull_request_id = payload.resource.pull_request_id;
    if pull_request_id == 0 {
        return Err(missing(payload, "pull request id"));
    }

    let pr = api.fetch_pull_request(project_id, &repository.id, pull_request_id)?;
    api.process_pull_requests(project_id, &repository.id, vec![pr])?;
    api.state().flush().map_err(ApiError::from)?;
    Ok(WebhookOutcome::PullRequestRefreshed {
        repo_id: repository.id.clone(),
        pull_request_id,
    })
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::harness;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("encode")
    }

    #[test]
    fn deleted_work_item_is_marked_inactive() {
        let server = MockServer::start();
        let h = harness(&server);
        let outcome = handle(
            &h.api,
            &body(json!({
                "eventType": "workitem.deleted",
                "resource": { "id": 42 },
                "resourceContainers": { "project": { "id": "p1" } }
            })),
        )
        .expect("handle");

        assert_eq!(
            outcome,
            WebhookOutcome::IssueDeactivated {
                project_id: "p1".into(),
                issue_id: 42
            }
        );
        let entities = h.pipe.entities();
        let [Entity::IssueUpdate(update)] = entities.as_slice() else {
            panic!("expected one issue update, got {entities:?}");
        };
        assert_eq!(update.active, Some(false));
        assert_eq!(
            update.ref_id,
            h.api.translator().issue_ref_id("p1", 42).expect("ref id")
        );
    }

    #[test]
    fn updated_work_item_is_refetched_by_work_item_id() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET)
                .path("/p1/_apis/wit/workitems")
                .query_param("ids", "7");
            then.status(200).json_body(json!({ "count": 0, "value": [] }));
        });

        let h = harness(&server);
        let outcome = handle(
            &h.api,
            &body(json!({
                "eventType": "workitem.updated",
                "resource": { "id": 3, "workItemId": 7 },
                "resourceContainers": { "project": { "id": "p1" } }
            })),
        )
        .expect("handle");

        lookup.assert();
        assert_eq!(
            outcome,
            WebhookOutcome::IssueRefreshed {
                project_id: "p1".into(),
                issue_id: 7
            }
        );
    }

    #[test]
    fn pull_request_event_refetches_the_pull_request() {
        let server = MockServer::start();
        let single = server.mock(|when, then| {
            when.method(GET)
                .path("/p1/_apis/git/repositories/r1/pullrequests/9");
            then.status(200).json_body(json!({
                "pullRequestId": 9,
                "status": "active",
                "sourceRefName": "refs/heads/feature",
                "url": "https://dev.azure.com/org/p1/_apis/git/repositories/r1/pullRequests/9"
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/_apis/git/repositories/r1/pullRequests/9/commits");
            then.status(200).json_body(json!({ "count": 0, "value": [] }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/p1/_apis/git/repositories/r1/pullRequests/9/threads");
            then.status(200).json_body(json!({ "count": 0, "value": [] }));
        });

        let h = harness(&server);
        let outcome = handle(
            &h.api,
            &body(json!({
                "eventType": "git.pullrequest.updated",
                "resource": {
                    "pullRequestId": 9,
                    "repository": { "id": "r1", "project": { "id": "p1" } }
                }
            })),
        )
        .expect("handle");

        single.assert();
        assert_eq!(
            outcome,
            WebhookOutcome::PullRequestRefreshed {
                repo_id: "r1".into(),
                pull_request_id: 9
            }
        );
        assert_eq!(h.pipe.count("pull_request"), 1);
    }

    #[test]
    fn work_item_without_project_is_rejected() {
        let server = MockServer::start();
        let h = harness(&server);
        let err = handle(
            &h.api,
            &body(json!({ "eventType": "workitem.created", "resource": { "id": 1 } })),
        )
        .expect_err("no project");
        assert!(matches!(err, WebhookError::Missing { field: "project id", .. }));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let server = MockServer::start();
        let h = harness(&server);
        let outcome = handle(&h.api, &body(json!({ "eventType": "git.push" }))).expect("handle");
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event_type: "git.push".into()
            }
        );
        assert!(h.pipe.entities().is_empty());
    }

    #[test]
    fn malformed_body_is_a_payload_error() {
        let server = MockServer::start();
        let h = harness(&server);
        assert!(matches!(
            handle(&h.api, b"not json"),
            Err(WebhookError::Payload(_))
        ));
    }
}
