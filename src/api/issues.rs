use super::responses::{
    FieldDefinitionResponse, ValueList, WiqlRequest, WiqlResponse, WorkItemResponse,
    WorkItemTypeResponse,
};
use super::{project_path, Api};
use crate::checkpoint::SyncMode;
use crate::http::{escape, ApiError, Params};
use crate::model::{Entity, Issue};

/// Date layout WIQL accepts in `ChangedDate` comparisons.
pub const WIQL_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%SZ";

const RESOLVED_REASON_FIELD: &str = "Microsoft.VSTS.Common.ResolvedReason";
const COMPLETED_CATEGORY: &str = "Completed";

const TEST_MANAGEMENT_TYPES: &[&str] = &[
    "Microsoft.VSTS.WorkItemTypes.SharedParameter",
    "SharedParameter",
    "Shared Parameter",
    "Microsoft.VSTS.WorkItemTypes.SharedStep",
    "SharedStep",
    "Shared Step",
    "Microsoft.VSTS.WorkItemTypes.TestCase",
    "TestCase",
    "Test Case",
    "Microsoft.VSTS.WorkItemTypes.TestPlan",
    "TestPlan",
    "Test Plan",
    "Microsoft.VSTS.WorkItemTypes.TestSuite",
    "TestSuite",
    "Test Suite",
];

fn is_test_management(item_type: &str) -> bool {
    TEST_MANAGEMENT_TYPES.contains(&item_type)
}

/// WIQL selecting a project's work items, newest change first. Incremental
/// runs select items changed since the checkpoint plus every item still in
/// one of `active_states`.
pub fn wiql_query(mode: &SyncMode, active_states: &[String]) -> String {
    let mut query =
        String::from("SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project");
    if let Some(since) = mode.since() {
        let changed = format!("[System.ChangedDate] > '{}'", since.format(WIQL_DATE_FORMAT));
        if active_states.is_empty() {
            query.push_str(&format!(" AND {changed}"));
        } else {
            let states = active_states
                .iter()
                .map(|s| format!("'{}'", s.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");
            query.push_str(&format!(" AND ({changed} OR [System.State] IN ({states}))"));
        }
    }
    query.push_str(" ORDER BY [System.ChangedDate] DESC");
    query
}

impl Api {
    /// Runs the project's WIQL query and exports the matches in batches.
    /// Returns the number of work items the query matched.
    pub fn fetch_all_issues(&self, project_id: &str, mode: &SyncMode) -> Result<usize, ApiError> {
        tracing::info!(
            project_id,
            historical = mode.is_historical(),
            "fetching issues"
        );
        let request = WiqlRequest {
            query: wiql_query(mode, &self.settings().active_issue_states),
        };
        let response: WiqlResponse = self
            .client()
            .post(
                &project_path(project_id, "_apis/wit/wiql"),
                &request,
                Params::new().with("timePrecision", "true"),
            )
            .map_err(|err| err.context(format!("querying work items for project {project_id}")))?;

        let ids: Vec<i64> = response.work_items.iter().map(|item| item.id).collect();
        let batch_size = self.settings().issue_batch_size.max(1);
        for chunk in ids.chunks(batch_size) {
            self.fetch_issues(project_id, chunk)?;
        }
        Ok(ids.len())
    }

    /// Exports the given work items: per item, the issue with its change log
    /// and, independently, its comments.
    pub fn fetch_issues(&self, project_id: &str, issue_ids: &[i64]) -> Result<(), ApiError> {
        self.state().flush()?;
        if issue_ids.is_empty() {
            return Ok(());
        }
        tracing::info!(project_id, count = issue_ids.len(), "fetching work items");

        let joined = issue_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let params = Params::new().with("ids", joined).with("$expand", "all");
        let items: ValueList<WorkItemResponse> = self
            .client()
            .get(&project_path(project_id, "_apis/wit/workitems"), params)
            .map_err(|err| err.context(format!("fetching work items for project {project_id}")))?;

        let batch = self.batch();
        for item in items.value {
            if is_test_management(&item.fields.work_item_type) {
                tracing::debug!(id = item.id, item_type = %item.fields.work_item_type, "skipping test item");
                continue;
            }
            let ref_id = self.translator().issue_ref_id(project_id, item.id)?;
            let item_id = item.id;

            let api = self.clone();
            let project = project_id.to_string();
            let issue_ref = ref_id.clone();
            batch.submit(move || {
                let issue = api.issue_entity(&project, &item, issue_ref)?;
                api.write(Entity::Issue(issue))
            });

            let api = self.clone();
            let project = project_id.to_string();
            batch.submit(move || api.fetch_issue_comments(&project, item_id, &ref_id).map(|_| ()));
        }
        batch.wait()
    }

    /// Normalizes one work item, fetching its change log.
    pub fn issue_entity(
        &self,
        project_id: &str,
        item: &WorkItemResponse,
        ref_id: String,
    ) -> Result<Issue, ApiError> {
        let fields = &item.fields;
        let resolution = if self.resolution_from_reason(project_id, &fields.work_item_type, &fields.state) {
            fields.reason.clone()
        } else {
            fields.resolved_reason.clone()
        };

        let (change_log, latest_change) = self
            .fetch_changelog(project_id, item.id)
            .map_err(|err| err.context(format!("fetching changelog for work item {}", item.id)))?;

        let ids = self.ids();
        Ok(Issue {
            id: ids.issue(&ref_id),
            ref_id,
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            project_id: ids.project(project_id),
            identifier: format!("{}-{}", fields.team_project, item.id),
            title: fields.title.clone(),
            description: fields.description.clone(),
            url: item.links.html.href.clone(),
            issue_type: fields.work_item_type.clone(),
            status: fields.state.clone(),
            resolution,
            priority: fields.priority.map(|p| p.to_string()).unwrap_or_default(),
            story_points: fields.story_points,
            tags: fields
                .tags
                .split("; ")
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect(),
            assignee_ref_id: fields.assigned_to.id.clone(),
            creator_ref_id: fields.created_by.id.clone(),
            reporter_ref_id: fields.created_by.id.clone(),
            sprint_ids: if fields.iteration_path.is_empty() {
                Vec::new()
            } else {
                vec![ids.sprint(&fields.iteration_path)]
            },
            created_date: fields.created_date,
            updated_date: latest_change.or(fields.changed_date),
            due_date: fields.due_date,
            change_log,
        })
    }

    /// Types without resolution values report the state reason as the
    /// resolution once the item reaches the type's completed state.
    fn resolution_from_reason(&self, project_id: &str, item_type: &str, state: &str) -> bool {
        let memo = self.memo();
        if memo.has_resolution(item_type, || self.fetch_has_resolution(project_id, item_type)) {
            return false;
        }
        memo.completed_state(item_type, || self.fetch_completed_state(project_id, item_type))
            .is_some_and(|completed| completed == state)
    }

    fn fetch_has_resolution(&self, project_id: &str, item_type: &str) -> Result<bool, ApiError> {
        let endpoint = project_path(
            project_id,
            &format!("_apis/wit/workitemtypes/{}/fields", escape(item_type)),
        );
        let fields: ValueList<FieldDefinitionResponse> = self
            .client()
            .get(&endpoint, Params::new().with("$expand", "allowedValues"))?;
        Ok(fields
            .value
            .iter()
            .any(|f| f.reference_name == RESOLVED_REASON_FIELD && !f.allowed_values.is_empty()))
    }

    fn fetch_completed_state(
        &self,
        project_id: &str,
        item_type: &str,
    ) -> Result<Option<String>, ApiError> {
        let endpoint = project_path(
            project_id,
            &format!("_apis/wit/workitemtypes/{}", escape(item_type)),
        );
        let definition: WorkItemTypeResponse = self.client().get(&endpoint, Params::new())?;
        Ok(definition
            .states
            .into_iter()
            .find(|s| s.category == COMPLETED_CATEGORY)
            .map(|s| s.name))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::{harness, harness_with};
    use crate::api::ApiSettings;

    #[test]
    fn historical_query_selects_whole_project() {
        let query = wiql_query(&SyncMode::Historical, &["Active".into()]);
        assert_eq!(
            query,
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             ORDER BY [System.ChangedDate] DESC"
        );
    }

    #[test]
    fn incremental_query_includes_active_states() {
        let since = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let mode = SyncMode::Incremental { since };
        let query = wiql_query(&mode, &["Active".into(), "Won't Fix".into()]);
        assert!(query.contains(
            "AND ([System.ChangedDate] > '03/05/2024 14:07:09Z' OR [System.State] IN ('Active', 'Won''t Fix'))"
        ));

        let plain = wiql_query(&mode, &[]);
        assert!(plain.contains("AND [System.ChangedDate] > '03/05/2024 14:07:09Z' ORDER BY"));
    }

    #[test]
    fn default_settings_keep_active_items_in_incremental_runs() {
        let server = MockServer::start();
        let wiql = server.mock(|when, then| {
            when.method(POST)
                .path("/p1/_apis/wit/wiql")
                .body_contains("[System.State] IN (")
                .body_contains("'Active'")
                .body_contains("'In Progress'");
            then.status(200).json_body(json!({ "workItems": [] }));
        });

        let h = harness(&server);
        let since = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let matched = h
            .api
            .fetch_all_issues("p1", &SyncMode::Incremental { since })
            .expect("issues");
        assert_eq!(matched, 0);
        wiql.assert();
        assert_eq!(
            ApiSettings::default().active_issue_states,
            crate::config::default_active_issue_states()
        );
    }

    #[test]
    fn matches_are_looked_up_in_batches() {
        let server = MockServer::start();
        let work_items: Vec<_> = (1..=250).map(|id| json!({ "id": id })).collect();
        let wiql = server.mock(|when, then| {
            when.method(POST)
                .path("/p1/_apis/wit/wiql")
                .query_param("timePrecision", "true");
            then.status(200).json_body(json!({ "workItems": work_items }));
        });
        let lookups = server.mock(|when, then| {
            when.method(GET)
                .path("/p1/_apis/wit/workitems")
                .query_param("$expand", "all")
                .query_param_exists("ids");
            then.status(200).json_body(json!({ "value": [] }));
        });

        let h = harness_with(
            &server,
            ApiSettings {
                issue_batch_size: 200,
                ..ApiSettings::default()
            },
        );
        let matched = h
            .api
            .fetch_all_issues("p1", &SyncMode::Historical)
            .expect("issues");
        assert_eq!(matched, 250);
        wiql.assert();
        lookups.assert_hits(2);
    }

    #[test]
    fn completed_state_reason_becomes_resolution() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/wit/workitems");
            then.status(200).json_body(json!({
                "value": [
                    {
                        "id": 5,
                        "fields": {
                            "System.TeamProject": "Alpha",
                            "System.WorkItemType": "Task",
                            "System.State": "Done",
                            "System.Reason": "Work finished",
                            "System.Title": "Ship it",
                            "System.Tags": "backend; urgent",
                            "System.IterationPath": "Alpha\\Sprint 3",
                            "System.ChangedDate": "2024-06-01T00:00:00Z",
                            "Microsoft.VSTS.Common.Priority": 1
                        },
                        "_links": { "html": { "href": "https://x/_workitems/edit/5" } }
                    },
                    { "id": 6, "fields": { "System.WorkItemType": "Test Case" } }
                ]
            }));
        });
        let type_fields = server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/wit/workitemtypes/Task/fields");
            then.status(200).json_body(json!({
                "value": [{ "referenceName": "System.Reason", "allowedValues": ["x"] }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/wit/workitemtypes/Task");
            then.status(200).json_body(json!({
                "states": [
                    { "name": "To Do", "category": "Proposed" },
                    { "name": "Done", "category": "Completed" }
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/wit/workItems/5/updates");
            then.status(200).json_body(json!({ "count": 0, "value": [] }));
        });
        let comments = server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/wit/workItems/5/comments");
            then.status(200).json_body(json!({ "count": 0, "comments": [] }));
        });

        let h = harness(&server);
        h.api.fetch_issues("p1", &[5, 6]).expect("issues");
        type_fields.assert();
        comments.assert();

        let issues: Vec<_> = h
            .pipe
            .entities()
            .into_iter()
            .filter_map(|e| match e {
                Entity::Issue(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.resolution, "Work finished");
        assert_eq!(issue.identifier, "Alpha-5");
        assert_eq!(issue.priority, "1");
        assert_eq!(issue.tags, vec!["backend", "urgent"]);
        assert_eq!(issue.sprint_ids, vec![h.api.ids().sprint("Alpha\\Sprint 3")]);
        assert_eq!(issue.updated_date, issue_date("2024-06-01T00:00:00Z"));

        let (project, native) = h.api.translator().resolve_issue(&issue.ref_id).expect("ref id");
        assert_eq!((project.as_str(), native), ("p1", 5));
    }

    fn issue_date(raw: &str) -> Option<chrono::DateTime<Utc>> {
        crate::api::responses::parse_date(raw)
    }
}
