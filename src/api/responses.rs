//! Wire shapes of the REST responses the mappers consume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts RFC3339 timestamps; missing, null, unparseable and
/// `0001-01-01` style zero dates all become `None`.
pub fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_date))
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let parsed = parsed.with_timezone(&Utc);
    (parsed.timestamp() > 0).then_some(parsed)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityRef {
    pub id: String,
    pub display_name: String,
    pub unique_name: String,
    pub image_url: String,
    pub url: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub state: String,
    pub url: String,
    pub description: String,
    #[serde(deserialize_with = "lenient_date")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TeamResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub project_name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamMemberResponse {
    pub identity: IdentityRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SprintAttributes {
    #[serde(deserialize_with = "lenient_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_date")]
    pub finish_date: Option<DateTime<Utc>>,
    pub time_frame: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SprintResponse {
    pub id: String,
    pub name: String,
    pub path: String,
    pub url: String,
    pub attributes: SprintAttributes,
}

/// `{ "value": [...] }` envelope of the non-paginated listings.
#[derive(Debug, Deserialize)]
pub struct ValueList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct WiqlRequest {
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WiqlResponse {
    pub work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemRef {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemFields {
    #[serde(rename = "System.AssignedTo")]
    pub assigned_to: IdentityRef,
    #[serde(rename = "System.ChangedDate", deserialize_with = "lenient_date")]
    pub changed_date: Option<DateTime<Utc>>,
    #[serde(rename = "System.CreatedDate", deserialize_with = "lenient_date")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(rename = "System.CreatedBy")]
    pub created_by: IdentityRef,
    #[serde(rename = "System.Description")]
    pub description: String,
    #[serde(
        rename = "Microsoft.VSTS.Scheduling.DueDate",
        deserialize_with = "lenient_date"
    )]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(rename = "System.IterationPath")]
    pub iteration_path: String,
    #[serde(rename = "System.TeamProject")]
    pub team_project: String,
    #[serde(rename = "Microsoft.VSTS.Common.Priority")]
    pub priority: Option<i64>,
    #[serde(rename = "System.Reason")]
    pub reason: String,
    #[serde(rename = "Microsoft.VSTS.Common.ResolvedReason")]
    pub resolved_reason: String,
    #[serde(rename = "Microsoft.VSTS.Scheduling.StoryPoints")]
    pub story_points: Option<f64>,
    #[serde(rename = "System.State")]
    pub state: String,
    #[serde(rename = "System.Tags")]
    pub tags: String,
    #[serde(rename = "System.Title")]
    pub title: String,
    #[serde(rename = "System.WorkItemType")]
    pub work_item_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Href {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemLinks {
    pub html: Href,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemResponse {
    pub id: i64,
    pub url: String,
    pub fields: WorkItemFields,
    #[serde(rename = "_links")]
    pub links: WorkItemLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldDefinitionResponse {
    pub name: String,
    pub reference_name: String,
    pub allowed_values: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemTypeState {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkItemTypeResponse {
    pub name: String,
    pub states: Vec<WorkItemTypeState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangelogField {
    pub new_value: Option<Value>,
    #[serde(alias = "oldvalue")]
    pub old_value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelationAttributes {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelationChange {
    pub attributes: RelationAttributes,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChangelogRelations {
    pub added: Vec<RelationChange>,
    pub removed: Vec<RelationChange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangelogResponse {
    pub id: i64,
    pub fields: Option<HashMap<String, ChangelogField>>,
    #[serde(deserialize_with = "lenient_date")]
    pub revised_date: Option<DateTime<Utc>>,
    pub revised_by: IdentityRef,
    pub relations: ChangelogRelations,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IssueCommentResponse {
    pub id: i64,
    pub text: String,
    pub url: String,
    pub work_item_id: i64,
    pub created_by: IdentityRef,
    #[serde(deserialize_with = "lenient_date")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_date")]
    pub modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepoResponse {
    pub id: String,
    pub name: String,
    pub url: String,
    pub default_branch: String,
    pub remote_url: String,
    pub web_url: String,
    pub project: ProjectRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommitRef {
    pub commit_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReviewerResponse {
    pub id: String,
    pub display_name: String,
    pub unique_name: String,
    pub vote: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestResponse {
    pub pull_request_id: i64,
    pub status: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub is_draft: bool,
    #[serde(deserialize_with = "lenient_date")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_date")]
    pub closed_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_date")]
    pub completion_queue_time: Option<DateTime<Utc>>,
    pub created_by: IdentityRef,
    #[serde(rename = "sourceRefName")]
    pub source_branch: String,
    #[serde(rename = "targetRefName")]
    pub target_branch: String,
    pub last_merge_commit: Option<CommitRef>,
    pub repository: ProjectRef,
    pub reviewers: Vec<ReviewerResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestCommitRef {
    pub commit_id: String,
    pub comment: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChangeCounts {
    pub add: i64,
    pub delete: i64,
    pub edit: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushResponse {
    #[serde(deserialize_with = "lenient_date")]
    pub date: Option<DateTime<Utc>>,
    pub pushed_by: IdentityRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommitDetailResponse {
    pub comment: String,
    pub remote_url: String,
    pub change_counts: ChangeCounts,
    pub push: PushResponse,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThreadComment {
    pub id: i64,
    pub content: String,
    pub comment_type: String,
    pub author: IdentityRef,
    #[serde(deserialize_with = "lenient_date")]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_date")]
    pub last_updated_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThreadResponse {
    pub id: i64,
    pub comments: Vec<ThreadComment>,
    pub identities: HashMap<String, IdentityRef>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConsumerInputs {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PublisherInputs {
    pub project_id: String,
}

/// Service hook subscription, both as listed and as created.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Subscription {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub consumer_action_id: String,
    pub consumer_id: String,
    pub consumer_inputs: ConsumerInputs,
    pub event_type: String,
    pub publisher_id: String,
    pub publisher_inputs: PublisherInputs,
    pub resource_version: String,
    pub scope: i32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn zero_and_missing_dates_become_none() {
        let pr: PullRequestResponse = serde_json::from_value(json!({
            "pullRequestId": 3,
            "creationDate": "2024-02-01T10:00:00.123Z",
            "closedDate": "0001-01-01T00:00:00Z",
            "completionQueueTime": null
        }))
        .expect("decode");
        assert!(pr.creation_date.is_some());
        assert!(pr.closed_date.is_none());
        assert!(pr.completion_queue_time.is_none());
        assert!(pr.last_merge_commit.is_none());
    }

    #[test]
    fn work_item_fields_use_reference_names() {
        let item: WorkItemResponse = serde_json::from_value(json!({
            "id": 12,
            "fields": {
                "System.Title": "Broken build",
                "System.WorkItemType": "Bug",
                "System.AssignedTo": { "id": "u-1", "displayName": "Ada" },
                "Microsoft.VSTS.Common.Priority": 2
            },
            "_links": { "html": { "href": "https://dev.azure.com/x/_workitems/edit/12" } }
        }))
        .expect("decode");
        assert_eq!(item.fields.title, "Broken build");
        assert_eq!(item.fields.assigned_to.id, "u-1");
        assert_eq!(item.fields.priority, Some(2));
        assert!(item.links.html.href.ends_with("/12"));
    }

    #[test]
    fn changelog_accepts_lowercase_old_value() {
        let field: ChangelogField =
            serde_json::from_value(json!({ "oldvalue": "New", "newValue": "Active" }))
                .expect("decode");
        assert_eq!(field.old_value, Some(json!("New")));
    }
}
