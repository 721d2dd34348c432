use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::responses::{parse_date, ChangelogField, ChangelogResponse, RelationChange};
use super::{project_path, Api};
use crate::http::{ApiError, Params};
use crate::model::{ChangeLogField, EntityIds, IssueChangeLog};
use crate::paginate::TOP_PARAM;
use crate::refid::{RefContext, RefIdTranslator};

const CHANGELOG_PAGE_SIZE: usize = 200;
const PARENT_FIELD: &str = "parent";
const PARENT_RELATION: &str = "Parent";
const CHANGED_DATE_FIELD: &str = "System.ChangedDate";

/// How a revision field's raw values turn into `from`/`to` strings.
#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Text,
    User,
    Tags,
    Project,
    Sprint,
    Issue,
}

fn tracked_field(name: &str) -> Option<(ChangeLogField, ValueKind)> {
    let tracked = match name {
        "System.State" => (ChangeLogField::Status, ValueKind::Text),
        "Microsoft.VSTS.Common.ResolvedReason" => (ChangeLogField::Resolution, ValueKind::Text),
        "System.AssignedTo" => (ChangeLogField::AssigneeRefId, ValueKind::User),
        "System.CreatedBy" => (ChangeLogField::ReporterRefId, ValueKind::User),
        "System.Title" => (ChangeLogField::Title, ValueKind::Text),
        "Microsoft.VSTS.Scheduling.DueDate" => (ChangeLogField::DueDate, ValueKind::Text),
        "System.WorkItemType" => (ChangeLogField::Type, ValueKind::Text),
        "System.Tags" => (ChangeLogField::Tags, ValueKind::Tags),
        "Microsoft.VSTS.Common.Priority" => (ChangeLogField::Priority, ValueKind::Text),
        "System.TeamProject" => (ChangeLogField::ProjectId, ValueKind::Project),
        "System.IterationPath" => (ChangeLogField::SprintIds, ValueKind::Sprint),
        PARENT_FIELD => (ChangeLogField::ParentId, ValueKind::Issue),
        _ => return None,
    };
    Some(tracked)
}

fn value_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn user_id(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Work item id at the end of a relation url.
fn related_item_id(relation: &RelationChange) -> Value {
    let id = relation.url.rsplit('/').next().unwrap_or_default();
    Value::String(id.to_string())
}

/// Folds parent relation changes into a synthetic `parent` field.
fn synthesize_parent(revision: &ChangelogResponse, fields: &mut BTreeMap<String, ChangelogField>) {
    let is_parent = |r: &&RelationChange| r.attributes.name == PARENT_RELATION;
    if let Some(added) = revision.relations.added.iter().find(is_parent) {
        fields.insert(
            PARENT_FIELD.to_string(),
            ChangelogField {
                new_value: Some(related_item_id(added)),
                old_value: None,
            },
        );
    }
    if let Some(removed) = revision.relations.removed.iter().find(is_parent) {
        fields.entry(PARENT_FIELD.to_string()).or_default().old_value =
            Some(related_item_id(removed));
    }
}

fn created_date(revision: &ChangelogResponse) -> Option<DateTime<Utc>> {
    let changed = revision
        .fields
        .as_ref()
        .and_then(|fields| fields.get(CHANGED_DATE_FIELD));
    match changed {
        Some(field) => parse_date(&value_string(field.new_value.as_ref())),
        None => revision.revised_date,
    }
}

/// Turns the revision history of one work item into change log entries.
///
/// Revisions are pushed in server order, possibly across several pages.
/// The first revision only records creation, so its fields without an old
/// value are dropped. A state cleared in one revision and set in a later
/// one is reported as a single transition.
pub struct ChangelogNormalizer<'a> {
    ids: &'a EntityIds,
    translator: &'a RefIdTranslator,
    project_id: String,
    previous_state: String,
    ordinal: i64,
    entries: Vec<IssueChangeLog>,
}

impl<'a> ChangelogNormalizer<'a> {
    pub fn new(ids: &'a EntityIds, translator: &'a RefIdTranslator, project_id: &str) -> Self {
        Self {
            ids,
            translator,
            project_id: project_id.to_string(),
            previous_state: String::new(),
            ordinal: 0,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, revision: ChangelogResponse) {
        let ordinal = self.ordinal;
        self.ordinal += 1;

        let Some(raw_fields) = revision.fields.clone() else {
            return;
        };
        let mut fields: BTreeMap<String, ChangelogField> = raw_fields.into_iter().collect();
        synthesize_parent(&revision, &mut fields);
        let created_date = created_date(&revision);

        for (name, values) in &fields {
            let Some((field, kind)) = tracked_field(name) else {
                continue;
            };
            if ordinal == 0 && value_string(values.old_value.as_ref()).is_empty() {
                continue;
            }
            let (mut from, to) = self.convert(kind, values);
            if from.is_empty() && to.is_empty() {
                continue;
            }

            if field == ChangeLogField::Status {
                if to.is_empty() {
                    self.previous_state = from;
                    continue;
                }
                if from.is_empty() && !self.previous_state.is_empty() {
                    from = std::mem::take(&mut self.previous_state);
                }
                if from == to {
                    continue;
                }
            }

            self.entries.push(IssueChangeLog {
                ref_id: revision.id.to_string(),
                field,
                from,
                to,
                ordinal,
                user_id: revision.revised_by.id.clone(),
                created_date,
            });
        }
    }

    /// Entries sorted by creation date, and the latest change date.
    pub fn finish(mut self) -> (Vec<IssueChangeLog>, Option<DateTime<Utc>>) {
        self.entries.sort_by_key(|entry| entry.created_date);
        let latest = self.entries.last().and_then(|entry| entry.created_date);
        (self.entries, latest)
    }

    fn convert(&self, kind: ValueKind, values: &ChangelogField) -> (String, String) {
        let old = values.old_value.as_ref();
        let new = values.new_value.as_ref();
        match kind {
            ValueKind::Text => (value_string(old), value_string(new)),
            ValueKind::User => (user_id(old), user_id(new)),
            ValueKind::Tags => (
                value_string(old).replace("; ", ","),
                value_string(new).replace("; ", ","),
            ),
            ValueKind::Project => (
                self.derived(old, |raw| self.ids.project(raw)),
                self.derived(new, |raw| self.ids.project(raw)),
            ),
            ValueKind::Sprint => (
                self.derived(old, |raw| self.ids.sprint(raw)),
                self.derived(new, |raw| self.ids.sprint(raw)),
            ),
            ValueKind::Issue => (self.issue_id(old), self.issue_id(new)),
        }
    }

    fn derived(&self, value: Option<&Value>, derive: impl Fn(&str) -> String) -> String {
        let raw = value_string(value);
        if raw.is_empty() {
            raw
        } else {
            derive(&raw)
        }
    }

    fn issue_id(&self, value: Option<&Value>) -> String {
        let Ok(issue_id) = value_string(value).parse::<i64>() else {
            return String::new();
        };
        let ref_id = self.translator.ref_id_for(&RefContext::Issue {
            project_id: self.project_id.clone(),
            issue_id,
        });
        self.ids.issue(&ref_id)
    }
}

impl Api {
    /// Change history of one work item and the date of its latest change.
    pub fn fetch_changelog(
        &self,
        project_id: &str,
        issue_id: i64,
    ) -> Result<(Vec<IssueChangeLog>, Option<DateTime<Utc>>), ApiError> {
        let endpoint = project_path(project_id, &format!("_apis/wit/workItems/{issue_id}/updates"));
        let mut normalizer = ChangelogNormalizer::new(self.ids(), self.translator(), project_id);
        self.client().paginate_as(
            &endpoint,
            Params::new().with(TOP_PARAM, CHANGELOG_PAGE_SIZE),
            |revisions: Vec<ChangelogResponse>| {
                for revision in revisions {
                    normalizer.push(revision);
                }
                Ok(())
            },
        )?;
        Ok(normalizer.finish())
    }
}
