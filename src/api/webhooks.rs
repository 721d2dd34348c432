use std::sync::{Arc, Mutex};

use super::responses::{ConsumerInputs, PublisherInputs, Subscription};
use super::Api;
use crate::checkpoint::CheckpointManager;
use crate::http::{escape, ApiError, Params};

/// Service hook events a project subscribes to.
pub const WEBHOOK_EVENT_TYPES: &[&str] = &[
    "git.push",
    "git.pullrequest.created",
    "git.pullrequest.merged",
    "git.pullrequest.updated",
    "workitem.created",
    "workitem.deleted",
    "workitem.restored",
    "workitem.updated",
    "workitem.commented",
];

const SUBSCRIPTIONS_ENDPOINT: &str = "_apis/hooks/subscriptions";
const PUBLISHER_ID: &str = "tfs";
const CONSUMER_ID: &str = "webHooks";
const CONSUMER_ACTION_ID: &str = "httpRequest";
const RESOURCE_VERSION: &str = "1.0";
const PROJECT_SCOPE: i32 = 1;

const PROJECT_PLACEHOLDER: &str = "{project}";

#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    /// Consumer url; `{project}` is replaced by the project id.
    pub hook_url_template: String,
    /// Subscriptions whose consumer url contains this are ours.
    pub url_marker: String,
}

impl WebhookSettings {
    /// A blank `url_marker` falls back to the template up to `{project}`.
    pub fn new(hook_url_template: impl Into<String>, url_marker: impl Into<String>) -> Self {
        let hook_url_template = hook_url_template.into();
        let url_marker = url_marker.into();
        let url_marker = match url_marker.trim() {
            "" => derived_marker(&hook_url_template).to_string(),
            explicit => explicit.to_string(),
        };
        Self {
            hook_url_template,
            url_marker,
        }
    }

    pub fn hook_url(&self, project_id: &str) -> String {
        self.hook_url_template.replace(PROJECT_PLACEHOLDER, project_id)
    }
}

/// Host and path prefix shared by every project's hook url.
pub fn derived_marker(hook_url_template: &str) -> &str {
    hook_url_template
        .split(PROJECT_PLACEHOLDER)
        .next()
        .unwrap_or_default()
        .trim()
}

impl Api {
    /// Deletes every subscription pointing at our hook url. Returns how many
    /// were removed.
    pub fn remove_webhooks(&self, settings: &WebhookSettings) -> Result<usize, ApiError> {
        if settings.url_marker.trim().is_empty() {
            return Err(ApiError::EmptyWebhookMarker);
        }
        let params = Params::new()
            .with("publisherId", PUBLISHER_ID)
            .with("consumerId", CONSUMER_ID)
            .with("consumerActionId", CONSUMER_ACTION_ID);
        let subscriptions: Vec<Subscription> = self
            .client()
            .paginate_all(SUBSCRIPTIONS_ENDPOINT, params)
            .map_err(|err| err.context("listing webhook subscriptions"))?;

        let ours: Vec<String> = subscriptions
            .into_iter()
            .filter(|s| !s.id.is_empty() && s.consumer_inputs.url.contains(&settings.url_marker))
            .map(|s| s.id)
            .collect();

        let batch = self.batch();
        for id in &ours {
            let api = self.clone();
            let endpoint = format!("{SUBSCRIPTIONS_ENDPOINT}/{}", escape(id));
            batch.submit(move || api.client().delete(&endpoint, Params::new()));
        }
        batch
            .wait()
            .map_err(|err| err.context("deleting webhook subscriptions"))?;
        tracing::info!(count = ours.len(), "removed webhooks");
        Ok(ours.len())
    }

    /// Removes our subscriptions, then forgets the ids recorded for each of
    /// `project_ids` and flushes state.
    pub fn unregister_webhooks(
        &self,
        project_ids: &[String],
        settings: &WebhookSettings,
    ) -> Result<usize, ApiError> {
        let removed = self.remove_webhooks(settings)?;
        let checkpoints = CheckpointManager::new(Arc::clone(self.state()));
        for project_id in project_ids {
            checkpoints.set_webhook_ids(project_id, &[])?;
        }
        self.state().flush()?;
        Ok(removed)
    }

    /// Subscribes the project to every event type and records the
    /// subscription ids in state.
    pub fn register_webhooks(
        &self,
        project_id: &str,
        settings: &WebhookSettings,
    ) -> Result<Vec<String>, ApiError> {
        tracing::info!(project_id, "creating webhooks");
        let url = settings.hook_url(project_id);
        let created = Arc::new(Mutex::new(Vec::new()));

        let batch = self.batch();
        for event_type in WEBHOOK_EVENT_TYPES {
            let api = self.clone();
            let created = Arc::clone(&created);
            let subscription = Subscription {
                id: String::new(),
                consumer_action_id: CONSUMER_ACTION_ID.to_string(),
                consumer_id: CONSUMER_ID.to_string(),
                consumer_inputs: ConsumerInputs { url: url.clone() },
                event_type: event_type.to_string(),
                publisher_id: PUBLISHER_ID.to_string(),
                publisher_inputs: PublisherInputs {
                    project_id: project_id.to_string(),
                },
                resource_version: RESOURCE_VERSION.to_string(),
                scope: PROJECT_SCOPE,
            };
            batch.submit(move || {
                let response: Subscription =
                    api.client()
                        .post(SUBSCRIPTIONS_ENDPOINT, &subscription, Params::new())?;
                tracing::debug!(event_type = %subscription.event_type, id = %response.id, "created webhook");
                created
                    .lock()
                    .expect("webhook id mutex poisoned")
                    .push(response.id);
                Ok(())
            });
        }
        batch
            .wait()
            .map_err(|err| err.context(format!("creating webhooks for project {project_id}")))?;

        let mut ids = std::mem::take(&mut *created.lock().expect("webhook id mutex poisoned"));
        ids.sort();
        CheckpointManager::new(Arc::clone(self.state())).set_webhook_ids(project_id, &ids)?;
        Ok(ids)
    }
}
