use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use azdo_export::api::{
    Api, ApiSettings, IssueCreate, IssueUpdateRequest, PullRequestUpdate, WebhookSettings,
};
use azdo_export::auth::{Credentials, OAuthTokenEndpoint};
use azdo_export::config::{self, AppConfig, AppConfigOverrides, AuthConfig};
use azdo_export::export::Exporter;
use azdo_export::http::ApiClient;
use azdo_export::logging;
use azdo_export::metrics::{spawn_metrics_logger, Metrics};
use azdo_export::model::EntityIds;
use azdo_export::pipe::{JsonLinesPipe, Pipe};
use azdo_export::state::{SqliteState, StateStore};
use azdo_export::webhook;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

#[derive(Debug, Parser)]
#[command(name = "azdo-export", version, about = "Export Azure DevOps work tracking and source control data")]
struct Cli {
    /// Config file; defaults to $XDG_CONFIG_HOME/azdo-export/config.toml.
    #[arg(long, env = "AZDO_EXPORT_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    customer_id: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    state_db: Option<String>,
    /// Output file; `-` writes to stdout.
    #[arg(long)]
    output: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export every project, incrementally where a checkpoint exists.
    Export {
        /// Ignore checkpoints and export all history.
        #[arg(long)]
        full: bool,
    },
    /// Manage service hook subscriptions.
    Webhooks {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Apply one webhook delivery read from a file.
    Webhook {
        #[arg(long)]
        payload: PathBuf,
    },
    CreateIssue {
        #[arg(long)]
        payload: PathBuf,
    },
    UpdateIssue {
        #[arg(long)]
        ref_id: String,
        #[arg(long)]
        payload: PathBuf,
    },
    UpdatePullRequest {
        #[arg(long)]
        ref_id: String,
        #[arg(long)]
        payload: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum WebhookAction {
    /// Replace our subscriptions with fresh ones for every project.
    Register,
    /// Delete our subscriptions and forget the recorded ids.
    Remove,
}

impl Cli {
    fn overrides(&self) -> AppConfigOverrides {
        AppConfigOverrides {
            azure_base_url: self.base_url.clone(),
            azure_customer_id: self.customer_id.clone(),
            export_concurrency: self.concurrency,
            export_issue_batch_size: None,
            state_db_path: self.state_db.clone(),
            output_path: self
                .output
                .as_ref()
                .map(|path| if path == "-" { String::new() } else { path.clone() }),
            logging_debug: self.debug.then_some(true),
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load()?,
    };
    cfg.apply_overrides(&cli.overrides())?;
    Ok(cfg)
}

fn credentials(auth: &AuthConfig) -> Result<Credentials, Box<dyn std::error::Error>> {
    Ok(match auth {
        AuthConfig::Basic { username, api_key } => Credentials::basic(username.as_str(), api_key.as_str()),
        AuthConfig::Oauth {
            access_token,
            refresh_token,
            token_url,
            client_secret,
            redirect_uri,
        } => {
            let endpoint = OAuthTokenEndpoint::new(
                token_url.clone(),
                client_secret.clone(),
                redirect_uri.clone(),
            )?;
            Credentials::oauth(access_token.as_str(), refresh_token.as_str(), Arc::new(endpoint))
        }
    })
}

fn read_payload<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read(path)
        .map_err(|err| format!("failed to read payload {}: {err}", path.display()))?;
    serde_json::from_slice(&raw)
        .map_err(|err| format!("failed to parse payload {}: {err}", path.display()).into())
}

fn webhook_settings(cfg: &AppConfig) -> WebhookSettings {
    WebhookSettings::new(
        cfg.webhooks.hook_url_template.as_str(),
        cfg.webhooks.url_marker.as_str(),
    )
}

fn register_webhooks(api: &Api, settings: &WebhookSettings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.hook_url_template.is_empty() {
        return Err("webhooks.hook_url_template must be set to register webhooks".into());
    }
    let projects = api.fetch_projects()?;
    api.remove_webhooks(settings)?;
    for project in &projects {
        let ids = api.register_webhooks(&project.id, settings)?;
        tracing::info!(project_id = %project.id, count = ids.len(), "registered webhooks");
    }
    api.state().flush()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    logging::init(&cfg.logging);

    let metrics = Arc::new(Metrics::new());
    spawn_metrics_logger(
        Arc::clone(&metrics),
        Duration::from_secs(cfg.metrics.interval_secs.max(1)),
    );

    let db_path = cfg.state.resolved_db_path();
    tracing::info!(
        base_url = %cfg.azure.base_url,
        customer_id = %cfg.azure.customer_id,
        state_db = %db_path.display(),
        concurrency = cfg.export.concurrency,
        "starting azdo-export"
    );

    let state: Arc<dyn StateStore> = Arc::new(SqliteState::open(&db_path)?);
    let pipe: Arc<dyn Pipe> =
        Arc::new(JsonLinesPipe::open(&cfg.output.path)?.with_metrics(Arc::clone(&metrics)));
    let client = ApiClient::new(
        &cfg.azure.base_url,
        Arc::new(credentials(&cfg.azure.auth)?),
        Arc::clone(&metrics),
    )?;
    let settings = ApiSettings {
        concurrency: cfg.export.concurrency,
        issue_batch_size: cfg.export.issue_batch_size,
        page_size: cfg.export.page_size,
        active_issue_states: cfg.export.active_issue_states.clone(),
    };
    let api = Api::new(
        client,
        Arc::clone(&state),
        Arc::clone(&pipe),
        EntityIds::new(cfg.azure.customer_id.as_str(), cfg.azure.ref_type.as_str()),
        settings,
    );

    match &cli.command {
        Command::Export { full } => {
            let summary = Exporter::new(api, Arc::clone(&pipe)).run(*full)?;
            tracing::info!(?summary, "export complete");
        }
        Command::Webhooks { action } => {
            let settings = webhook_settings(&cfg);
            match action {
                WebhookAction::Register => register_webhooks(&api, &settings)?,
                WebhookAction::Remove => {
                    let project_ids: Vec<String> =
                        api.fetch_projects()?.into_iter().map(|p| p.id).collect();
                    let removed = api.unregister_webhooks(&project_ids, &settings)?;
                    tracing::info!(removed, "removed webhooks");
                }
            }
        }
        Command::Webhook { payload } => {
            let body = std::fs::read(payload)
                .map_err(|err| format!("failed to read payload {}: {err}", payload.display()))?;
            let outcome = webhook::handle(&api, &body)?;
            tracing::info!(?outcome, "webhook applied");
        }
        Command::CreateIssue { payload } => {
            let issue: IssueCreate = read_payload(payload)?;
            let ref_id = api.create_issue(&issue)?;
            state.flush()?;
            println!("{ref_id}");
        }
        Command::UpdateIssue { ref_id, payload } => {
            let update: IssueUpdateRequest = read_payload(payload)?;
            api.update_issue(ref_id, &update)?;
        }
        Command::UpdatePullRequest { ref_id, payload } => {
            let update: PullRequestUpdate = read_payload(payload)?;
            api.update_pull_request(ref_id, &update)?;
        }
    }

    pipe.flush()?;
    Ok(())
}
