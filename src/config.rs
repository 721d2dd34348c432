use std::ffi::OsString;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub azure: AzureConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct AzureConfig {
    pub base_url: String,
    pub customer_id: String,
    #[serde(default = "default_ref_type")]
    pub ref_type: String,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    Basic {
        #[serde(default)]
        username: String,
        api_key: String,
    },
    Oauth {
        access_token: String,
        refresh_token: String,
        token_url: String,
        client_secret: String,
        redirect_uri: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_issue_batch_size")]
    pub issue_batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_active_issue_states")]
    pub active_issue_states: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            issue_batch_size: default_issue_batch_size(),
            page_size: default_page_size(),
            active_issue_states: default_active_issue_states(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateConfig {
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

impl StateConfig {
    /// `db_path` with a leading `~/` expanded against `HOME`.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path, std::env::var_os("HOME"))
    }
}

fn expand_home(raw: &str, home: Option<OsString>) -> PathBuf {
    match (raw.strip_prefix("~/"), home.filter(|h| !h.is_empty())) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(raw),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputConfig {
    /// Empty means stdout.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub hook_url_template: String,
    /// Empty means the template up to `{project}`.
    #[serde(default)]
    pub url_marker: String,
}

impl WebhookConfig {
    pub fn effective_marker(&self) -> &str {
        match self.url_marker.trim() {
            "" => crate::api::derived_marker(&self.hook_url_template),
            explicit => explicit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub azure_base_url: Option<String>,
    pub azure_customer_id: Option<String>,
    pub export_concurrency: Option<usize>,
    pub export_issue_batch_size: Option<usize>,
    pub state_db_path: Option<String>,
    pub output_path: Option<String>,
    pub logging_debug: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {path}. expected at $XDG_CONFIG_HOME/azdo-export/config.toml or ~/.config/azdo-export/config.toml")]
    MissingConfigFile { path: PathBuf },
    #[error("failed to resolve config path: HOME is not set and XDG_CONFIG_HOME is unset")]
    MissingHomeDirectory,
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub const MAX_ISSUE_BATCH_SIZE: usize = 200;

pub fn load() -> Result<AppConfig, ConfigError> {
    let path = resolve_config_path()?;
    load_from(&path)
}

pub fn load_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let path = path.to_path_buf();
    let raw = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingConfigFile { path: path.clone() }
        } else {
            ConfigError::ReadFailed {
                path: path.clone(),
                source,
            }
        }
    })?;

    let cfg = toml::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::ParseFailed {
        path: path.clone(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME");
    let home = std::env::var_os("HOME");
    resolve_config_path_from_env(xdg_config_home, home)
}

fn resolve_config_path_from_env(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = xdg_config_home.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("azdo-export").join("config.toml"));
    }

    let home = home
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingHomeDirectory)?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("azdo-export")
        .join("config.toml"))
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.azure_base_url {
            self.azure.base_url = value.clone();
        }
        if let Some(value) = &overrides.azure_customer_id {
            self.azure.customer_id = value.clone();
        }
        if let Some(value) = overrides.export_concurrency {
            self.export.concurrency = value;
        }
        if let Some(value) = overrides.export_issue_batch_size {
            self.export.issue_batch_size = value;
        }
        if let Some(value) = &overrides.state_db_path {
            self.state.db_path = value.clone();
        }
        if let Some(value) = &overrides.output_path {
            self.output.path = value.clone();
        }
        if let Some(value) = overrides.logging_debug {
            self.logging.debug = value;
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.azure.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "azure.base_url must not be empty".into(),
            ));
        }
        if self.azure.customer_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "azure.customer_id must not be empty".into(),
            ));
        }
        if self.azure.ref_type.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "azure.ref_type must not be empty".into(),
            ));
        }
        match &self.azure.auth {
            AuthConfig::Basic { api_key, .. } => {
                if api_key.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "azure.auth.api_key must not be empty".into(),
                    ));
                }
            }
            AuthConfig::Oauth {
                access_token,
                refresh_token,
                token_url,
                ..
            } => {
                if access_token.trim().is_empty() || refresh_token.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "azure.auth access_token and refresh_token must not be empty".into(),
                    ));
                }
                if token_url.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "azure.auth.token_url must not be empty".into(),
                    ));
                }
            }
        }
        if self.export.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "export.concurrency must be > 0".into(),
            ));
        }
        if self.export.issue_batch_size == 0 || self.export.issue_batch_size > MAX_ISSUE_BATCH_SIZE
        {
            return Err(ConfigError::Invalid(format!(
                "export.issue_batch_size must be between 1 and {MAX_ISSUE_BATCH_SIZE}"
            )));
        }
        if self.export.page_size == 0 {
            return Err(ConfigError::Invalid("export.page_size must be > 0".into()));
        }
        if self.state.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "state.db_path must not be empty".into(),
            ));
        }
        if !self.webhooks.hook_url_template.is_empty()
            && !self.webhooks.hook_url_template.contains("{project}")
        {
            return Err(ConfigError::Invalid(
                "webhooks.hook_url_template must contain {project}".into(),
            ));
        }
        if !self.webhooks.hook_url_template.is_empty() && self.webhooks.effective_marker().is_empty()
        {
            return Err(ConfigError::Invalid(
                "webhooks.url_marker must be set when hook_url_template starts with {project}"
                    .into(),
            ));
        }
        if self.metrics.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "metrics.interval_secs must be > 0".into(),
            ));
        }

        Ok(())
    }
}

fn default_ref_type() -> String {
    "azure".to_string()
}

const fn default_concurrency() -> usize {
    10
}

const fn default_issue_batch_size() -> usize {
    MAX_ISSUE_BATCH_SIZE
}

const fn default_page_size() -> usize {
    100
}

/// Work item states exported on incremental runs.
pub fn default_active_issue_states() -> Vec<String> {
    ["New", "Active", "Proposed", "Committed", "In Progress", "To Do", "Doing"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_metrics_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_prefers_xdg_config_home() {
        let path = resolve_config_path_from_env(
            Some(OsString::from("/tmp/xdg-home")),
            Some(OsString::from("/tmp/home")),
        )
        .expect("xdg path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/xdg-home/azdo-export/config.toml"));
    }

    #[test]
    fn resolve_path_falls_back_to_home_dot_config() {
        let path = resolve_config_path_from_env(None, Some(OsString::from("/tmp/home")))
            .expect("home path should resolve");

        assert_eq!(
            path,
            PathBuf::from("/tmp/home/.config/azdo-export/config.toml")
        );
    }

    #[test]
    fn resolve_path_requires_home_when_xdg_missing() {
        let err = resolve_config_path_from_env(None, None).expect_err("resolution should fail");
        assert!(matches!(err, ConfigError::MissingHomeDirectory));
    }

    #[test]
    fn db_path_expands_leading_tilde() {
        assert_eq!(
            expand_home("~/state/azdo.db", Some(OsString::from("/home/ada"))),
            PathBuf::from("/home/ada/state/azdo.db")
        );
        assert_eq!(
            expand_home("/var/lib/azdo.db", Some(OsString::from("/home/ada"))),
            PathBuf::from("/var/lib/azdo.db")
        );
        assert_eq!(expand_home("~/azdo.db", None), PathBuf::from("~/azdo.db"));
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let raw = r#"
            [azure]
            base_url = "https://dev.azure.com/contoso"
            customer_id = "cust-1"
            [azure.auth]
            kind = "basic"
            api_key = "pat"

            [state]
            db_path = "/tmp/azdo-state.db"
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        cfg.validate().expect("minimal config should validate");
        assert_eq!(cfg.azure.ref_type, "azure");
        assert_eq!(cfg.export.concurrency, 10);
        assert_eq!(cfg.export.issue_batch_size, 200);
        assert_eq!(cfg.export.page_size, 100);
        assert!(cfg.output.path.is_empty());
        assert!(cfg.webhooks.effective_marker().is_empty());
    }

    #[test]
    fn url_marker_defaults_to_template_prefix() {
        let raw = r#"
            [azure]
            base_url = "https://dev.azure.com/contoso"
            customer_id = "cust-1"
            [azure.auth]
            kind = "basic"
            api_key = "pat"

            [state]
            db_path = "/tmp/azdo-state.db"

            [webhooks]
            hook_url_template = "https://hooks.example.com/azure/{project}/hook"
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        cfg.validate().expect("derived marker should validate");
        assert_eq!(
            cfg.webhooks.effective_marker(),
            "https://hooks.example.com/azure/"
        );
    }

    #[test]
    fn validates_rejects_template_without_marker_prefix() {
        let raw = r#"
            [azure]
            base_url = "https://dev.azure.com/contoso"
            customer_id = "cust-1"
            [azure.auth]
            kind = "basic"
            api_key = "pat"

            [state]
            db_path = "/tmp/azdo-state.db"

            [webhooks]
            hook_url_template = "{project}/hook"
            url_marker = "   "
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        let err = cfg.validate().expect_err("empty marker should fail");
        assert!(err.to_string().contains("url_marker"));
    }

    #[test]
    fn validates_rejects_oversized_issue_batches() {
        let raw = r#"
            [azure]
            base_url = "https://dev.azure.com/contoso"
            customer_id = "cust-1"
            [azure.auth]
            kind = "basic"
            api_key = "pat"

            [export]
            issue_batch_size = 500

            [state]
            db_path = "/tmp/azdo-state.db"
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        let err = cfg.validate().expect_err("batch size above 200 should fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validates_rejects_non_positive_values() {
        let raw = r#"
            [azure]
            base_url = "https://dev.azure.com/contoso"
            customer_id = "cust-1"
            [azure.auth]
            kind = "basic"
            api_key = "pat"

            [export]
            concurrency = 0

            [state]
            db_path = "/tmp/azdo-state.db"

            [metrics]
            interval_secs = 0
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        let err = cfg.validate().expect_err("invalid values should fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_example_parses() {
        let raw = include_str!("../config.example.toml");
        let cfg: AppConfig = toml::from_str(raw).expect("example config should parse");
        cfg.validate().expect("example config should validate");
        assert!(matches!(cfg.azure.auth, AuthConfig::Oauth { .. }));
    }

    #[test]
    fn apply_overrides_updates_values() {
        let raw = include_str!("../config.example.toml");
        let mut cfg: AppConfig = toml::from_str(raw).expect("example config should parse");

        let overrides = AppConfigOverrides {
            azure_base_url: Some("https://dev.azure.com/override".into()),
            azure_customer_id: Some("cust-override".into()),
            export_concurrency: Some(4),
            export_issue_batch_size: Some(50),
            state_db_path: Some("/tmp/override.db".into()),
            output_path: Some("/tmp/out.jsonl".into()),
            logging_debug: Some(true),
        };

        cfg.apply_overrides(&overrides)
            .expect("overrides should validate");

        assert_eq!(cfg.azure.base_url, "https://dev.azure.com/override");
        assert_eq!(cfg.azure.customer_id, "cust-override");
        assert_eq!(cfg.export.concurrency, 4);
        assert_eq!(cfg.export.issue_batch_size, 50);
        assert_eq!(cfg.state.db_path, "/tmp/override.db");
        assert_eq!(cfg.output.path, "/tmp/out.jsonl");
        assert!(cfg.logging.debug);
    }
}
