use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{Credentials, RefreshError};
use crate::metrics::Metrics;
use crate::pipe::PipeError;
use crate::refid::RefIdError;
use crate::state::StateError;

pub const API_VERSION_PARAM: &str = "api-version";
pub const DEFAULT_API_VERSION: &str = "5.1";

const JSON: &str = "application/json";
const JSON_PATCH: &str = "application/json-patch+json";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api returned HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("failed to decode api response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to encode request payload: {0}")]
    Encode(serde_json::Error),
    #[error("invalid base url '{0}'")]
    InvalidBaseUrl(String),
    #[error("credential refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("page from {endpoint} reports count {count} but has no items under `value` or `comments`")]
    MalformedPage { endpoint: String, count: usize },
    #[error("page consumer hung up before pagination finished")]
    SinkClosed,
    #[error("refusing to match webhook subscriptions with an empty url marker")]
    EmptyWebhookMarker,
    #[error(transparent)]
    RefId(#[from] RefIdError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<ApiError>,
    },
}

impl ApiError {
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Context { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Query parameters, kept sorted so requests are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn with_default_api_version(mut self) -> Self {
        if self.get(API_VERSION_PARAM).map_or(true, str::is_empty) {
            self.set(API_VERSION_PARAM, DEFAULT_API_VERSION);
        }
        self
    }

    fn pairs(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

struct Body {
    content_type: &'static str,
    bytes: Vec<u8>,
}

/// Authenticated facade over the REST API. Cheap to clone; clones share the
/// connection pool, credentials and metrics.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    credentials: Arc<Credentials>,
    max_retries: usize,
    metrics: Arc<Metrics>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<Credentials>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().build()?;
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            http,
            credentials,
            max_retries: 3,
            metrics,
        })
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn get<T: DeserializeOwned>(&self, endpoint: &str, params: Params) -> Result<T, ApiError> {
        let body = self.execute(Method::GET, endpoint, params, None)?;
        decode(&body)
    }

    pub fn post<B, T>(&self, endpoint: &str, payload: &B, params: Params) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(Method::POST, endpoint, params, Some(encode(payload, JSON)?))?;
        decode(&body)
    }

    pub fn post_json_patch<B, T>(
        &self,
        endpoint: &str,
        payload: &B,
        params: Params,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(
            Method::POST,
            endpoint,
            params,
            Some(encode(payload, JSON_PATCH)?),
        )?;
        decode(&body)
    }

    pub fn patch<B, T>(&self, endpoint: &str, payload: &B, params: Params) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(Method::PATCH, endpoint, params, Some(encode(payload, JSON)?))?;
        decode(&body)
    }

    pub fn patch_json_patch<B, T>(
        &self,
        endpoint: &str,
        payload: &B,
        params: Params,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(
            Method::PATCH,
            endpoint,
            params,
            Some(encode(payload, JSON_PATCH)?),
        )?;
        decode(&body)
    }

    pub fn delete(&self, endpoint: &str, params: Params) -> Result<(), ApiError> {
        self.execute(Method::DELETE, endpoint, params, None)?;
        Ok(())
    }

    fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: Params,
        body: Option<Body>,
    ) -> Result<String, ApiError> {
        let params = params.with_default_api_version();
        let url = self.url(endpoint);

        let token_used = self.credentials.access_token();
        let mut response = self.send(&method, &url, &params, body.as_ref())?;

        if response.status() == StatusCode::UNAUTHORIZED && self.credentials.can_refresh() {
            tracing::info!(endpoint, "access token rejected, refreshing once");
            if self.credentials.refresh_if_stale(token_used.as_deref())? {
                self.metrics.inc_token_refresh();
            }
            response = self.send(&method, &url, &params, body.as_ref())?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }
        Ok(response.text()?)
    }

    fn send(
        &self,
        method: &Method,
        url: &str,
        params: &Params,
        body: Option<&Body>,
    ) -> Result<Response, ApiError> {
        let query = params.pairs();
        self.request_with_retry(|| {
            let mut builder = self.http.request(method.clone(), url).query(&query);
            builder = self.credentials.authorize(builder);
            if let Some(body) = body {
                builder = builder
                    .header(CONTENT_TYPE, body.content_type)
                    .body(body.bytes.clone());
            }
            builder.send()
        })
    }

    /// Retries throttling and server errors below the facade; every other
    /// status is handed back to the caller untouched.
    fn request_with_retry<F>(&self, mut send: F) -> Result<Response, ApiError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        let mut attempt = 0;
        loop {
            self.metrics.inc_api_request();
            let response = match send() {
                Ok(resp) => resp,
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "api transport error");
                    return Err(ApiError::Request(err));
                }
            };

            if !is_retryable(response.status()) || attempt >= self.max_retries {
                if !response.status().is_success() {
                    tracing::warn!(
                        status = %response.status(),
                        attempts = attempt + 1,
                        "api request completed with error status"
                    );
                }
                return Ok(response);
            }

            let wait = retry_after_or_backoff(&response, attempt);
            tracing::debug!(
                status = %response.status(),
                attempt = attempt + 1,
                ?wait,
                "retryable api status"
            );
            self.metrics.inc_retry();
            thread::sleep(wait);
            attempt += 1;
        }
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

fn encode<B: Serialize + ?Sized>(payload: &B, content_type: &'static str) -> Result<Body, ApiError> {
    let bytes = serde_json::to_vec(payload).map_err(ApiError::Encode)?;
    Ok(Body {
        content_type,
        bytes,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let raw = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(raw).map_err(|source| {
        let short_body = if body.len() > 1000 {
            let mut end = 1000;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &body[..end])
        } else {
            body.to_string()
        };
        tracing::warn!(body = %short_body, "failed decoding api response");
        ApiError::Decode {
            source,
            body: short_body,
        }
    })
}

/// Percent-encodes one path segment.
pub fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn normalize_base_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidBaseUrl(raw.to_string()));
    }

    let candidate = if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed =
        reqwest::Url::parse(&candidate).map_err(|_| ApiError::InvalidBaseUrl(raw.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_or_backoff(response: &Response, attempt: usize) -> Duration {
    if let Some(header) = response.headers().get("Retry-After") {
        if let Ok(value) = header.to_str() {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds.min(30));
            }
        }
    }

    let seconds = 1_u64 << attempt.min(4);
    Duration::from_secs(seconds)
}
