use std::fmt;
use std::sync::{Arc, Mutex};

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;

const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const REFRESH_GRANT: &str = "refresh_token";

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present when the provider rotates the refresh token.
    pub refresh_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("token refresh request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned HTTP {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode token response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError>;
}

/// Azure DevOps OAuth token endpoint using the JWT-bearer client assertion flow.
pub struct OAuthTokenEndpoint {
    http: Client,
    token_url: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthTokenEndpoint {
    pub fn new(
        token_url: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Result<Self, RefreshError> {
        Ok(Self {
            http: Client::builder().build()?,
            token_url,
            client_secret,
            redirect_uri,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenRefresher for OAuthTokenEndpoint {
    fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        let form = [
            ("client_assertion_type", JWT_BEARER_ASSERTION),
            ("client_assertion", self.client_secret.as_str()),
            ("grant_type", REFRESH_GRANT),
            ("assertion", refresh_token),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let response = self.http.post(&self.token_url).form(&form).send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(RefreshError::Rejected { status, body });
        }
        let payload: TokenResponse = serde_json::from_str(&body)?;
        Ok(RefreshedToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.filter(|token| !token.is_empty()),
        })
    }
}

struct TokenPair {
    access: String,
    refresh: String,
}

pub struct OAuthCredentials {
    tokens: Mutex<TokenPair>,
    refresher: Arc<dyn TokenRefresher>,
}

/// Credentials shared by every request issued through one client.
pub enum Credentials {
    Basic { username: String, password: String },
    OAuth(OAuthCredentials),
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn oauth(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self::OAuth(OAuthCredentials {
            tokens: Mutex::new(TokenPair {
                access: access_token.into(),
                refresh: refresh_token.into(),
            }),
            refresher,
        })
    }

    pub fn can_refresh(&self) -> bool {
        matches!(self, Self::OAuth(_))
    }

    /// The bearer token currently in use, if any.
    pub fn access_token(&self) -> Option<String> {
        match self {
            Self::Basic { .. } => None,
            Self::OAuth(oauth) => Some(
                oauth
                    .tokens
                    .lock()
                    .expect("credential mutex poisoned")
                    .access
                    .clone(),
            ),
        }
    }

    pub fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Self::OAuth(oauth) => {
                let tokens = oauth.tokens.lock().expect("credential mutex poisoned");
                builder.bearer_auth(&tokens.access)
            }
        }
    }

    /// Refreshes the access token unless another caller already replaced
    /// `stale_token`. Returns whether a refresh call was made.
    pub fn refresh_if_stale(&self, stale_token: Option<&str>) -> Result<bool, RefreshError> {
        let Self::OAuth(oauth) = self else {
            return Ok(false);
        };
        let mut tokens = oauth.tokens.lock().expect("credential mutex poisoned");
        if let Some(stale) = stale_token {
            if tokens.access != stale {
                return Ok(false);
            }
        }
        let refreshed = oauth.refresher.refresh(&tokens.refresh)?;
        tokens.access = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            tokens.refresh = rotated;
        }
        Ok(true)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::OAuth(_) => f
                .debug_struct("OAuth")
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}
