//! Low-level HTTP client for the Tidepool API.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glucolink_core::{Reading, ReadingError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;

/// Response header carrying the session token after a successful login.
const SESSION_TOKEN_HEADER: &str = "X-Tidepool-Session-Token";

/// Escape everything but RFC 3986 unreserved characters when splicing a
/// user id into a URL path.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Configuration for the Tidepool API client.
#[derive(Debug, Clone)]
pub struct TidepoolConfig {
    /// Base URL of the API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for TidepoolConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tidepool.org".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Account credential for the upstream login call.
#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: String,
}

impl Credential {
    /// Create a credential from a username and secret.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// The `Authorization` header value for a Basic login.
    fn basic_header(&self) -> String {
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.secret));
        format!("Basic {encoded}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A successful login: the account user id and a short-lived token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// User id of the authenticated account
    pub user_id: String,
    /// Session token for subsequent calls
    pub token: String,
}

/// Errors from the upstream API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// HTTP client initialization failed
    #[error("Client initialization failed: {0}")]
    Init(String),
    /// Request could not be sent or completed
    #[error("Request failed: {0}")]
    Request(String),
    /// Credentials or session token were rejected
    #[error("Authentication rejected: status {status}")]
    Auth {
        /// HTTP status of the rejection
        status: u16,
    },
    /// Login succeeded but the response carried no session token
    #[error("Login response carried no session token")]
    MissingToken,
    /// API returned an unexpected error status
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },
    /// No recent readings are available for the subject
    #[error("No recent readings available")]
    NoData,
    /// The account has no linked users to read from
    #[error("Account has no linked users")]
    NoSubject,
    /// Response body could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
    /// A reading field was malformed
    #[error(transparent)]
    Reading(#[from] ReadingError),
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    userid: String,
}

#[derive(Debug, Deserialize)]
struct LinkedUser {
    userid: String,
}

#[derive(Debug, Deserialize)]
struct CbgRecord {
    value: f64,
    time: String,
}

/// HTTP client for the three upstream calls the daemon needs.
#[derive(Debug, Clone)]
pub struct TidepoolClient {
    client: Client,
    config: TidepoolConfig,
}

impl TidepoolClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: TidepoolConfig) -> Result<Self, UpstreamError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if config.base_url.starts_with("https://") {
            // Enable rustls for HTTPS
            builder = builder.use_rustls_tls();
        }

        let client = builder
            .build()
            .map_err(|e| UpstreamError::Init(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Exchange the credential for a user id and session token.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Auth`] when the credential is rejected,
    /// [`UpstreamError::MissingToken`] when the success response lacks
    /// the token header.
    pub async fn login(&self, credential: &Credential) -> Result<AuthSession, UpstreamError> {
        let url = format!("{}/auth/login", self.config.base_url);
        tracing::debug!(url = %url, "POST login");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, credential.basic_header())
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Auth {
                status: status.as_u16(),
            });
        }

        let token = response
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .ok_or(UpstreamError::MissingToken)?;

        let body: LoginBody = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        Ok(AuthSession {
            user_id: body.userid,
            token,
        })
    }

    /// List the user ids linked to the authenticated account.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Auth`] when the token is rejected,
    /// [`UpstreamError::Api`] on any other error status.
    pub async fn linked_users(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Vec<String>, UpstreamError> {
        let url = format!(
            "{}/metadata/users/{}/users",
            self.config.base_url,
            encode_path_segment(user_id)
        );
        tracing::debug!(url = %url, "GET linked users");

        let response = self
            .client
            .get(&url)
            .header(SESSION_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(UpstreamError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let users: Vec<LinkedUser> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        Ok(users.into_iter().map(|user| user.userid).collect())
    }

    /// Fetch the most recent CGM reading for a subject.
    ///
    /// The upstream reports values in mmol/L; the returned [`Reading`]
    /// is already converted to mg/dL.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Auth`] when the token is rejected and
    /// [`UpstreamError::NoData`] when the subject has no readings or the
    /// API answers with any other error status.
    pub async fn latest_cbg(
        &self,
        token: &str,
        subject_id: &str,
    ) -> Result<Reading, UpstreamError> {
        let url = format!(
            "{}/data/{}?latest=true&type=cbg",
            self.config.base_url,
            encode_path_segment(subject_id)
        );
        tracing::debug!(url = %url, "GET latest reading");

        let response = self
            .client
            .get(&url)
            .header(SESSION_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(UpstreamError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Reading fetch returned error status");
            return Err(UpstreamError::NoData);
        }

        let records: Vec<CbgRecord> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        first_reading(&records)
    }
}

/// Convert the newest record of a data response into a [`Reading`].
fn first_reading(records: &[CbgRecord]) -> Result<Reading, UpstreamError> {
    let Some(record) = records.first() else {
        return Err(UpstreamError::NoData);
    };
    Ok(Reading::from_upstream(record.value, &record.time)?)
}

/// Percent-encode a value for use as a single URL path segment.
fn encode_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}
