//! Credential records and discovery.
//!
//! Credentials are resolved in order from:
//!
//! 1. The environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//!    optional `AWS_SECURITY_TOKEN`/`AWS_SESSION_TOKEN`).
//! 2. The EC2 instance-metadata service, which lists IAM roles at a
//!    well-known link-local endpoint and serves a JSON credentials
//!    document per role.
//!
//! [`CredentialCache`] wraps a source and re-resolves opportunistically
//! when the cached credentials are within a refresh window of expiry.
//! The cache is single-flight: concurrent callers that hit a refresh
//! observe one resolution, not many.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AuthError;

/// Credentials with an expiry this close are refreshed eagerly.
const REFRESH_WINDOW_SECS: i64 = 300;

/// Default endpoint of the instance-metadata service.
const METADATA_ENDPOINT: &str = "http://169.254.169.254";

/// Path listing the IAM roles available to the instance.
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";

/// An immutable set of credentials sufficient to sign a request.
#[derive(Debug, Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Create credentials from an access key and secret.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    /// Attach a session token (temporary credentials).
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Attach an expiration instant.
    #[must_use]
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// The access key ID.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret access key.
    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// The session token, if these are temporary credentials.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Whether the credentials expire within the refresh window.
    ///
    /// Credentials without an expiration never report stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.expiration {
            Some(at) => Utc::now() + Duration::seconds(REFRESH_WINDOW_SECS) >= at,
            None => false,
        }
    }
}

/// The JSON document served by the instance-metadata service for a role.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataDocument {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

/// A source of credentials.
#[derive(Debug)]
pub enum CredentialSource {
    /// Fixed credentials supplied by the caller.
    Static(Credentials),
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` from the process
    /// environment, read at resolution time.
    Environment,
    /// The EC2 instance-metadata service.
    InstanceMetadata(InstanceMetadataSource),
    /// Try each source in order; first success wins.
    Chain(Vec<CredentialSource>),
}

impl CredentialSource {
    /// The standard discovery chain: environment, then instance metadata.
    #[must_use]
    pub fn discover() -> Self {
        Self::Chain(vec![
            Self::Environment,
            Self::InstanceMetadata(InstanceMetadataSource::default()),
        ])
    }

    /// Resolve credentials from this source.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialsMissing`] when no source in the
    /// chain yields credentials.
    pub async fn resolve(&self) -> Result<Credentials, AuthError> {
        match self {
            Self::Static(creds) => Ok(creds.clone()),
            Self::Environment => from_env(),
            Self::InstanceMetadata(source) => source.resolve().await,
            Self::Chain(sources) => {
                for source in sources {
                    match Box::pin(source.resolve()).await {
                        Ok(creds) => return Ok(creds),
                        Err(err) => debug!(%err, "credential source skipped"),
                    }
                }
                Err(AuthError::CredentialsMissing)
            }
        }
    }
}

/// Read credentials from the process environment.
fn from_env() -> Result<Credentials, AuthError> {
    let access_key_id =
        std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| AuthError::CredentialsMissing)?;
    let secret_access_key =
        std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| AuthError::CredentialsMissing)?;
    if access_key_id.is_empty() || secret_access_key.is_empty() {
        return Err(AuthError::CredentialsMissing);
    }

    let mut creds = Credentials::new(access_key_id, secret_access_key);
    // AWS_SECURITY_TOKEN is the legacy name; AWS_SESSION_TOKEN the current one.
    for name in ["AWS_SECURITY_TOKEN", "AWS_SESSION_TOKEN"] {
        if let Ok(token) = std::env::var(name) {
            if !token.is_empty() {
                creds = creds.with_session_token(token);
                break;
            }
        }
    }
    Ok(creds)
}

/// Resolves credentials from the EC2 instance-metadata service.
#[derive(Debug)]
pub struct InstanceMetadataSource {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for InstanceMetadataSource {
    fn default() -> Self {
        Self::new(METADATA_ENDPOINT)
    }
}

impl InstanceMetadataSource {
    /// Create a source against the given endpoint.
    ///
    /// The endpoint is overridable so tests can stand in for the
    /// link-local service.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// List roles, then fetch the credentials document of the first one.
    async fn resolve(&self) -> Result<Credentials, AuthError> {
        let list_url = format!("{}{}", self.endpoint, SECURITY_CREDENTIALS_PATH);
        let roles = self.fetch(&list_url).await?;
        let role = roles
            .lines()
            .next()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AuthError::Metadata("no IAM role attached".to_owned()))?;

        let doc_url = format!("{list_url}{role}");
        let body = self.fetch(&doc_url).await?;
        let doc: MetadataDocument = serde_json::from_str(&body)
            .map_err(|err| AuthError::Metadata(format!("credentials document: {err}")))?;

        debug!(role, "resolved instance-metadata credentials");

        let mut creds = Credentials::new(doc.access_key_id, doc.secret_access_key);
        if let Some(token) = doc.token {
            creds = creds.with_session_token(token);
        }
        if let Some(expiration) = doc.expiration {
            creds = creds.with_expiration(expiration);
        }
        Ok(creds)
    }

    async fn fetch(&self, url: &str) -> Result<String, AuthError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AuthError::Metadata(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthError::Metadata(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|err| AuthError::Metadata(err.to_string()))
    }
}

/// A caching wrapper around a [`CredentialSource`].
///
/// The cached value is reused until it is within the refresh window of
/// its expiry. Refresh holds an async mutex for its duration, so
/// concurrent callers ride on a single in-flight resolution and then
/// observe the freshly stored value.
#[derive(Debug)]
pub struct CredentialCache {
    source: CredentialSource,
    cached: Mutex<Option<Credentials>>,
}

impl CredentialCache {
    /// Wrap a source in a cache.
    #[must_use]
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Current credentials, resolving or refreshing if needed.
    ///
    /// # Errors
    ///
    /// Propagates the source's resolution error.
    pub async fn resolve(&self) -> Result<Credentials, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(creds) = cached.as_ref() {
            if !creds.is_stale() {
                return Ok(creds.clone());
            }
            debug!("credentials near expiry, refreshing");
        }
        let fresh = self.source.resolve().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}
