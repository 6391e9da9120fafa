//! The client façade: an [`S3`] root handle and per-bucket operations.

use std::sync::Arc;

use http::Method;
use http::header::HeaderMap;
use penstock_auth::credentials::{CredentialCache, CredentialSource};
use tracing::debug;

use crate::config::Config;
use crate::download::GetReader;
use crate::error::{Error, RespError, Result};
use crate::request::{RequestContext, RequestTemplate};
use crate::upload::PutWriter;

const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";

/// Entry point: an endpoint plus a credential source.
///
/// # Examples
///
/// ```no_run
/// use penstock_core::S3;
/// use penstock_auth::CredentialSource;
///
/// let s3 = S3::new("", CredentialSource::discover());
/// let bucket = s3.bucket("my-bucket");
/// ```
#[derive(Debug)]
pub struct S3 {
    endpoint: String,
    region: String,
    credentials: Arc<CredentialCache>,
}

impl S3 {
    /// Create a handle for the given endpoint.
    ///
    /// An empty endpoint selects the default AWS endpoint. The signing
    /// region comes from `AWS_REGION` (default `us-east-1`); override
    /// with [`with_region`](Self::with_region).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, source: CredentialSource) -> Self {
        let endpoint = endpoint.into();
        let endpoint = if endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_owned()
        } else {
            endpoint
        };
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_owned());
        Self {
            endpoint,
            region,
            credentials: Arc::new(CredentialCache::new(source)),
        }
    }

    /// Override the signing region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// A bucket handle sharing this endpoint and credential cache.
    #[must_use]
    pub fn bucket(&self, name: impl Into<String>) -> Bucket {
        Bucket {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            credentials: self.credentials.clone(),
            name: name.into(),
            config: Config::default(),
        }
    }
}

/// Operations on one bucket.
///
/// Each operation accepts an optional per-transfer [`Config`] override;
/// without one, the bucket's default applies.
#[derive(Debug)]
pub struct Bucket {
    endpoint: String,
    region: String,
    credentials: Arc<CredentialCache>,
    /// Bucket name.
    pub name: String,
    config: Config,
}

impl Bucket {
    /// Replace the bucket's default configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Open a streaming multipart upload to `key`.
    ///
    /// `headers` are forwarded to `InitiateMultipartUpload`, which is
    /// how server-side encryption and `x-amz-meta-*` user metadata are
    /// attached. No request is made until the first byte is written.
    ///
    /// # Errors
    ///
    /// Fails on an empty key or an invalid configuration.
    pub fn put_writer(
        &self,
        key: &str,
        headers: Option<HeaderMap>,
        config: Option<Config>,
    ) -> Result<PutWriter> {
        let config = config.as_ref().unwrap_or(&self.config).validated(true)?;
        let key = normalize_key(key)?;
        let ctx = self.context(&config);
        let path = ctx.object_path(key);
        Ok(PutWriter::new(ctx, path, headers.unwrap_or_default(), config))
    }

    /// Open a streaming download of `key`.
    ///
    /// The key may carry a `?versionId=` suffix to read a specific
    /// version; it is preserved on every ranged request. Returns the
    /// reader together with the object's response headers
    /// (`x-amz-version-id` among them).
    ///
    /// # Errors
    ///
    /// Fails on an empty key, or with the server's error for the first
    /// ranged request (404 for a missing key).
    pub async fn get_reader(
        &self,
        key: &str,
        config: Option<Config>,
    ) -> Result<(GetReader, HeaderMap)> {
        let config = config.as_ref().unwrap_or(&self.config).validated(false)?;
        let (key, query) = split_version(key);
        let key = normalize_key(key)?;
        let ctx = self.context(&config);
        let path = ctx.object_path(key);
        let reader = GetReader::open(ctx, path, query, &config).await?;
        let headers = reader.headers().clone();
        Ok((reader, headers))
    }

    /// Delete an object.
    ///
    /// # Errors
    ///
    /// Returns the server's [`RespError`] on failure.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let config = self.config.validated(false)?;
        let key = normalize_key(key)?;
        let ctx = self.context(&config);
        let template = RequestTemplate::new(Method::DELETE, ctx.object_path(key));
        ctx.send(&template).await?;
        debug!(key, bucket = %self.name, "object deleted");
        Ok(())
    }

    /// Fetch an object's headers without its body.
    ///
    /// # Errors
    ///
    /// Returns the server's [`RespError`] on failure; HEAD responses
    /// carry no error document, so the message is the status reason.
    pub async fn head(&self, key: &str) -> Result<HeaderMap> {
        let config = self.config.validated(false)?;
        let (key, query) = split_version(key);
        let key = normalize_key(key)?;
        let ctx = self.context(&config);
        let mut template = RequestTemplate::new(Method::HEAD, ctx.object_path(key));
        for (name, value) in query {
            template = template.query(&name, value);
        }
        let resp = ctx.send(&template).await?;
        Ok(resp.headers().clone())
    }

    fn context(&self, config: &Config) -> RequestContext {
        let (host, base_path) = if config.path_style {
            (self.endpoint.clone(), format!("/{}", self.name))
        } else {
            (format!("{}.{}", self.name, self.endpoint), String::new())
        };
        RequestContext {
            client: config.client.clone(),
            scheme: config.scheme,
            host,
            base_path,
            region: self.region.clone(),
            credentials: self.credentials.clone(),
            n_try: config.n_try,
        }
    }
}

/// Reject unusable keys before any request is made.
fn normalize_key(key: &str) -> Result<&str> {
    if key.is_empty() || key == "/" {
        return Err(Error::Resp(RespError::with_message(
            400,
            "A key must be specified",
        )));
    }
    Ok(key)
}

/// Split a `?versionId=` suffix off a key.
fn split_version(key: &str) -> (&str, Vec<(String, String)>) {
    match key.split_once("?versionId=") {
        Some((key, version)) => (key, vec![("versionId".to_owned(), version.to_owned())]),
        None => (key, Vec::new()),
    }
}
