//! Request construction: URL shaping, signing glue, and the template
//! each retry attempt is rebuilt from.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Method};
use penstock_auth::canonical::{canonical_query, canonical_uri};
use penstock_auth::credentials::CredentialCache;
use penstock_auth::sigv4::{EMPTY_PAYLOAD_SHA256, SigningParams, UNSIGNED_PAYLOAD, hash_payload, sign_request};

use crate::config::Scheme;
use crate::error::Error;
use crate::retry;

/// Everything a transfer needs to build, sign, and send requests
/// against one bucket.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub client: reqwest::Client,
    pub scheme: Scheme,
    /// Host the requests are addressed to, `bucket.endpoint` for
    /// virtual-hosted style or the bare endpoint for path style.
    pub host: String,
    /// `/{bucket}` for path style, empty otherwise.
    pub base_path: String,
    pub region: String,
    pub credentials: Arc<CredentialCache>,
    pub n_try: u32,
}

impl RequestContext {
    /// Canonical request path for an object key.
    ///
    /// A single leading `/` on the key is stripped; the key is
    /// percent-encoded segment by segment.
    pub fn object_path(&self, key: &str) -> String {
        let key = key.strip_prefix('/').unwrap_or(key);
        canonical_uri(&format!("{}/{key}", self.base_path))
    }

    /// Full request URL for a canonical path and query.
    pub fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}://{}{path}", self.scheme, self.host)
        } else {
            format!("{}://{}{path}?{query}", self.scheme, self.host)
        }
    }

    /// Send a templated request through the retry driver.
    pub async fn send(&self, template: &RequestTemplate) -> Result<reqwest::Response, Error> {
        retry::execute(&self.client, self.n_try, || self.build_attempt(template)).await
    }

    /// Build one signed attempt from the template.
    ///
    /// Resolves credentials and stamps a fresh signature; the body is a
    /// cheap handle clone.
    async fn build_attempt(&self, template: &RequestTemplate) -> Result<reqwest::Request, Error> {
        let credentials = self.credentials.resolve().await?;
        let query = canonical_query(&template.query);

        let payload_hash = match (&template.body, template.sign_payload) {
            (Some(body), true) => hash_payload(body),
            (None, true) => EMPTY_PAYLOAD_SHA256.to_owned(),
            (_, false) => UNSIGNED_PAYLOAD.to_owned(),
        };

        let mut headers = template.headers.clone();
        sign_request(
            template.method.as_str(),
            &self.host,
            &template.path,
            &query,
            &mut headers,
            &payload_hash,
            &SigningParams {
                credentials: &credentials,
                region: &self.region,
                service: "s3",
                time: Utc::now(),
            },
        )?;

        let url = self.url(&template.path, &query);
        let mut builder = self
            .client
            .request(template.method.clone(), &url)
            .headers(headers);
        if let Some(body) = &template.body {
            builder = builder.body(body.clone());
        }
        builder
            .build()
            .map_err(|err| Error::Transport(format!("request build: {err}")))
    }
}

/// A request shape that can be re-signed and re-sent per attempt.
#[derive(Debug, Clone)]
pub(crate) struct RequestTemplate {
    pub method: Method,
    /// Canonical path, as produced by [`RequestContext::object_path`].
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Hash the body into `x-amz-content-sha256`. Part bodies are sent
    /// `UNSIGNED-PAYLOAD`; their integrity rides on `Content-MD5`.
    pub sign_payload: bool,
}

impl RequestTemplate {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            sign_payload: true,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_owned(), value.into()));
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Bytes, sign_payload: bool) -> Self {
        self.body = Some(body);
        self.sign_payload = sign_payload;
        self
    }
}
