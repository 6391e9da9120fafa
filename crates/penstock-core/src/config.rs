//! Transfer configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::Error;

/// Smallest part the service accepts for any part but the last.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default part size.
pub const DEFAULT_PART_SIZE: u64 = 20 * 1024 * 1024;

/// Default attempt budget per request.
pub const DEFAULT_N_TRY: u32 = 10;

/// The service's ceiling on part numbers in one multipart upload.
pub const MAX_PARTS: u32 = 10_000;

/// URL scheme for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTPS.
    #[default]
    Https,
}

impl Scheme {
    /// The scheme as it appears in a URL.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(Error::ConfigInvalid(format!("unknown scheme: {other}"))),
        }
    }
}

/// Per-transfer configuration.
///
/// The default is tuned for large objects over fat pipes: parts of
/// [`DEFAULT_PART_SIZE`] streamed by one worker per available core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of in-flight part workers.
    pub concurrency: usize,
    /// Size of each part except possibly the last, in bytes.
    pub part_size: u64,
    /// Attempt budget per request: 1 initial attempt plus `n_try - 1`
    /// retries.
    pub n_try: u32,
    /// Enable content digest validation on upload and download.
    pub md5_check: bool,
    /// URL scheme.
    pub scheme: Scheme,
    /// Path-style addressing (`endpoint/bucket/key`) instead of
    /// virtual-hosted (`bucket.endpoint/key`).
    pub path_style: bool,
    /// HTTP transport. Timeouts and pooling are the client's.
    pub client: reqwest::Client,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            part_size: DEFAULT_PART_SIZE,
            n_try: DEFAULT_N_TRY,
            md5_check: true,
            scheme: Scheme::default(),
            path_style: false,
            client: reqwest::Client::new(),
        }
    }
}

impl Config {
    /// Normalize the configuration for a transfer.
    ///
    /// Zero `concurrency` or `n_try` are raised to 1, and an upload
    /// part size below the service minimum is raised to
    /// [`MIN_PART_SIZE`], each with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] for a zero part size.
    pub fn validated(&self, for_upload: bool) -> Result<Self, Error> {
        if self.part_size == 0 {
            return Err(Error::ConfigInvalid("part_size must be positive".to_owned()));
        }

        let mut config = self.clone();
        if config.concurrency == 0 {
            warn!("concurrency 0 raised to 1");
            config.concurrency = 1;
        }
        if config.n_try == 0 {
            warn!("n_try 0 raised to 1");
            config.n_try = 1;
        }
        if for_upload && config.part_size < MIN_PART_SIZE {
            warn!(
                part_size = config.part_size,
                "part size below the {MIN_PART_SIZE}-byte service minimum, raised"
            );
            config.part_size = MIN_PART_SIZE;
        }
        Ok(config)
    }
}

/// An HTTP client with a whole-request timeout.
///
/// Convenience for the common case of bounding every request the
/// transfer makes.
#[must_use]
pub fn client_with_timeout(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}
