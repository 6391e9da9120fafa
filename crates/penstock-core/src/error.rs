//! Error model of the streaming client.
//!
//! Retryable conditions are absorbed by the retry driver; everything
//! surfaced here is terminal for its transfer. The first error a
//! transfer observes is stored and returned from every subsequent
//! `write`/`read`/`close` call.

use std::fmt;

use penstock_auth::AuthError;
use penstock_xml::{ErrorDocument, XmlError};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A structured error response from the service.
///
/// Parsed from the `<Error>` XML document where one is present; for
/// bodyless responses (HEAD) the message falls back to the HTTP status
/// reason.
#[derive(Debug, Clone)]
pub struct RespError {
    /// HTTP status code of the response.
    pub status_code: u16,
    /// Machine-readable error code, e.g. `NoSuchKey`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The resource the error refers to.
    pub resource: Option<String>,
    /// Request ID for support correlation.
    pub request_id: Option<String>,
}

impl RespError {
    /// Build from a parsed error document.
    #[must_use]
    pub fn from_document(status_code: u16, doc: ErrorDocument) -> Self {
        Self {
            status_code,
            code: doc.code,
            message: doc.message,
            resource: doc.resource,
            request_id: doc.request_id,
        }
    }

    /// Build from a bare status and message.
    #[must_use]
    pub fn with_message(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            code: String::new(),
            message: message.into(),
            resource: None,
            request_id: None,
        }
    }
}

impl fmt::Display for RespError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "HTTP {}: {}", self.status_code, self.message)
        } else {
            write!(
                f,
                "HTTP {} ({}): {}",
                self.status_code, self.code, self.message
            )
        }
    }
}

impl std::error::Error for RespError {}

/// Errors surfaced by transfers and façade operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No credentials could be resolved.
    #[error("no credentials found in environment or instance metadata")]
    CredentialsMissing,

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Structured server error.
    #[error(transparent)]
    Resp(#[from] RespError),

    /// Transport-layer failure after retry exhaustion, including
    /// timeouts.
    #[error("transport error: {0}")]
    Transport(String),

    /// A content digest disagreed with the server's.
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Digest the server reported.
        expected: String,
        /// Digest computed locally.
        computed: String,
    },

    /// `close()` on an uploader that received zero bytes.
    #[error("0 bytes written")]
    EmptyUpload,

    /// The transfer was closed or aborted while operations were in
    /// flight.
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::CredentialsMissing | AuthError::Metadata(_) => Self::CredentialsMissing,
            AuthError::InvalidHeader(name) => {
                Self::ConfigInvalid(format!("unsignable header value for {name}"))
            }
        }
    }
}

impl From<XmlError> for Error {
    fn from(err: XmlError) -> Self {
        Self::Transport(format!("invalid response body: {err}"))
    }
}

/// First-error-wins slot shared between a transfer and its workers.
///
/// The first stored error is what every later `write`/`read`/`close`
/// surfaces; subsequent errors are logged and discarded.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(parking_lot::Mutex<Option<Error>>);

impl ErrorSlot {
    pub fn set(&self, err: Error) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!(error = %err, "subsequent transfer error discarded");
        }
    }

    pub fn get(&self) -> Option<Error> {
        self.0.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}
