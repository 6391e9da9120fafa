//! Error types for credential discovery and signing.

/// Errors produced while resolving credentials or signing a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential source yielded usable credentials.
    #[error("no credentials found in environment or instance metadata")]
    CredentialsMissing,

    /// The instance-metadata service could not be reached or returned
    /// an unusable document.
    #[error("instance metadata: {0}")]
    Metadata(String),

    /// A header value required for signing was not valid UTF-8 or not a
    /// valid HTTP header value.
    #[error("invalid header value for {0}")]
    InvalidHeader(String),
}
