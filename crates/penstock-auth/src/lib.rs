//! Credential discovery and request signing for the penstock S3 client.
//!
//! This crate provides the two authentication concerns of the client:
//!
//! - [`credentials`]: the [`Credentials`] record, discovery from the
//!   environment or the EC2 instance-metadata service, and a cache that
//!   refreshes expiring credentials with single-flight semantics.
//! - [`sigv4`] and [`canonical`]: AWS Signature Version 4 signing of
//!   outgoing HTTP requests. Signing is a pure function of the request,
//!   the credentials, and the wall-clock time passed in by the caller.

pub mod canonical;
pub mod credentials;
pub mod error;
pub mod sigv4;

pub use credentials::{CredentialCache, CredentialSource, Credentials};
pub use error::AuthError;
pub use sigv4::{SigningParams, sign_request};
