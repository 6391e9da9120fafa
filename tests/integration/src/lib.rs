//! Integration tests for the penstock streaming client.
//!
//! Most tests are hermetic: they drive the real client against an
//! in-process stub S3 server ([`stub`]). Tests that talk to a real
//! bucket require `TEST_BUCKET` (and credentials in the environment)
//! and are marked `#[ignore]`.
//!
//! Run the live tests with:
//! ```text
//! TEST_BUCKET=my-bucket cargo test -p penstock-integration -- --ignored
//! ```

use std::sync::Once;

use penstock_auth::credentials::{CredentialSource, Credentials};
use penstock_core::{Bucket, Config, GetReader, S3, Scheme};


static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Base configuration for talking to a stub: plain HTTP, path-style
/// addressing (the stub has no DNS).
#[must_use]
pub fn stub_config() -> Config {
    Config {
        scheme: Scheme::Http,
        path_style: true,
        concurrency: 3,
        n_try: 2,
        ..Config::default()
    }
}

/// A bucket handle pointed at a running stub.
#[must_use]
pub fn stub_bucket(stub: &stub::StubS3, config: Config) -> Bucket {
    init_tracing();
    S3::new(
        stub.endpoint(),
        CredentialSource::Static(Credentials::new("test", "test")),
    )
    .with_region("us-east-1")
    .bucket("stub")
    .with_config(config)
}

/// A bucket against the real service, if `TEST_BUCKET` is set.
#[must_use]
pub fn live_bucket() -> Option<Bucket> {
    init_tracing();
    let name = std::env::var("TEST_BUCKET").ok()?;
    Some(S3::new("", CredentialSource::discover()).bucket(name))
}

/// Deterministic pseudo-random payload for round-trip comparisons.
#[must_use]
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31).wrapping_add(7) % 251) as u8)
        .collect()
}

/// Drain a reader to a vector.
pub async fn read_to_end(reader: &mut GetReader) -> penstock_core::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

mod test_facade;
mod test_live;
mod test_put;
