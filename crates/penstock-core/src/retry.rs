//! Bounded retries with response classification.
//!
//! Every attempt rebuilds the request from scratch so it carries a
//! fresh signature timestamp and a fresh body handle. Classification:
//!
//! - 2xx: success.
//! - 408, 429, 5xx, transport errors, timeouts: retryable.
//! - anything else: terminal, parsed into [`RespError`].
//!
//! Backoff is exponential with jitter, 100 ms base, 5 s cap. On
//! exhaustion the last error is surfaced. `CompleteMultipartUpload` is
//! retried like everything else; the service deduplicates by upload-id.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Error, RespError};

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Execute a request with up to `n_try` attempts.
///
/// `build` is invoked once per attempt and must produce a fully signed
/// request.
pub(crate) async fn execute<F, Fut>(
    client: &reqwest::Client,
    n_try: u32,
    build: F,
) -> Result<reqwest::Response, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Request, Error>>,
{
    let n_try = n_try.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let request = build().await?;
        match client.execute(request).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                if !is_retryable_status(status) || attempt >= n_try {
                    return Err(Error::Resp(parse_error_response(resp).await));
                }
                debug!(%status, attempt, "retrying on response status");
            }
            Err(err) => {
                if attempt >= n_try {
                    return Err(transport_error(&err, attempt));
                }
                debug!(error = %err, attempt, "retrying on transport error");
            }
        }
        tokio::time::sleep(backoff(attempt)).await;
    }
}

/// Whether a non-success status is worth another attempt.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Parse a terminal response into a [`RespError`].
///
/// Prefers the `<Error>` document when the body carries one; falls back
/// to the raw body, then to the status reason for bodyless responses.
pub(crate) async fn parse_error_response(resp: reqwest::Response) -> RespError {
    let status = resp.status();
    let reason = status.canonical_reason().unwrap_or("request failed").to_owned();
    match resp.bytes().await {
        Ok(body) if !body.is_empty() => {
            match penstock_xml::from_xml::<penstock_xml::ErrorDocument>(&body) {
                Ok(doc) => RespError::from_document(status.as_u16(), doc),
                Err(_) => RespError::with_message(
                    status.as_u16(),
                    String::from_utf8_lossy(&body).into_owned(),
                ),
            }
        }
        _ => RespError::with_message(status.as_u16(), reason),
    }
}

fn transport_error(err: &reqwest::Error, attempts: u32) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("timeout after {attempts} attempts: {err}"))
    } else {
        Error::Transport(format!("{err} (after {attempts} attempts)"))
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1 << (attempt - 1).min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
    Duration::from_millis(jittered)
}
