//! Streaming multipart client for S3-compatible object stores.
//!
//! Large objects move through the multipart protocol in parallel: an
//! upload chunks the caller's byte stream into part-sized buffers and
//! PUTs them concurrently; a download fans ranged GETs out across
//! workers and re-serializes the parts in order. A bounded buffer pool
//! caps peak memory at `(concurrency + 1) × part_size` per transfer,
//! so throughput is limited by network and disk rather than by
//! per-request latency.
//!
//! # Architecture
//!
//! ```text
//! S3 / Bucket (façade: put_writer, get_reader, delete, head)
//!        |
//!        v
//! PutWriter / GetReader (chunking, worker pools, ordering, digests)
//!        |
//!        v
//! RequestContext (URL shaping, SigV4 signing, retry driver)
//!        |
//!        v
//! reqwest::Client (connection pooling, timeouts)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use penstock_core::{CredentialSource, S3};
//!
//! # async fn run() -> penstock_core::Result<()> {
//! let s3 = S3::new("", CredentialSource::discover());
//! let bucket = s3.bucket("my-bucket");
//!
//! let mut writer = bucket.put_writer("big-file.bin", None, None)?;
//! writer.write(b"hello world").await?;
//! writer.close().await?;
//!
//! let (mut reader, headers) = bucket.get_reader("big-file.bin", None).await?;
//! let mut buf = vec![0u8; 64 * 1024];
//! while reader.read(&mut buf).await? > 0 {}
//! reader.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod digest;
pub mod download;
pub mod error;
pub mod pool;
mod request;
mod retry;
pub mod upload;

pub use bucket::{Bucket, S3};
pub use config::{Config, Scheme, client_with_timeout};
pub use download::GetReader;
pub use error::{Error, RespError, Result};
pub use penstock_auth::{CredentialCache, CredentialSource, Credentials};
pub use pool::BufferPool;
pub use upload::PutWriter;
