//! Streaming multipart upload.
//!
//! [`PutWriter`] is a byte sink: the caller streams bytes in, the
//! writer chunks them into part-sized pool buffers and dispatches each
//! full buffer to a pool of workers that PUT parts in parallel. On
//! close the writer drains its workers and either commits the object
//! with `CompleteMultipartUpload` or aborts, leaving no partial object
//! visible.
//!
//! The multipart session is initiated lazily on the first byte written;
//! a stream that ends with zero bytes never touches the server and
//! `close` fails with [`Error::EmptyUpload`].

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use parking_lot::Mutex;
use penstock_xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, CompletedPart, ErrorDocument,
    InitiateMultipartUploadResult,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Config, MAX_PARTS};
use crate::digest::{etag_matches, md5_base64, md5_hex, multipart_etag};
use crate::error::{Error, ErrorSlot, RespError, Result};
use crate::pool::BufferPool;
use crate::request::{RequestContext, RequestTemplate};

/// One part handed to a worker: index and the frozen buffer.
struct PartJob {
    index: u32,
    body: Bytes,
}

/// Outcome of one part PUT, keyed by index for the final Complete.
struct PartRecord {
    index: u32,
    etag: String,
    md5_hex: String,
}

/// State shared between the producer and its workers.
struct UploadShared {
    ctx: RequestContext,
    path: String,
    upload_id: String,
    md5_check: bool,
    pool: BufferPool,
    results: Mutex<Vec<PartRecord>>,
    error: ErrorSlot,
}

/// Worker pool and job queue, created on the first write.
struct Machinery {
    shared: Arc<UploadShared>,
    job_tx: Option<mpsc::Sender<PartJob>>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Fresh,
    Streaming,
    Completed,
    Aborted,
}

/// A write sink that uploads its bytes as a multipart object.
///
/// Obtained from [`crate::Bucket::put_writer`]. Stream bytes with
/// [`write`](Self::write), then [`close`](Self::close) to commit. Any
/// error aborts the multipart session; the first error is sticky and
/// returned from every subsequent call.
pub struct PutWriter {
    ctx: RequestContext,
    path: String,
    init_headers: HeaderMap,
    config: Config,
    state: UploadState,
    stored_error: Option<Error>,
    machinery: Option<Machinery>,
    current: Option<BytesMut>,
    next_part: u32,
    bytes_written: u64,
}

impl PutWriter {
    pub(crate) fn new(
        ctx: RequestContext,
        path: String,
        init_headers: HeaderMap,
        config: Config,
    ) -> Self {
        Self {
            ctx,
            path,
            init_headers,
            config,
            state: UploadState::Fresh,
            stored_error: None,
            machinery: None,
            current: None,
            next_part: 1,
            bytes_written: 0,
        }
    }

    /// Append bytes to the upload.
    ///
    /// Blocks only on buffer-pool acquisition (backpressure from slow
    /// part uploads), never directly on the network. Always consumes
    /// the whole input on success.
    ///
    /// # Errors
    ///
    /// Surfaces the first error any worker hit, after the session has
    /// been aborted.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.state {
            UploadState::Completed | UploadState::Aborted => {
                return Err(self.stored_error.clone().unwrap_or(Error::Cancelled));
            }
            UploadState::Fresh | UploadState::Streaming => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.state == UploadState::Fresh {
            match self.start().await {
                Ok(()) => self.state = UploadState::Streaming,
                Err(err) => {
                    self.state = UploadState::Aborted;
                    self.stored_error = Some(err.clone());
                    return Err(err);
                }
            }
        }

        let shared = match &self.machinery {
            Some(machinery) => machinery.shared.clone(),
            None => return Err(Error::Cancelled),
        };
        let part_size = self.config.part_size as usize;

        let mut rest = buf;
        while !rest.is_empty() {
            if let Some(err) = shared.error.get() {
                self.fail(err.clone()).await;
                return Err(err);
            }

            let mut current = match self.current.take() {
                Some(buffer) => buffer,
                None => match shared.pool.acquire().await {
                    Ok(buffer) => buffer,
                    Err(_) => {
                        let err = shared.error.get().unwrap_or(Error::Cancelled);
                        self.fail(err.clone()).await;
                        return Err(err);
                    }
                },
            };

            let room = part_size - current.len();
            let n = room.min(rest.len());
            current.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            self.bytes_written += n as u64;

            if current.len() == part_size {
                self.dispatch(current.freeze()).await?;
            } else {
                self.current = Some(current);
            }
        }
        Ok(buf.len())
    }

    /// Commit the upload.
    ///
    /// Flushes the tail part, drains all workers, issues
    /// `CompleteMultipartUpload`, and verifies the composite ETag when
    /// digest checking is on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyUpload`] if no bytes were written, or the
    /// transfer's first error after the session has been aborted.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            UploadState::Completed => return Ok(()),
            UploadState::Aborted => {
                return Err(self.stored_error.clone().unwrap_or(Error::Cancelled));
            }
            UploadState::Fresh => {
                self.state = UploadState::Aborted;
                self.stored_error = Some(Error::EmptyUpload);
                return Err(Error::EmptyUpload);
            }
            UploadState::Streaming => {}
        }

        if let Some(tail) = self.current.take() {
            self.dispatch(tail.freeze()).await?;
        }

        self.teardown().await;

        let shared = match &self.machinery {
            Some(machinery) => machinery.shared.clone(),
            None => return Err(Error::Cancelled),
        };

        if let Some(err) = shared.error.get() {
            self.abort_remote().await;
            self.state = UploadState::Aborted;
            self.stored_error = Some(err.clone());
            return Err(err);
        }

        match self.complete(&shared).await {
            Ok(()) => {
                self.state = UploadState::Completed;
                Ok(())
            }
            Err(err) => {
                // A checksum mismatch happens after the commit went
                // through; there is no session left to abort.
                if !matches!(err, Error::ChecksumMismatch { .. }) {
                    self.abort_remote().await;
                }
                self.state = UploadState::Aborted;
                self.stored_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Abandon the upload, aborting the multipart session.
    ///
    /// Best-effort: a failed abort is logged, not surfaced. Subsequent
    /// calls on this writer fail with [`Error::Cancelled`].
    pub async fn abort(&mut self) {
        if matches!(self.state, UploadState::Completed | UploadState::Aborted) {
            return;
        }
        self.teardown().await;
        self.abort_remote().await;
        self.state = UploadState::Aborted;
        if self.stored_error.is_none() {
            self.stored_error = Some(Error::Cancelled);
        }
    }

    /// Total bytes accepted so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Initiate the multipart session and spin up the worker pool.
    async fn start(&mut self) -> Result<()> {
        let template = RequestTemplate::new(Method::POST, self.path.clone())
            .query("uploads", "")
            .headers(self.init_headers.clone());
        let resp = self.ctx.send(&template).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|err| Error::Transport(format!("initiate response: {err}")))?;
        let init: InitiateMultipartUploadResult = penstock_xml::from_xml(&body)?;
        debug!(path = %self.path, upload_id = %init.upload_id, "multipart upload initiated");

        let pool = BufferPool::new(self.config.concurrency + 1, self.config.part_size as usize);
        let shared = Arc::new(UploadShared {
            ctx: self.ctx.clone(),
            path: self.path.clone(),
            upload_id: init.upload_id,
            md5_check: self.config.md5_check,
            pool,
            results: Mutex::new(Vec::new()),
            error: ErrorSlot::default(),
        });

        let (job_tx, job_rx) = mpsc::channel(self.config.concurrency);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let workers = (0..self.config.concurrency)
            .map(|worker| {
                let shared = shared.clone();
                let jobs = job_rx.clone();
                tokio::spawn(run_worker(worker, shared, jobs))
            })
            .collect();

        self.machinery = Some(Machinery {
            shared,
            job_tx: Some(job_tx),
            workers,
        });
        Ok(())
    }

    /// Hand a frozen part buffer to the workers.
    async fn dispatch(&mut self, body: Bytes) -> Result<()> {
        if self.next_part > MAX_PARTS {
            let err = Error::ConfigInvalid(format!(
                "object exceeds {MAX_PARTS} parts at part size {}",
                self.config.part_size
            ));
            self.fail(err.clone()).await;
            return Err(err);
        }
        let index = self.next_part;
        self.next_part += 1;

        let job_tx = self
            .machinery
            .as_ref()
            .and_then(|machinery| machinery.job_tx.clone());
        let Some(job_tx) = job_tx else {
            return Err(Error::Cancelled);
        };
        if job_tx.send(PartJob { index, body }).await.is_err() {
            let err = self
                .machinery
                .as_ref()
                .and_then(|machinery| machinery.shared.error.get())
                .unwrap_or(Error::Cancelled);
            self.fail(err.clone()).await;
            return Err(err);
        }
        Ok(())
    }

    /// Close the job queue and wait for every worker to drain.
    async fn teardown(&mut self) {
        self.current = None;
        if let Some(machinery) = self.machinery.as_mut() {
            machinery.job_tx = None;
            for handle in machinery.workers.drain(..) {
                if let Err(err) = handle.await {
                    warn!(error = %err, "upload worker join failed");
                }
            }
            machinery.shared.pool.close();
        }
    }

    /// Enter the failed state: drain workers, abort the session, store
    /// the error.
    async fn fail(&mut self, err: Error) {
        self.teardown().await;
        self.abort_remote().await;
        self.state = UploadState::Aborted;
        if self.stored_error.is_none() {
            self.stored_error = Some(err);
        }
    }

    /// Best-effort `AbortMultipartUpload`.
    async fn abort_remote(&mut self) {
        let Some(machinery) = &self.machinery else {
            return;
        };
        let shared = &machinery.shared;
        let template = RequestTemplate::new(Method::DELETE, shared.path.clone())
            .query("uploadId", shared.upload_id.clone());
        match shared.ctx.send(&template).await {
            Ok(_) => debug!(upload_id = %shared.upload_id, "multipart upload aborted"),
            Err(err) => {
                warn!(error = %err, "abort failed; the incomplete upload may linger");
            }
        }
    }

    /// Issue `CompleteMultipartUpload` and verify the composite ETag.
    async fn complete(&self, shared: &UploadShared) -> Result<()> {
        let mut records = std::mem::take(&mut *shared.results.lock());
        records.sort_by_key(|record| record.index);

        let expected = self.next_part - 1;
        let contiguous = records
            .iter()
            .enumerate()
            .all(|(i, record)| record.index == i as u32 + 1);
        if records.len() as u32 != expected || !contiguous {
            return Err(Error::Transport(format!(
                "part results incomplete: have {}, want {expected}",
                records.len()
            )));
        }

        let body = penstock_xml::to_xml(
            "CompleteMultipartUpload",
            &CompleteMultipartUpload {
                parts: records
                    .iter()
                    .map(|record| CompletedPart {
                        part_number: record.index as i32,
                        etag: record.etag.clone(),
                    })
                    .collect(),
            },
        )?;

        let template = RequestTemplate::new(Method::POST, shared.path.clone())
            .query("uploadId", shared.upload_id.clone())
            .body(Bytes::from(body), true);
        let resp = shared.ctx.send(&template).await?;
        let status = resp.status().as_u16();
        let text = resp
            .bytes()
            .await
            .map_err(|err| Error::Transport(format!("complete response: {err}")))?;

        // The service can answer 200 with an error document.
        if penstock_xml::root_name(&text).is_ok_and(|name| name == "Error") {
            let doc: ErrorDocument = penstock_xml::from_xml(&text)?;
            return Err(Error::Resp(RespError::from_document(status, doc)));
        }
        let result: CompleteMultipartUploadResult = penstock_xml::from_xml(&text)?;
        debug!(etag = %result.etag, parts = records.len(), "multipart upload completed");

        if shared.md5_check {
            let hexes: Vec<&str> = records
                .iter()
                .map(|record| record.md5_hex.as_str())
                .collect();
            let computed = multipart_etag(&hexes);
            if !etag_matches(&result.etag, &computed) {
                return Err(Error::ChecksumMismatch {
                    expected: result.etag.trim_matches('"').to_owned(),
                    computed,
                });
            }
        }
        Ok(())
    }
}

/// Worker loop: pull jobs, PUT parts, record ETags, recycle buffers.
///
/// After the first stored error the loop keeps draining jobs so their
/// buffers return to the pool, but stops talking to the network.
async fn run_worker(
    worker: usize,
    shared: Arc<UploadShared>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<PartJob>>>,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else { break };
        let PartJob { index, body } = job;

        if shared.error.is_set() {
            shared.pool.reclaim(body);
            continue;
        }

        match upload_part(&shared, index, &body).await {
            Ok(record) => shared.results.lock().push(record),
            Err(err) => {
                warn!(part = index, error = %err, "part upload failed");
                shared.error.set(err);
            }
        }
        shared.pool.reclaim(body);
    }
    debug!(worker, "upload worker drained");
}

/// PUT one part with retries; returns its record for the Complete.
async fn upload_part(shared: &UploadShared, index: u32, body: &Bytes) -> Result<PartRecord> {
    let md5 = md5_hex(body);
    let mut template = RequestTemplate::new(Method::PUT, shared.path.clone())
        .query("partNumber", index.to_string())
        .query("uploadId", shared.upload_id.clone())
        .body(body.clone(), false);
    if shared.md5_check {
        let value = HeaderValue::from_str(&md5_base64(body))
            .map_err(|_| Error::Transport("content-md5 header".to_owned()))?;
        template = template.header(HeaderName::from_static("content-md5"), value);
    }

    let resp = shared.ctx.send(&template).await?;
    let etag = resp
        .headers()
        .get(http::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::Transport(format!("part {index} response missing ETag")))?;
    debug!(part = index, size = body.len(), "part uploaded");

    Ok(PartRecord {
        index,
        etag,
        md5_hex: md5,
    })
}
