//! Streaming parallel download.
//!
//! [`GetReader`] is a byte source. An initial ranged GET for the first
//! part discovers the object size and headers; workers then claim part
//! indices from a shared counter and fetch their byte ranges into pool
//! buffers in parallel. The reader re-serializes parts into ascending
//! order, parking out-of-order arrivals, so the caller always observes
//! bytes in object order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};
use http::Method;
use http::header::{HeaderMap, HeaderValue, RANGE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::digest::{RunningMd5, etag_matches, is_multipart_etag};
use crate::error::{Error, ErrorSlot, Result};
use crate::pool::BufferPool;
use crate::request::{RequestContext, RequestTemplate};

/// A fetched part awaiting consumption.
struct PartSlot {
    index: u32,
    body: Bytes,
}

/// The part being drained right now.
///
/// The offset tracks consumption without advancing the `Bytes`, so the
/// untouched handle can be reclaimed into the pool at full capacity.
#[derive(Debug)]
struct CurrentPart {
    body: Bytes,
    offset: usize,
}

/// State shared between the reader and its fetch workers.
#[derive(Debug)]
struct DownloadShared {
    ctx: RequestContext,
    path: String,
    query: Vec<(String, String)>,
    pool: BufferPool,
    error: ErrorSlot,
    /// Next part index for a worker to claim, starting at 2 (the
    /// opening request fetched part 1).
    next_part: AtomicU32,
    total_parts: u32,
    size: u64,
    part_size: u64,
}

/// The digest the stream can be verified against on close.
#[derive(Debug)]
enum DigestReference {
    /// The object's ETag is a plain content MD5.
    PlainEtag(String),
    /// An `x-amz-meta-md5` header supplied by the uploader.
    MetaMd5(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Streaming,
    Closed,
}

/// A read source yielding an object's bytes in order.
///
/// Obtained from [`crate::Bucket::get_reader`]. Read with
/// [`read`](Self::read) until it returns 0, then [`close`](Self::close)
/// to release resources and run digest verification.
#[derive(Debug)]
pub struct GetReader {
    shared: Arc<DownloadShared>,
    headers: HeaderMap,
    size: u64,
    position: u64,
    next_index: u32,
    current: Option<CurrentPart>,
    parked: BTreeMap<u32, Bytes>,
    delivery_rx: Option<mpsc::Receiver<PartSlot>>,
    workers: Vec<JoinHandle<()>>,
    md5: Option<RunningMd5>,
    digest_reference: Option<DigestReference>,
    state: ReadState,
    stored_error: Option<Error>,
}

impl GetReader {
    /// Open the object: issue the first ranged GET, expose its headers,
    /// and start the part workers.
    pub(crate) async fn open(
        ctx: RequestContext,
        path: String,
        query: Vec<(String, String)>,
        config: &Config,
    ) -> Result<Self> {
        let part_size = config.part_size;
        let pool = BufferPool::new(config.concurrency + 1, part_size as usize);

        let mut template = RequestTemplate::new(Method::GET, path.clone());
        for (key, value) in &query {
            template = template.query(key, value.clone());
        }
        template = template.header(RANGE, range_header(0, part_size - 1)?);

        let resp = match ctx.send(&template).await {
            Ok(resp) => resp,
            // An empty object cannot satisfy any range.
            Err(Error::Resp(err)) if err.status_code == 416 => {
                return Ok(Self::empty(ctx, path, query, pool));
            }
            Err(err) => return Err(err),
        };

        let headers = resp.headers().clone();
        let size = object_size(&resp)?;
        debug!(path = %path, size, "download opened");

        let mut first = pool.acquire().await?;
        let first_len = part_size.min(size);
        read_body_into(resp, &mut first, first_len).await?;

        let total_parts = if size == 0 {
            0
        } else {
            size.div_ceil(part_size) as u32
        };

        let shared = Arc::new(DownloadShared {
            ctx,
            path,
            query,
            pool,
            error: ErrorSlot::default(),
            next_part: AtomicU32::new(2),
            total_parts,
            size,
            part_size,
        });

        let remaining = total_parts.saturating_sub(1) as usize;
        let worker_count = config.concurrency.min(remaining);
        let (delivery_rx, workers) = if worker_count > 0 {
            let (tx, rx) = mpsc::channel(config.concurrency + 1);
            let workers = (0..worker_count)
                .map(|worker| {
                    let shared = shared.clone();
                    let tx = tx.clone();
                    tokio::spawn(run_worker(worker, shared, tx))
                })
                .collect();
            (Some(rx), workers)
        } else {
            (None, Vec::new())
        };

        let digest_reference = digest_reference(&headers);
        let md5 = (config.md5_check && digest_reference.is_some()).then(RunningMd5::new);

        Ok(Self {
            shared,
            headers,
            size,
            position: 0,
            next_index: 1,
            current: Some(CurrentPart {
                body: first.freeze(),
                offset: 0,
            }),
            parked: BTreeMap::new(),
            delivery_rx,
            workers,
            md5,
            digest_reference,
            state: ReadState::Streaming,
            stored_error: None,
        })
    }

    /// Response headers of the object, available before any read.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Total object size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the next bytes in object order.
    ///
    /// Returns 0 at end of object. Blocks while the next in-order part
    /// is still in flight.
    ///
    /// # Errors
    ///
    /// Surfaces the first error any worker hit; subsequent reads return
    /// the same error.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.state == ReadState::Closed {
            return Err(self.stored_error.clone().unwrap_or(Error::Cancelled));
        }
        if let Some(err) = &self.stored_error {
            return Err(err.clone());
        }
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            if let Some(current) = &mut self.current {
                if current.offset < current.body.len() {
                    let n = (current.body.len() - current.offset).min(out.len());
                    out[..n].copy_from_slice(&current.body[current.offset..current.offset + n]);
                    if let Some(md5) = &mut self.md5 {
                        md5.update(&out[..n]);
                    }
                    current.offset += n;
                    self.position += n as u64;
                    return Ok(n);
                }
                // Part drained; recycle its buffer and advance.
                if let Some(done) = self.current.take() {
                    self.shared.pool.reclaim(done.body);
                }
                self.next_index += 1;
            }

            if self.position >= self.size {
                return Ok(0);
            }

            if let Some(body) = self.parked.remove(&self.next_index) {
                self.current = Some(CurrentPart { body, offset: 0 });
                continue;
            }

            let Some(rx) = self.delivery_rx.as_mut() else {
                let err = Error::Transport("download ended before the object did".to_owned());
                self.stored_error = Some(err.clone());
                return Err(err);
            };
            match rx.recv().await {
                Some(slot) if slot.index == self.next_index => {
                    self.current = Some(CurrentPart {
                        body: slot.body,
                        offset: 0,
                    });
                }
                Some(slot) => {
                    self.parked.insert(slot.index, slot.body);
                }
                None => {
                    let err = self.shared.error.get().unwrap_or_else(|| {
                        Error::Transport("download workers exited early".to_owned())
                    });
                    self.stored_error = Some(err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// Release workers and buffers, then verify the content digest if
    /// the whole object was read and a reference digest is known.
    ///
    /// # Errors
    ///
    /// Surfaces the transfer's first error, or
    /// [`Error::ChecksumMismatch`] from verification.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ReadState::Closed {
            return match &self.stored_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            };
        }
        self.state = ReadState::Closed;

        self.shared.pool.close();
        self.delivery_rx = None;
        self.parked.clear();
        self.current = None;
        for handle in self.workers.drain(..) {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(err) = self.stored_error.clone() {
            return Err(err);
        }
        if let Some(err) = self.shared.error.get() {
            self.stored_error = Some(err.clone());
            return Err(err);
        }

        if self.position == self.size {
            if let (Some(md5), Some(reference)) = (self.md5.take(), self.digest_reference.take()) {
                let computed = md5.finish_hex();
                let expected = match reference {
                    DigestReference::PlainEtag(etag) | DigestReference::MetaMd5(etag) => etag,
                };
                if !etag_matches(&expected, &computed) {
                    let err = Error::ChecksumMismatch {
                        expected: expected.trim_matches('"').to_owned(),
                        computed,
                    };
                    self.stored_error = Some(err.clone());
                    return Err(err);
                }
                debug!(md5 = %computed, "download digest verified");
            }
        }
        Ok(())
    }

    /// Reader over a zero-byte object.
    fn empty(
        ctx: RequestContext,
        path: String,
        query: Vec<(String, String)>,
        pool: BufferPool,
    ) -> Self {
        Self {
            shared: Arc::new(DownloadShared {
                ctx,
                path,
                query,
                pool,
                error: ErrorSlot::default(),
                next_part: AtomicU32::new(2),
                total_parts: 0,
                size: 0,
                part_size: 1,
            }),
            headers: HeaderMap::new(),
            size: 0,
            position: 0,
            next_index: 1,
            current: None,
            parked: BTreeMap::new(),
            delivery_rx: None,
            workers: Vec::new(),
            md5: None,
            digest_reference: None,
            state: ReadState::Streaming,
            stored_error: None,
        }
    }
}

impl Drop for GetReader {
    fn drop(&mut self) {
        // A reader dropped without close() must not strand workers in
        // pool.acquire().
        self.shared.pool.close();
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}

/// Worker loop: claim the next part index, fetch its range into a pool
/// buffer, deliver it to the reader.
async fn run_worker(worker: usize, shared: Arc<DownloadShared>, tx: mpsc::Sender<PartSlot>) {
    loop {
        if shared.error.is_set() {
            break;
        }
        let index = shared.next_part.fetch_add(1, Ordering::SeqCst);
        if index > shared.total_parts {
            break;
        }

        let mut buf = match shared.pool.acquire().await {
            Ok(buf) => buf,
            Err(_) => break,
        };
        match fetch_part(&shared, index, &mut buf).await {
            Ok(()) => {
                let slot = PartSlot {
                    index,
                    body: buf.freeze(),
                };
                if let Err(returned) = tx.send(slot).await {
                    // Reader is gone; hand the buffer back and stop.
                    shared.pool.reclaim(returned.0.body);
                    break;
                }
            }
            Err(err) => {
                shared.error.set(err);
                shared.pool.release(buf);
                break;
            }
        }
    }
    debug!(worker, "download worker exited");
}

/// Ranged GET for one part, with retries, into the given buffer.
async fn fetch_part(shared: &DownloadShared, index: u32, buf: &mut BytesMut) -> Result<()> {
    let start = u64::from(index - 1) * shared.part_size;
    let end = (start + shared.part_size - 1).min(shared.size - 1);

    let mut template = RequestTemplate::new(Method::GET, shared.path.clone());
    for (key, value) in &shared.query {
        template = template.query(key, value.clone());
    }
    template = template.header(RANGE, range_header(start, end)?);

    let resp = shared.ctx.send(&template).await?;
    buf.clear();
    read_body_into(resp, buf, end - start + 1).await?;
    debug!(part = index, size = buf.len(), "part fetched");
    Ok(())
}

/// Stream a response body into a buffer, enforcing the expected length.
async fn read_body_into(mut resp: reqwest::Response, buf: &mut BytesMut, expected: u64) -> Result<()> {
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|err| Error::Transport(format!("body read: {err}")))?
    {
        if buf.len() as u64 + chunk.len() as u64 > expected {
            return Err(Error::Transport(format!(
                "part body longer than the {expected} bytes requested"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    if (buf.len() as u64) < expected {
        return Err(Error::Transport(format!(
            "part body truncated: {} of {expected} bytes",
            buf.len()
        )));
    }
    Ok(())
}

/// Object size from the opening response: the total in `Content-Range`
/// for a 206, `Content-Length` otherwise.
fn object_size(resp: &reqwest::Response) -> Result<u64> {
    if resp.status() == http::StatusCode::PARTIAL_CONTENT {
        let content_range = resp
            .headers()
            .get(http::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Transport("206 response without Content-Range".to_owned()))?;
        content_range
            .rsplit_once('/')
            .and_then(|(_, total)| total.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::Transport(format!("unparseable Content-Range: {content_range}"))
            })
    } else {
        resp.headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| Error::Transport("response without Content-Length".to_owned()))
    }
}

/// The digest this object can be verified against, if any.
///
/// A multipart ETag cannot be recomputed from the byte stream alone, so
/// those objects are only verifiable through `x-amz-meta-md5`.
fn digest_reference(headers: &HeaderMap) -> Option<DigestReference> {
    if let Some(meta) = headers
        .get("x-amz-meta-md5")
        .and_then(|value| value.to_str().ok())
    {
        return Some(DigestReference::MetaMd5(meta.to_owned()));
    }
    let etag = headers
        .get(http::header::ETAG)
        .and_then(|value| value.to_str().ok())?;
    if is_multipart_etag(etag) {
        debug!(etag, "multipart etag is not verifiable against the stream");
        None
    } else {
        Some(DigestReference::PlainEtag(etag.to_owned()))
    }
}

fn range_header(start: u64, end: u64) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("bytes={start}-{end}"))
        .map_err(|_| Error::Transport("range header".to_owned()))
}
