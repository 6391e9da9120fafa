//! Bounded pool of reusable part buffers.
//!
//! The pool caps a transfer's peak heap at
//! `capacity × part_size`: every in-flight part buffer holds one pool
//! permit, and producers block in [`BufferPool::acquire`] until a
//! worker hands one back. Buffers are allocated lazily on first use
//! and recycled with their capacity intact.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::Error;

/// A bounded free list of fixed-capacity byte buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    permits: Semaphore,
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each.
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                permits: Semaphore::new(capacity),
                free: Mutex::new(Vec::with_capacity(capacity)),
                buffer_size,
            }),
        }
    }

    /// Take a buffer, waiting until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once the pool has been closed.
    pub async fn acquire(&self) -> Result<BytesMut, Error> {
        let permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        permit.forget();

        let recycled = self.inner.free.lock().pop();
        Ok(recycled.unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size)))
    }

    /// Return a buffer to the pool.
    ///
    /// Must be called exactly once per [`acquire`](Self::acquire),
    /// unless the buffer's allocation was lost to a frozen handle, in
    /// which case call [`forfeit`](Self::forfeit) instead.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        self.inner.free.lock().push(buf);
        self.inner.permits.add_permits(1);
    }

    /// Return a frozen buffer, recovering its allocation when this is
    /// the last handle.
    pub fn reclaim(&self, body: Bytes) {
        match body.try_into_mut() {
            Ok(buf) => self.release(buf),
            Err(_) => self.forfeit(),
        }
    }

    /// Give back a permit without a buffer; the next acquire allocates
    /// a fresh one.
    pub fn forfeit(&self) {
        self.inner.permits.add_permits(1);
    }

    /// Close the pool, waking all waiters with a terminal error.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Buffers currently available without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}
