//! Receive-buffer pool for the server's UDP read loop
//!
//! Every datagram is handled by its own worker while the read loop moves
//! on, so buffers are handed off and returned when the worker finishes.
//! Buffers return to the pool of whichever thread drops them.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use crate::MAX_DATAGRAM;

/// Maximum number of buffers kept per thread
const MAX_POOL_SIZE: usize = 16;

thread_local! {
    static POOL: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::with_capacity(MAX_POOL_SIZE));
}

/// Handle to the thread-local datagram buffer pool
///
/// This is a zero-sized type; cloning it is free and all copies share the
/// same underlying thread-local storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatagramPool;

impl DatagramPool {
    /// Create a pool handle
    pub fn new() -> Self {
        Self
    }

    /// Get a cleared buffer with at least [`MAX_DATAGRAM`] capacity
    pub fn get(&self) -> PooledBuffer {
        let buf = POOL.with(|pool| {
            pool.borrow_mut()
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(MAX_DATAGRAM))
        });
        PooledBuffer { inner: Some(buf) }
    }

    /// Number of buffers currently pooled on this thread
    pub fn len(&self) -> usize {
        POOL.with(|pool| pool.borrow().len())
    }

    /// Check whether this thread's pool is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all pooled buffers on this thread
    pub fn clear(&self) {
        POOL.with(|pool| pool.borrow_mut().clear());
    }
}

/// A buffer that returns itself to the pool when dropped
///
/// Dereferences to `Vec<u8>` so it can be resized for `recv_from` and
/// truncated to the datagram length afterwards.
pub struct PooledBuffer {
    inner: Option<Vec<u8>>,
}

impl PooledBuffer {
    /// Consume the pooled buffer and keep the inner Vec.
    ///
    /// The returned Vec is not pooled when dropped.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.inner.take().unwrap()
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().unwrap()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut().unwrap()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.inner.as_ref().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.inner.take() {
            POOL.with(|pool| {
                let mut pool = pool.borrow_mut();
                if buf.capacity() <= MAX_DATAGRAM * 2 && pool.len() < MAX_POOL_SIZE {
                    buf.clear();
                    pool.push(buf);
                }
            });
        }
    }
}
