//! Lock-free pool of result buffers
//!
//! String results handed to the host must outlive the call that produced
//! them, so their bytes are copied into pooled buffers that the ABI layer
//! keeps until the next call on the same thread. Buffers go back to the
//! pool on drop.

use crossbeam::queue::ArrayQueue;
use libc::c_char;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config::PoolConfig;

/// Default initial capacity of a pooled buffer
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// A byte buffer borrowed from a [`BufferPool`]
pub struct PooledBuffer {
    buf: Vec<u8>,
    /// Pool to return to; dangling once the pool is gone
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    /// Replace the contents with `s` followed by a NUL terminator
    ///
    /// The returned pointer is valid until the buffer is written again or
    /// dropped. `s` must not contain NUL bytes; the marshaler rejects those
    /// before anything reaches here.
    pub fn write_c_str(&mut self, s: &str) -> *const c_char {
        self.buf.clear();
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.buf.as_ptr() as *const c_char
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    buffer_capacity: usize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        buf.clear();
        // Full queue: let the buffer go
        let _ = self.free.push(buf);
    }
}

/// Pool of reusable result buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool holding at most `max_idle` idle buffers, `prefill` of
    /// them allocated up front
    pub fn new(prefill: usize, max_idle: usize, buffer_capacity: usize) -> Self {
        let free = ArrayQueue::new(max_idle.max(1));
        for _ in 0..prefill.min(max_idle) {
            let _ = free.push(Vec::with_capacity(buffer_capacity));
        }
        Self {
            inner: Arc::new(PoolInner {
                free,
                buffer_capacity,
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.prefill, config.max_idle, config.buffer_capacity)
    }

    /// Take a buffer, allocating a fresh one when none is idle
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_capacity));
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Drop every idle buffer and stop recycling
    ///
    /// Buffers still held are freed when they are dropped.
    pub fn drain(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let mut released = 0;
        while self.inner.free.pop().is_some() {
            released += 1;
        }
        released
    }

    pub fn is_drained(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of buffers currently handed out
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    /// Number of idle buffers ready for reuse
    pub fn idle(&self) -> usize {
        self.inner.free.len()
    }

    pub fn max_idle(&self) -> usize {
        self.inner.free.capacity()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}
