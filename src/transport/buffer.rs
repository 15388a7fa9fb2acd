//! Reusable byte buffers for the broadcast path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared pool of reusable byte buffers.
///
/// Buffers handed out by [`BufferPool::acquire`] are plain `Vec<u8>`s; give
/// them back with [`BufferPool::release`] once the bytes have been written.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<VecDeque<Vec<u8>>>,
    buffer_size: usize,
    max_buffers: usize,
}

impl BufferPool {
    /// Create a pool holding `max_buffers` buffers of `buffer_size` reserved bytes.
    #[must_use]
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        let mut deque = VecDeque::with_capacity(max_buffers);
        for _ in 0..max_buffers {
            deque.push_back(Vec::with_capacity(buffer_size));
        }

        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(deque),
                buffer_size,
                max_buffers,
            }),
        }
    }

    /// Take an empty buffer with at least `size` bytes of capacity.
    ///
    /// Falls back to a fresh allocation when the pool is drained.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let pooled = self
            .inner
            .buffers
            .lock()
            .expect("buffer pool mutex poisoned")
            .pop_front();

        match pooled {
            Some(mut buffer) => {
                buffer.clear();
                buffer.reserve(size);
                buffer
            }
            None => Vec::with_capacity(size.max(self.inner.buffer_size)),
        }
    }

    /// Return a buffer. It is kept only while the pool has room.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut guard = self
            .inner
            .buffers
            .lock()
            .expect("buffer pool mutex poisoned");
        if guard.len() < self.inner.max_buffers {
            guard.push_back(buffer);
        }
    }

    /// Buffers currently idle in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner
            .buffers
            .lock()
            .expect("buffer pool mutex poisoned")
            .len()
    }

    /// Capacity reserved for each pre-allocated buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Maximum number of buffers managed by the pool.
    #[must_use]
    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }
}
