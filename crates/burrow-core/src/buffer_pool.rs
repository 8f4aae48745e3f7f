//! Reusable read buffers
//!
//! Every reader loop needs a large scratch buffer; recycling them
//! avoids a fresh allocation per connection. A borrowed buffer is
//! exclusively owned by the borrowing task and returns to the pool
//! when the guard drops. The idle list is bounded so an accept burst
//! cannot pin memory forever.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Concurrent pool of fixed-size byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

struct Inner {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::new()),
                buffer_size,
                max_idle,
            }),
        }
    }

    /// Borrow a zero-initialized buffer of `buffer_size` bytes.
    pub fn get(&self) -> PooledBuf {
        let buf = self
            .inner
            .idle
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        PooledBuf {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<Inner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Ok(mut idle) = self.pool.idle.lock() {
                if idle.len() < self.pool.max_idle {
                    idle.push(buf);
                }
            }
        }
    }
}
