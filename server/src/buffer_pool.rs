//! Shared pool of byte buffers for receive accumulators and send batches

use bytes::BytesMut;
use std::sync::{Mutex, PoisonError};

pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            buffer_size,
            max_pooled,
        }
    }

    /// Hands out an empty buffer, reusing a released one when available
    pub fn acquire(&self) -> BytesMut {
        let reused = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        reused.unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    /// Returns a buffer to the pool
    ///
    /// Buffers that shrank below the pool's buffer size are dropped, as are
    /// buffers released while the pool is full.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < self.buffer_size {
            return;
        }
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    pub fn available(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
