use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bounded pool of equally sized byte buffers, shared between uploads to
/// avoid reallocating a chunk buffer per file.
#[derive(Debug)]
pub struct BufferPool {
    slots: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Creates an empty pool that retains at most `capacity` buffers of
    /// `buffer_size` bytes.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            buffer_size,
            capacity,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.slots().len()
    }

    /// Takes an idle buffer, or allocates a new one if the pool is empty.
    pub fn get(&self) -> Vec<u8> {
        self.slots()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    /// Returns a buffer for reuse. Buffers of the wrong size, or in excess
    /// of the capacity, are dropped.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut slots = self.slots();
        if slots.len() < self.capacity {
            slots.push(buf);
        }
    }

    /// Checks out a buffer that goes back to the pool when dropped.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        PooledBuffer {
            buf: self.get(),
            pool: Some(Arc::clone(self)),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A chunk buffer, optionally owned by a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// A freshly allocated buffer that is not returned anywhere on drop.
    pub fn unpooled(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            pool: None,
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.buf));
        }
    }
}
