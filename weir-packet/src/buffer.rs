//! Buffer pool for outbound frame encoding
//!
//! Pre-allocates Ethernet-sized buffers that are reused across packet
//! builds so the send path stays allocation-free.

use parking_lot::Mutex;
use std::sync::Arc;

/// Maximum Ethernet II frame size without FCS: header (14) + MTU (1500).
pub const ETH_MAX_FRAME_LEN: usize = 1514;

/// A reusable buffer checked out of a [`BufferPool`].
///
/// Returned to its pool on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    /// Get a mutable slice of the buffer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get an immutable slice of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length of the data currently in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.data);
        buffer.clear();
        if buffer.capacity() <= ETH_MAX_FRAME_LEN * 2 {
            self.pool.lock().push(buffer);
        }
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for PooledBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A pool of reusable Ethernet-sized buffers.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers.
    pub fn new(pool_size: usize) -> Self {
        let buffers: Vec<Vec<u8>> = (0..pool_size)
            .map(|_| Vec::with_capacity(ETH_MAX_FRAME_LEN))
            .collect();

        Self {
            buffers: Arc::new(Mutex::new(buffers)),
        }
    }

    /// Check a zeroed, full-frame-sized buffer out of the pool.
    ///
    /// If the pool is empty a new buffer is allocated.
    pub fn get(&self) -> PooledBuffer {
        let mut data = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(ETH_MAX_FRAME_LEN));
        data.clear();
        data.resize(ETH_MAX_FRAME_LEN, 0);

        PooledBuffer {
            data,
            pool: Arc::clone(&self.buffers),
        }
    }

    /// Current number of idle buffers in the pool.
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}
