//! Recycling pool for outbound datagram buffers.
//!
//! The publisher allocates a fresh buffer per datagram and hands it to the
//! packet history; when history eviction discards the oldest packet its
//! buffer comes back here instead of the allocator. Lock-free; losing a
//! race just means an extra allocation, so this is a performance aid and
//! not a correctness requirement.

use crate::wire::MAX_MSG_SIZE;
use crossbeam::queue::SegQueue;

/// Initial capacity of pooled buffers: the datagram budget plus the 8-byte
/// packet number header.
const BUFFER_CAPACITY: usize = MAX_MSG_SIZE + 8;

/// A lock-free LIFO of owned byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: SegQueue<Vec<u8>>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> BufferPool {
        BufferPool {
            buffers: SegQueue::new(),
        }
    }

    /// Take a cleared buffer from the pool, or allocate one on a miss.
    pub fn get(&self) -> Vec<u8> {
        self.buffers
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAPACITY))
    }

    /// Return a buffer for reuse. The contents are cleared; the capacity is
    /// kept.
    pub fn put(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.buffers.push(buffer);
    }

    /// Number of buffers currently pooled (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// `true` when no buffers are pooled.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
