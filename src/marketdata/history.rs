//! Bounded retention of sent datagrams for lost-packet replay.

use crate::sync::BufferPool;
use crate::utils::{read, write};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::RwLock;

/// How many of the most recent datagrams the publisher retains. Requests
/// outside this window silently return fewer packets; the receiver treats
/// such gaps as permanent.
pub(crate) const HISTORY_CAPACITY: usize = 10_000;

struct PacketRecord {
    number: u64,
    data: Vec<u8>,
}

/// The newest-wins datagram history behind the TCP replay responder.
pub(crate) struct PacketHistory {
    packets: RwLock<VecDeque<PacketRecord>>,
    pool: Arc<BufferPool>,
    capacity: usize,
}

impl PacketHistory {
    pub(crate) fn new(pool: Arc<BufferPool>) -> PacketHistory {
        PacketHistory::with_capacity(HISTORY_CAPACITY, pool)
    }

    pub(crate) fn with_capacity(capacity: usize, pool: Arc<BufferPool>) -> PacketHistory {
        PacketHistory {
            packets: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            pool,
            capacity,
        }
    }

    /// Append a sent datagram, evicting the oldest when full. Evicted
    /// buffers go back to the pool.
    pub(crate) fn remember(&self, number: u64, data: Vec<u8>) {
        let mut packets = write(&self.packets);
        if packets.len() >= self.capacity
            && let Some(evicted) = packets.pop_front()
        {
            self.pool.put(evicted.data);
        }
        packets.push_back(PacketRecord { number, data });
    }

    /// Copies of every retained datagram with `start <= number < end`, in
    /// packet-number order. Copying under the read lock keeps the replay
    /// responder's slow TCP writes from stalling the publisher.
    pub(crate) fn snapshot_range(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        let packets = read(&self.packets);
        let mut found = Vec::new();
        for record in packets.iter() {
            if record.number < start {
                continue;
            }
            if record.number >= end {
                break;
            }
            found.push(record.data.clone());
        }
        found
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        read(&self.packets).len()
    }
}
