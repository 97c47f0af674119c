// SPDX-License-Identifier: Apache-2.0

//! Free stream-id allocator (§3 "Connection" invariants: "a stream-id
//! is free iff no pending entry; total pending <= stream-id-space-size").

use parking_lot::Mutex;

use crate::protocol::version::ProtocolVersion;

/// A LIFO free-list of stream ids. LIFO (rather than a round-robin
/// counter) keeps recently-freed ids warm, which matters nothing for
/// correctness but avoids needing a full bitmap scan on every borrow.
#[derive(Debug)]
pub struct StreamIdAllocator {
    free: Mutex<Vec<i16>>,
    capacity: usize,
}

impl StreamIdAllocator {
    pub fn new(version: ProtocolVersion) -> Self {
        let max = if version.stream_id_bits() == 8 { 128 } else { i16::MAX as i64 };
        let free: Vec<i16> = (0..max as i16).rev().collect();
        Self {
            capacity: free.len(),
            free: Mutex::new(free),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a free stream id, or `None` if the space is exhausted
    /// (§4.2 "error `BusyConnection` if exhausted").
    pub fn allocate(&self) -> Option<i16> {
        self.free.lock().pop()
    }

    pub fn release(&self, id: i16) {
        debug_assert!(id >= 0, "EVENT stream id -1 is never allocated from this pool");
        self.free.lock().push(id);
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_recovers() {
        let alloc = StreamIdAllocator::new(ProtocolVersion::V1);
        let mut taken = Vec::new();
        while let Some(id) = alloc.allocate() {
            taken.push(id);
        }
        assert_eq!(taken.len(), alloc.capacity());
        assert!(alloc.allocate().is_none());
        alloc.release(taken.pop().unwrap());
        assert!(alloc.allocate().is_some());
    }

    #[test]
    fn allocated_ids_are_unique_at_any_instant() {
        let alloc = StreamIdAllocator::new(ProtocolVersion::V4);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = alloc.allocate().unwrap();
            assert!(seen.insert(id), "duplicate stream id handed out while live");
        }
    }
}
