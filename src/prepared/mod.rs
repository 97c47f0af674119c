// SPDX-License-Identifier: Apache-2.0

//! Prepared statement cache (§4.5).
//!
//! Exactly one [`PreparedEntry`] per `(keyspace, query)` pair; at most
//! one PREPARE RPC in flight per key with concurrent callers joining a
//! waiter list (§9 "an entry that other callers wait on... a tagged
//! variant `Preparing{waiters}` / `Ready{id, meta}` / `Failed{err}`").
//! Bounded by `maxPrepared` with LRU eviction.

use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{errors::Result, protocol::messages::result::Prepared as WirePrepared};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrepareKey {
    pub keyspace: Option<String>,
    pub query: String,
}

/// Cached metadata for one prepared statement (§3 "PreparedEntry").
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    pub query_id: Vec<u8>,
    pub result_metadata_id: Option<Vec<u8>>,
    pub bind_metadata: crate::protocol::messages::result::ResultMetadata,
    pub result_metadata: crate::protocol::messages::result::ResultMetadata,
    /// Indexes into `bind_metadata.columns` that make up the partition
    /// key, consulted by token-aware routing.
    pub partition_key_indexes: Vec<usize>,
    /// Hosts known to have this statement prepared already, consulted
    /// by "prepare on all hosts" (§3 supplementary field).
    known_hosts: Arc<Mutex<std::collections::HashSet<SocketAddr>>>,
}

impl PreparedEntry {
    fn from_wire(wire: WirePrepared) -> Self {
        let partition_key_indexes = Vec::new(); // v4 protocol carries no pk_indexes; v5 RESULT_METADATA does (§1 out of scope beyond framing).
        Self {
            query_id: wire.id,
            result_metadata_id: wire.result_metadata_id,
            bind_metadata: wire.bind_metadata,
            result_metadata: wire.result_metadata,
            partition_key_indexes,
            known_hosts: Arc::new(Mutex::new(std::collections::HashSet::new())),
        }
    }

    pub fn mark_known(&self, host: SocketAddr) {
        self.known_hosts.lock().insert(host);
    }

    pub fn is_known_on(&self, host: SocketAddr) -> bool {
        self.known_hosts.lock().contains(&host)
    }

    pub fn known_hosts(&self) -> Vec<SocketAddr> {
        self.known_hosts.lock().iter().copied().collect()
    }
}

enum Slot {
    Preparing(Vec<oneshot::Sender<Result<Arc<PreparedEntry>>>>),
    Ready(Arc<PreparedEntry>),
}

/// At-most-one-in-flight-prepare cache with bounded LRU eviction
/// (§4.5, §8 "At-most-one prepare" / "LRU eviction").
pub struct PreparedCache {
    slots: DashMap<PrepareKey, Slot>,
    /// Recency order, most-recently-used at the back. Protected
    /// separately from `slots` since eviction needs to walk it without
    /// holding any single shard lock of the DashMap.
    lru: Mutex<VecDeque<PrepareKey>>,
    capacity: usize,
}

impl PreparedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            lru: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get_cached(&self, key: &PrepareKey) -> Option<Arc<PreparedEntry>> {
        match self.slots.get(key).map(|s| match s.value() {
            Slot::Ready(entry) => Some(entry.clone()),
            Slot::Preparing(_) => None,
        }) {
            Some(Some(entry)) => {
                self.touch(key);
                Some(entry)
            },
            _ => None,
        }
    }

    fn touch(&self, key: &PrepareKey) {
        let mut lru = self.lru.lock();
        if let Some(pos) = lru.iter().position(|k| k == key) {
            lru.remove(pos);
        }
        lru.push_back(key.clone());
    }

    /// Claims the right to issue the PREPARE RPC for `key`, or
    /// registers the caller as a waiter on an in-flight one, or returns
    /// the cached entry directly. Mirrors the teacher's DashMap-backed
    /// pending-table pattern, generalized from per-request to per-key.
    pub fn claim(&self, key: &PrepareKey) -> ClaimOutcome {
        match self.slots.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Slot::Preparing(Vec::new()));
                ClaimOutcome::YouPrepare
            },
            dashmap::mapref::entry::Entry::Occupied(mut o) => match o.get_mut() {
                Slot::Ready(entry) => {
                    let entry = entry.clone();
                    drop(o);
                    self.touch(key);
                    ClaimOutcome::Cached(entry)
                },
                Slot::Preparing(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    ClaimOutcome::Wait(rx)
                },
            },
        }
    }

    /// Called by the caller that won `claim`'s `YouPrepare` branch once
    /// the PREPARE RPC completes; fans the result out to every waiter
    /// (§4.5 "all concurrent callers receive the same result").
    pub fn resolve(&self, key: &PrepareKey, result: Result<WirePrepared>) {
        let waiters = match self.slots.remove(key) {
            Some((_, Slot::Preparing(waiters))) => waiters,
            _ => Vec::new(),
        };

        match result {
            Ok(wire) => {
                let entry = Arc::new(PreparedEntry::from_wire(wire));
                self.slots.insert(key.clone(), Slot::Ready(entry.clone()));
                self.touch(key);
                self.evict_if_over_capacity();
                for tx in waiters {
                    let _ = tx.send(Ok(entry.clone()));
                }
            },
            Err(e) => {
                // Failures leave no cached entry (§4.5).
                for tx in waiters {
                    let _ = tx.send(Err(e.shallow_clone()));
                }
            },
        }
    }

    fn evict_if_over_capacity(&self) {
        let mut lru = self.lru.lock();
        while lru.len() > self.capacity {
            if let Some(victim) = lru.pop_front() {
                self.slots.remove(&victim);
            }
        }
    }
}

pub enum ClaimOutcome {
    YouPrepare,
    Wait(oneshot::Receiver<Result<Arc<PreparedEntry>>>),
    Cached(Arc<PreparedEntry>),
}

impl std::fmt::Debug for PreparedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::DriverError, protocol::messages::result::ResultMetadata};

    fn empty_metadata() -> ResultMetadata {
        ResultMetadata {
            flags: crate::protocol::messages::result::RowsFlags::empty(),
            paging_state: None,
            columns: Vec::new(),
        }
    }

    fn wire(id: &[u8]) -> WirePrepared {
        WirePrepared {
            id: id.to_vec(),
            result_metadata_id: None,
            bind_metadata: empty_metadata(),
            result_metadata: empty_metadata(),
        }
    }

    #[test]
    fn second_claimant_waits_instead_of_preparing() {
        let cache = PreparedCache::new(10);
        let key = PrepareKey { keyspace: None, query: "SELECT 1".into() };
        assert!(matches!(cache.claim(&key), ClaimOutcome::YouPrepare));
        match cache.claim(&key) {
            ClaimOutcome::Wait(_) => {},
            _ => panic!("expected second caller to wait"),
        }
    }

    #[tokio::test]
    async fn resolve_fans_out_to_all_waiters() {
        let cache = Arc::new(PreparedCache::new(10));
        let key = PrepareKey { keyspace: None, query: "SELECT 1".into() };
        assert!(matches!(cache.claim(&key), ClaimOutcome::YouPrepare));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            match cache.claim(&key) {
                ClaimOutcome::Wait(rx) => waiters.push(rx),
                _ => panic!("expected waiter"),
            }
        }

        cache.resolve(&key, Ok(wire(b"\x00\x01")));

        for rx in waiters {
            let entry = rx.await.unwrap().unwrap();
            assert_eq!(entry.query_id, b"\x00\x01");
        }
    }

    #[test]
    fn failed_prepare_leaves_no_cached_entry() {
        let cache = PreparedCache::new(10);
        let key = PrepareKey { keyspace: None, query: "BAD SYNTAX".into() };
        assert!(matches!(cache.claim(&key), ClaimOutcome::YouPrepare));
        cache.resolve(&key, Err(DriverError::Argument("syntax error".into())));
        assert!(cache.get_cached(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_evicts_oldest_after_capacity_plus_one() {
        let cache = PreparedCache::new(2);
        for i in 0..3u8 {
            let key = PrepareKey { keyspace: None, query: format!("Q{i}") };
            assert!(matches!(cache.claim(&key), ClaimOutcome::YouPrepare));
            cache.resolve(&key, Ok(wire(&[i])));
        }
        assert_eq!(cache.len(), 2);
        let evicted = PrepareKey { keyspace: None, query: "Q0".into() };
        assert!(cache.get_cached(&evicted).is_none());
        let kept = PrepareKey { keyspace: None, query: "Q2".into() };
        assert!(cache.get_cached(&kept).is_some());
    }
}
