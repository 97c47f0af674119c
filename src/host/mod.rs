// SPDX-License-Identifier: Apache-2.0

//! Host registry: the authoritative cluster map (§3 "Cluster State",
//! §4.4 "Host Registry").
//!
//! Mutated only by the Control Connection; every other component reads
//! a consistent snapshot via [`HostRegistry::snapshot`] (§5 "Host
//! registry is mutated only by the Control Connection; all readers see
//! a consistent snapshot"). `Host` itself stores no back-reference to
//! its `Pool` — per §9's note on cyclic references, the Pool is owned
//! by the Session and keyed by host address instead.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use arc_swap::ArcSwap;
use uuid::Uuid;

/// Distance classification (§4.4, §4.6): governs pool sizing and which
/// hosts a load-balancing policy is willing to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Distance {
    Local,
    Remote,
    Ignored,
}

impl Distance {
    /// The minimum over all policies in effect wins (§4.6 "Distance").
    pub fn min(self, other: Self) -> Self {
        self.min_ord(other)
    }

    fn min_ord(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }
}

/// A cluster member (§3 "Host").
#[derive(Debug)]
pub struct Host {
    pub address: SocketAddr,
    pub host_id: Uuid,
    pub datacenter: String,
    pub rack: String,
    pub release_version: String,
    /// `None` until the control connection reads `dse_version` off
    /// `system.local`/`system.peers` — absent on OSS Cassandra.
    pub dse_version: Option<String>,
    pub tokens: Vec<crate::token::Token>,
    pub schema_version: Option<Uuid>,
    up: AtomicBool,
}

impl Host {
    pub fn new(address: SocketAddr, host_id: Uuid, datacenter: String, rack: String) -> Self {
        Self {
            address,
            host_id,
            datacenter,
            rack,
            release_version: String::new(),
            dse_version: None,
            tokens: Vec::new(),
            schema_version: None,
            up: AtomicBool::new(true),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(AtomicOrdering::Acquire)
    }

    /// Marks the host up/down and reports whether this call changed
    /// the state (§4.4 "Host up/down" transitions emit events exactly
    /// once per edge).
    pub fn set_up(&self, up: bool) -> bool {
        self.up.swap(up, AtomicOrdering::AcqRel) != up
    }
}

/// An immutable point-in-time view handed to readers (§5 "consistent
/// snapshot"). Cheap to clone: an `Arc` per host plus contact points.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub hosts: HashMap<SocketAddr, Arc<Host>>,
    pub protocol_version: Option<crate::protocol::version::ProtocolVersion>,
    pub schema_version_digest: Option<Uuid>,
}

impl ClusterSnapshot {
    pub fn up_hosts(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values().filter(|h| h.is_up())
    }

    pub fn hosts_in_dc<'a>(&'a self, dc: &'a str) -> impl Iterator<Item = &'a Arc<Host>> {
        self.up_hosts().filter(move |h| h.datacenter == dc)
    }
}

/// Cluster State (§3): the map name → Host, contact points, negotiated
/// protocol version, schema digest. `ArcSwap` gives lock-free reads
/// from every component other than the control connection, which holds
/// the sole writer lock implicitly by being the only caller of the
/// mutating methods.
#[derive(Debug)]
pub struct HostRegistry {
    current: ArcSwap<ClusterSnapshot>,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ClusterSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.current.load_full()
    }

    /// Inserts or replaces a host (§4.4 "added by Control Connection on
    /// discovery").
    pub fn upsert_host(&self, host: Host) -> Arc<Host> {
        let host = Arc::new(host);
        self.current.rcu(|snapshot| {
            let mut next = (**snapshot).clone();
            next.hosts.insert(host.address, host.clone());
            next
        });
        host
    }

    /// Removes a host (§3 "removed on TOPOLOGY_CHANGE REMOVED_NODE or
    /// explicit shutdown").
    pub fn remove_host(&self, address: SocketAddr) -> Option<Arc<Host>> {
        let mut removed = None;
        self.current.rcu(|snapshot| {
            let mut next = (**snapshot).clone();
            removed = next.hosts.remove(&address);
            next
        });
        removed
    }

    pub fn set_protocol_version(&self, version: crate::protocol::version::ProtocolVersion) {
        self.current.rcu(|snapshot| {
            let mut next = (**snapshot).clone();
            next.protocol_version = Some(version);
            next
        });
    }

    pub fn set_schema_digest(&self, digest: Uuid) {
        self.current.rcu(|snapshot| {
            let mut next = (**snapshot).clone();
            next.schema_version_digest = Some(digest);
            next
        });
    }

    pub fn host(&self, address: SocketAddr) -> Option<Arc<Host>> {
        self.current.load().hosts.get(&address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> SocketAddr {
        format!("127.0.0.{n}:9042").parse().unwrap()
    }

    #[test]
    fn distance_min_picks_lowest() {
        assert_eq!(Distance::Local.min(Distance::Remote), Distance::Local);
        assert_eq!(Distance::Remote.min(Distance::Ignored), Distance::Remote);
    }

    #[test]
    fn registry_snapshot_is_consistent_after_concurrent_upsert() {
        let registry = HostRegistry::new();
        let h1 = Host::new(addr(1), Uuid::nil(), "dc1".into(), "r1".into());
        registry.upsert_host(h1);
        let snap1 = registry.snapshot();
        assert_eq!(snap1.hosts.len(), 1);

        let h2 = Host::new(addr(2), Uuid::nil(), "dc1".into(), "r1".into());
        registry.upsert_host(h2);
        // The earlier snapshot is untouched (copy-on-write).
        assert_eq!(snap1.hosts.len(), 1);
        assert_eq!(registry.snapshot().hosts.len(), 2);
    }

    #[test]
    fn set_up_reports_transition_only_once() {
        let host = Host::new(addr(1), Uuid::nil(), "dc1".into(), "r1".into());
        assert!(host.is_up());
        assert!(host.set_up(false));
        assert!(!host.set_up(false));
        assert!(host.set_up(true));
    }

    #[test]
    fn remove_host_drops_it_from_snapshot() {
        let registry = HostRegistry::new();
        registry.upsert_host(Host::new(addr(1), Uuid::nil(), "dc1".into(), "r1".into()));
        assert!(registry.remove_host(addr(1)).is_some());
        assert!(registry.snapshot().hosts.is_empty());
    }
}
