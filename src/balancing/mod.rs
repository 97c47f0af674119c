// SPDX-License-Identifier: Apache-2.0

//! Load balancing policies (§4.6).
//!
//! `newQueryPlan` returns a lazy, single-traversal iterator of hosts;
//! the common layering named in the spec — `TokenAware` wraps
//! `DcAware` wraps `RoundRobin` — is implemented as literal decorators
//! over the [`LoadBalancingPolicy`] trait object, each holding its
//! wrapped policy by `Arc`.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    host::{ClusterSnapshot, Distance, Host},
    token::{Partitioner, ReplicationStrategy, Token, TokenRing},
};

/// Per-request routing hints a policy may act on (§4.6 "when a routing
/// key is present" / "preferred-host proxy"). Distinct from
/// `request::execution::ExecutionOptions` — this is only the subset a
/// load-balancing policy needs, so `balancing` never depends on
/// `request`.
#[derive(Debug, Clone, Default)]
pub struct RoutingInfo {
    pub keyspace: Option<String>,
    pub routing_key: Option<Vec<u8>>,
    pub preferred_host: Option<SocketAddr>,
    pub is_idempotent: bool,
}

pub trait LoadBalancingPolicy: Send + Sync + std::fmt::Debug {
    fn distance(&self, host: &Host) -> Distance;

    /// §4.6 contract: "lazy and may be consumed across retries". A
    /// boxed iterator is `'static` here because it owns a materialized
    /// `Vec` snapshot rather than borrowing the `ClusterSnapshot` — the
    /// caller may hold the plan across an `.await` the snapshot itself
    /// does not survive.
    fn new_query_plan(
        &self,
        snapshot: &ClusterSnapshot,
        routing: &RoutingInfo,
    ) -> Box<dyn Iterator<Item = Arc<Host>> + Send>;
}

/// Base policy (§4.6): every up host, round-robin order.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn rotated(&self, mut hosts: Vec<Arc<Host>>) -> Vec<Arc<Host>> {
        if hosts.is_empty() {
            return hosts;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        hosts.rotate_left(start);
        hosts
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn distance(&self, _host: &Host) -> Distance {
        Distance::Local
    }

    fn new_query_plan(
        &self,
        snapshot: &ClusterSnapshot,
        _routing: &RoutingInfo,
    ) -> Box<dyn Iterator<Item = Arc<Host>> + Send> {
        let hosts: Vec<Arc<Host>> = snapshot.up_hosts().cloned().collect();
        Box::new(self.rotated(hosts).into_iter())
    }
}

/// DC-aware (§4.6): local-DC hosts round-robin, then up to
/// `used_hosts_per_remote_dc` remote hosts when the request is
/// idempotent and none of the local hosts already failed this
/// attempt (query-plan exhaustion is the Request Handler's job; this
/// policy only orders the candidates).
#[derive(Debug)]
pub struct DcAwarePolicy {
    local_dc: String,
    used_hosts_per_remote_dc: usize,
    local_rr: RoundRobinPolicy,
    remote_rr: RoundRobinPolicy,
}

impl DcAwarePolicy {
    pub fn new(local_dc: impl Into<String>, used_hosts_per_remote_dc: usize) -> Self {
        Self {
            local_dc: local_dc.into(),
            used_hosts_per_remote_dc,
            local_rr: RoundRobinPolicy::new(),
            remote_rr: RoundRobinPolicy::new(),
        }
    }
}

impl LoadBalancingPolicy for DcAwarePolicy {
    fn distance(&self, host: &Host) -> Distance {
        if host.datacenter == self.local_dc {
            Distance::Local
        } else if self.used_hosts_per_remote_dc > 0 {
            Distance::Remote
        } else {
            Distance::Ignored
        }
    }

    fn new_query_plan(
        &self,
        snapshot: &ClusterSnapshot,
        routing: &RoutingInfo,
    ) -> Box<dyn Iterator<Item = Arc<Host>> + Send> {
        let local: Vec<Arc<Host>> = snapshot.hosts_in_dc(&self.local_dc).cloned().collect();
        let mut plan = self.local_rr.rotated(local);

        if routing.is_idempotent && self.used_hosts_per_remote_dc > 0 {
            let remote: Vec<Arc<Host>> = snapshot
                .up_hosts()
                .filter(|h| h.datacenter != self.local_dc)
                .cloned()
                .collect();
            plan.extend(self.remote_rr.rotated(remote).into_iter().take(self.used_hosts_per_remote_dc));
        }

        Box::new(plan.into_iter())
    }
}

/// Token-aware (§4.6): places token-owning replicas first, then falls
/// back to `inner`'s plan for the rest (deduplicated).
#[derive(Debug)]
pub struct TokenAwarePolicy {
    inner: Arc<dyn LoadBalancingPolicy>,
    partitioner: Arc<dyn Partitioner>,
    ring: Arc<parking_lot::RwLock<TokenRing>>,
    strategy: Arc<parking_lot::RwLock<ReplicationStrategy>>,
}

impl TokenAwarePolicy {
    pub fn new(
        inner: Arc<dyn LoadBalancingPolicy>,
        partitioner: Arc<dyn Partitioner>,
        ring: Arc<parking_lot::RwLock<TokenRing>>,
        strategy: Arc<parking_lot::RwLock<ReplicationStrategy>>,
    ) -> Self {
        Self { inner, partitioner, ring, strategy }
    }

    fn token_for(&self, routing_key: &[u8]) -> Token {
        self.partitioner.token(routing_key)
    }
}

impl LoadBalancingPolicy for TokenAwarePolicy {
    fn distance(&self, host: &Host) -> Distance {
        self.inner.distance(host)
    }

    fn new_query_plan(
        &self,
        snapshot: &ClusterSnapshot,
        routing: &RoutingInfo,
    ) -> Box<dyn Iterator<Item = Arc<Host>> + Send> {
        let Some(routing_key) = routing.routing_key.as_deref() else {
            return self.inner.new_query_plan(snapshot, routing);
        };

        let token = self.token_for(routing_key);
        let replica_addrs = {
            let ring = self.ring.read();
            if ring.is_empty() {
                Vec::new()
            } else {
                ring.replicas(token, &self.strategy.read())
            }
        };

        let mut seen = std::collections::HashSet::new();
        let mut plan: Vec<Arc<Host>> = Vec::with_capacity(replica_addrs.len());
        for addr in replica_addrs {
            if let Some(host) = snapshot.hosts.get(&addr) {
                if host.is_up() && seen.insert(addr) {
                    plan.push(host.clone());
                }
            }
        }

        for host in self.inner.new_query_plan(snapshot, routing) {
            if seen.insert(host.address) {
                plan.push(host);
            }
        }

        Box::new(plan.into_iter())
    }
}

/// Preferred-host proxy (§4.6): yields the caller's preferred host
/// first (if still up), then the wrapped plan with it removed.
#[derive(Debug)]
pub struct PreferredHostPolicy {
    inner: Arc<dyn LoadBalancingPolicy>,
}

impl PreferredHostPolicy {
    pub fn new(inner: Arc<dyn LoadBalancingPolicy>) -> Self {
        Self { inner }
    }
}

impl LoadBalancingPolicy for PreferredHostPolicy {
    fn distance(&self, host: &Host) -> Distance {
        self.inner.distance(host)
    }

    fn new_query_plan(
        &self,
        snapshot: &ClusterSnapshot,
        routing: &RoutingInfo,
    ) -> Box<dyn Iterator<Item = Arc<Host>> + Send> {
        let Some(preferred) = routing.preferred_host else {
            return self.inner.new_query_plan(snapshot, routing);
        };
        let Some(preferred_host) = snapshot.hosts.get(&preferred).filter(|h| h.is_up()) else {
            return self.inner.new_query_plan(snapshot, routing);
        };

        let mut plan = vec![preferred_host.clone()];
        plan.extend(self.inner.new_query_plan(snapshot, routing).filter(|h| h.address != preferred));
        Box::new(plan.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(n: u8, dc: &str) -> Arc<Host> {
        Arc::new(Host::new(
            format!("127.0.0.{n}:9042").parse().unwrap(),
            uuid::Uuid::nil(),
            dc.to_string(),
            "r1".into(),
        ))
    }

    fn snapshot(hosts: Vec<Arc<Host>>) -> ClusterSnapshot {
        ClusterSnapshot {
            hosts: hosts.into_iter().map(|h| (h.address, h)).collect(),
            protocol_version: None,
            schema_version_digest: None,
        }
    }

    #[test]
    fn round_robin_rotates_between_calls() {
        let policy = RoundRobinPolicy::new();
        let snap = snapshot(vec![host(1, "dc1"), host(2, "dc1"), host(3, "dc1")]);
        let routing = RoutingInfo::default();
        let first: Vec<_> = policy.new_query_plan(&snap, &routing).map(|h| h.address).collect();
        let second: Vec<_> = policy.new_query_plan(&snap, &routing).map(|h| h.address).collect();
        assert_ne!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn dc_aware_prefers_local_and_excludes_remote_without_idempotence() {
        let policy = DcAwarePolicy::new("dc1", 1);
        let snap = snapshot(vec![host(1, "dc1"), host(2, "dc2")]);
        let plan: Vec<_> = policy
            .new_query_plan(&snap, &RoutingInfo::default())
            .map(|h| h.datacenter.clone())
            .collect();
        assert_eq!(plan, vec!["dc1".to_string()]);
    }

    #[test]
    fn dc_aware_appends_remote_when_idempotent() {
        let policy = DcAwarePolicy::new("dc1", 1);
        let snap = snapshot(vec![host(1, "dc1"), host(2, "dc2")]);
        let routing = RoutingInfo { is_idempotent: true, ..Default::default() };
        let plan: Vec<_> = policy.new_query_plan(&snap, &routing).map(|h| h.datacenter.clone()).collect();
        assert_eq!(plan, vec!["dc1".to_string(), "dc2".to_string()]);
    }

    #[test]
    fn preferred_host_proxy_yields_it_first() {
        let inner = Arc::new(RoundRobinPolicy::new());
        let policy = PreferredHostPolicy::new(inner);
        let h1 = host(1, "dc1");
        let h2 = host(2, "dc1");
        let snap = snapshot(vec![h1.clone(), h2.clone()]);
        let routing = RoutingInfo { preferred_host: Some(h2.address), ..Default::default() };
        let plan: Vec<_> = policy.new_query_plan(&snap, &routing).map(|h| h.address).collect();
        assert_eq!(plan[0], h2.address);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn token_aware_places_replica_first() {
        let inner = Arc::new(RoundRobinPolicy::new());
        let partitioner = Arc::new(crate::token::Murmur3Partitioner);
        let h1 = host(1, "dc1");
        let h2 = host(2, "dc1");
        let token = partitioner.token(b"pk");

        let mut ring = TokenRing::new();
        ring.rebuild(vec![
            (token, h1.address, "dc1".to_string()),
            (Token(token.0.wrapping_add(1_000_000)), h2.address, "dc1".to_string()),
        ]);

        let policy = TokenAwarePolicy::new(
            inner,
            partitioner,
            Arc::new(parking_lot::RwLock::new(ring)),
            Arc::new(parking_lot::RwLock::new(ReplicationStrategy::Simple { replication_factor: 1 })),
        );

        let snap = snapshot(vec![h1.clone(), h2.clone()]);
        let routing = RoutingInfo { routing_key: Some(b"pk".to_vec()), ..Default::default() };
        let plan: Vec<_> = policy.new_query_plan(&snap, &routing).map(|h| h.address).collect();
        assert_eq!(plan[0], h1.address);
    }
}
