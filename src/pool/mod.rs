// SPDX-License-Identifier: Apache-2.0

//! Host Pool & reconnection policy (§4.4).
//!
//! One [`Pool`] owns every [`Connection`] open to a single
//! [`Host`](crate::host::Host). Sizing follows the host's
//! [`Distance`](crate::host::Distance); borrowing picks the
//! least-loaded member the way the teacher's session pool picks the
//! least-loaded iSCSI session, generalized from ITT in-flight counts to
//! the Connection's `in_flight` counter.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{Connection, ConnectionConfig},
    errors::{DriverError, Result},
    host::Distance,
    protocol::version::ProtocolVersion,
};

/// Backoff schedule used when a Host is down (§4.4 "Reconnection uses
/// the configured `ReconnectionPolicy`").
pub trait ReconnectionPolicy: Send + Sync + std::fmt::Debug {
    fn next_delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantReconnectionPolicy {
    pub delay: Duration,
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialReconnectionPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(31)).unwrap_or(u64::MAX);
        self.base
            .checked_mul(factor as u32)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Pool sizing per distance class (§4.4: "local = 1 connection
/// (protocol v3+) or higher for older protocols, remote = 1, ignored =
/// 0").
pub fn target_size(distance: Distance, version: ProtocolVersion) -> usize {
    match distance {
        Distance::Ignored => 0,
        Distance::Remote => 1,
        Distance::Local => {
            if version.stream_id_bits() >= 16 {
                1
            } else {
                // v1/v2's 8-bit stream-id space caps in-flight requests
                // per connection at 128; widen the pool to compensate.
                4
            }
        },
    }
}

#[derive(Debug)]
pub struct Pool {
    pub host: SocketAddr,
    connections: RwLock<Vec<Arc<Connection>>>,
    target: AtomicU32,
    creation_limit: Semaphore,
    version: ProtocolVersion,
    config: ConnectionConfig,
    reconnect_attempt: AtomicU32,
    cancel: CancellationToken,
}

impl Pool {
    pub fn new(host: SocketAddr, version: ProtocolVersion, config: ConnectionConfig, distance: Distance) -> Self {
        Self {
            host,
            connections: RwLock::new(Vec::new()),
            target: AtomicU32::new(target_size(distance, version) as u32),
            creation_limit: Semaphore::new(4),
            version,
            config,
            reconnect_attempt: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_distance(&self, distance: Distance) {
        self.target.store(target_size(distance, self.version) as u32, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens Connections up to the target size, bounded by
    /// `creation_limit` to avoid a thundering herd on a cold pool
    /// (§4.4 "respects a concurrency limit").
    pub async fn warmup(
        self: &Arc<Self>,
        cql_version: &str,
        compression: Option<&str>,
        auth_provider: &dyn crate::auth::AuthProvider,
        keyspace: Option<&str>,
    ) -> Result<()> {
        let missing = self.target.load(Ordering::Acquire) as usize - self.len();
        let mut last_err = None;
        for _ in 0..missing {
            match self.open_one(cql_version, compression, auth_provider, keyspace).await {
                Ok(conn) => self.connections.write().push(conn),
                Err(e) => last_err = Some(e),
            }
        }
        match (self.len(), last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn open_one(
        &self,
        cql_version: &str,
        compression: Option<&str>,
        auth_provider: &dyn crate::auth::AuthProvider,
        keyspace: Option<&str>,
    ) -> Result<Arc<Connection>> {
        let _permit = self
            .creation_limit
            .acquire()
            .await
            .map_err(|_| DriverError::internal("pool creation semaphore closed"))?;
        let conn = Connection::connect(self.host, self.version, self.config.clone()).await?;
        conn.startup(cql_version, compression, auth_provider, keyspace).await?;
        self.reconnect_attempt.store(0, Ordering::Release);
        Ok(conn)
    }

    /// Returns the Connection with the fewest pending entries
    /// (§4.4 "Borrow"), opening a new one on demand if under target and
    /// none is idle enough. Returns `BusyConnection` if every member is
    /// saturated and the pool is already at its target size.
    pub fn borrow(&self) -> Result<Arc<Connection>> {
        let conns = self.connections.read();
        conns
            .iter()
            .filter(|c| !c.is_closed())
            .filter(|c| c.in_flight() < c.stream_capacity())
            .min_by_key(|c| c.in_flight())
            .cloned()
            .ok_or(DriverError::BusyConnection)
    }

    /// Drops closed/defunct connections from the pool; returns `true`
    /// if the pool is now empty (§4.4 "Host up/down": "a Host is
    /// considered down after ... all pooled Connections transition to
    /// defunct").
    pub fn reap_dead(&self) -> bool {
        let mut conns = self.connections.write();
        conns.retain(|c| !c.is_closed());
        conns.is_empty()
    }

    /// Cancels replenishment / reconnection tasks and closes every
    /// member (§5 "Client `shutdown` ... drains each Pool").
    pub fn close(&self) {
        self.cancel.cancel();
        for conn in self.connections.read().iter() {
            conn.close();
        }
    }

    /// Schedules a reconnection attempt after the policy's backoff,
    /// per §4.4. The caller supplies the startup parameters afresh each
    /// time since the spawned task outlives the borrow.
    pub fn schedule_reconnect(
        self: &Arc<Self>,
        policy: Arc<dyn ReconnectionPolicy>,
        cql_version: String,
        compression: Option<String>,
        auth_provider: Arc<dyn crate::auth::AuthProvider>,
        keyspace: Option<String>,
    ) {
        let pool = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let attempt = pool.reconnect_attempt.fetch_add(1, Ordering::AcqRel);
            let delay = policy.next_delay(attempt);
            debug!(host = %pool.host, ?delay, attempt, "scheduling reconnection");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {},
            }
            match pool
                .open_one(&cql_version, compression.as_deref(), auth_provider.as_ref(), keyspace.as_deref())
                .await
            {
                Ok(conn) => {
                    pool.connections.write().push(conn);
                    debug!(host = %pool.host, "reconnection succeeded");
                },
                Err(e) => {
                    warn!(host = %pool.host, "reconnection attempt failed: {e}");
                    pool.schedule_reconnect(policy, cql_version, compression, auth_provider, keyspace);
                },
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_size_matches_distance_table() {
        assert_eq!(target_size(Distance::Ignored, ProtocolVersion::V4), 0);
        assert_eq!(target_size(Distance::Remote, ProtocolVersion::V4), 1);
        assert_eq!(target_size(Distance::Local, ProtocolVersion::V4), 1);
        assert_eq!(target_size(Distance::Local, ProtocolVersion::V1), 4);
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let policy = ExponentialReconnectionPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
        };
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn constant_policy_never_changes() {
        let policy = ConstantReconnectionPolicy { delay: Duration::from_secs(1) };
        assert_eq!(policy.next_delay(0), policy.next_delay(50));
    }
}
