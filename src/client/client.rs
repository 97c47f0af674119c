// SPDX-License-Identifier: Apache-2.0

//! Cluster/Session wiring (§5): owns the Host Registry, one Pool per
//! Host, the Control Connection, and the policy set, and is the sole
//! entry point callers use to run a [`Request`].

use std::{net::SocketAddr, sync::Arc, time::Duration};

use dashmap::DashMap;
use parking_lot::RwLock as SyncRwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    auth::AuthProvider,
    balancing::LoadBalancingPolicy,
    cfg::config::ClusterConfig,
    control::ControlConnection,
    errors::{DriverError, Result},
    host::{Distance, HostRegistry},
    pool::{Pool, ReconnectionPolicy},
    prepared::{PrepareKey, PreparedCache},
    protocol::messages::result::ResultBody,
    request::{
        self,
        execution::{ExecutionOptions, Request},
        ExecutionResources,
    },
    retry::{RetryPolicy, SpeculativeExecutionPolicy},
    token::{ReplicationStrategy, TokenRing},
};

/// Interval between reconciliation passes: creates pools for newly
/// discovered hosts, retires pools for hosts the registry no longer
/// carries, and re-applies distance-driven pool sizing.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// The driver's single public entry point: connect once, submit many
/// [`Request`]s, `shutdown` when done.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClusterConfig>,
    hosts: Arc<HostRegistry>,
    pools: Arc<DashMap<SocketAddr, Arc<Pool>>>,
    control: Arc<ControlConnection>,
    prepared: Arc<PreparedCache>,
    balancer: Arc<dyn LoadBalancingPolicy>,
    retry_policy: Arc<dyn RetryPolicy>,
    speculative: Arc<dyn SpeculativeExecutionPolicy>,
    auth_provider: Arc<dyn AuthProvider>,
    cancel: CancellationToken,
}

impl Client {
    /// Bootstraps the control connection, builds the policy chain from
    /// `config`, and starts the background pool-reconciliation loop.
    /// Returns once the initial topology is known; pools warm up
    /// asynchronously.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let config = Arc::new(config);
        let hosts = Arc::new(HostRegistry::new());
        let ring = Arc::new(SyncRwLock::new(TokenRing::new()));
        let strategy = Arc::new(SyncRwLock::new(ReplicationStrategy::Simple { replication_factor: 1 }));

        let auth_provider = config.build_auth_provider().map_err(|e| DriverError::Config(e.to_string()))?;
        let reconnection_policy = config.build_reconnection_policy();
        let retry_policy = config.build_retry_policy();
        let speculative = config.build_speculative_execution_policy();
        let balancer = config.build_load_balancing_policy(ring.clone(), strategy.clone());
        let prepared = Arc::new(PreparedCache::new(config.max_prepared));

        let control = ControlConnection::bootstrap(
            config.clone(),
            hosts.clone(),
            ring,
            strategy,
            auth_provider.clone(),
            reconnection_policy,
        )
        .await?;

        let client = Self {
            config,
            hosts,
            pools: Arc::new(DashMap::new()),
            control,
            prepared,
            balancer,
            retry_policy,
            speculative,
            auth_provider,
            cancel: CancellationToken::new(),
        };

        client.clone().spawn_pool_reconciliation();
        info!("client connected");
        Ok(client)
    }

    /// Builds a [`Request`] seeded with this client's configured query
    /// defaults (consistency, fetch size, idempotence) rather than the
    /// bare library defaults.
    pub fn statement(&self, query: impl Into<String>) -> Request {
        Request::simple(query).with_options(default_options(&self.config))
    }

    pub fn prepared_statement(&self, keyspace: Option<String>, query: impl Into<String>) -> Request {
        Request::prepared(PrepareKey { keyspace, query: query.into() }).with_options(default_options(&self.config))
    }

    /// Runs the full Request Handler algorithm (§4.8) for one logical
    /// request: query plan, transparent prepare, retry, speculation.
    pub async fn execute(&self, request: &Request) -> Result<ResultBody> {
        request::execute(&self.resources(), request).await
    }

    /// §4.9 "After a DDL, poll ... until agreement or timeout".
    pub async fn wait_for_schema_agreement(&self) -> Result<bool> {
        self.control.wait_for_schema_agreement().await
    }

    fn resources(&self) -> ExecutionResources {
        ExecutionResources {
            hosts: self.hosts.clone(),
            pools: self.pools.clone(),
            balancer: self.balancer.clone(),
            prepared: self.prepared.clone(),
            retry_policy: self.retry_policy.clone(),
            speculative: self.speculative.clone(),
        }
    }

    /// Keeps `self.pools` in sync with the Host Registry: one [`Pool`]
    /// per live host, sized by the balancer's [`Distance`]
    /// classification, retired once its host leaves the registry
    /// (§4.4 "Pool ... target size derived from distance class").
    fn spawn_pool_reconciliation(self) {
        tokio::spawn(async move {
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.reconcile_pools().await;
                tokio::time::sleep(RECONCILE_INTERVAL).await;
            }
        });
    }

    async fn reconcile_pools(&self) {
        let snapshot = self.hosts.snapshot();
        let version = snapshot.protocol_version.unwrap_or(crate::protocol::version::ProtocolVersion::HIGHEST);

        let stale: Vec<SocketAddr> =
            self.pools.iter().map(|e| *e.key()).filter(|addr| !snapshot.hosts.contains_key(addr)).collect();
        for addr in stale {
            if let Some((_, pool)) = self.pools.remove(&addr) {
                pool.close();
            }
        }

        for host in snapshot.hosts.values() {
            let distance = self.balancer.distance(host);
            let pool = self
                .pools
                .entry(host.address)
                .or_insert_with(|| {
                    Arc::new(Pool::new(host.address, version, self.config.socket_options.to_connection_config(), distance))
                })
                .clone();
            pool.set_distance(distance);

            if distance == Distance::Ignored || !host.is_up() {
                continue;
            }
            if pool.is_empty() && self.config.pooling.warmup {
                self.spawn_warmup(pool);
            }
        }
    }

    fn spawn_warmup(&self, pool: Arc<Pool>) {
        let auth_provider = self.auth_provider.clone();
        let keyspace = self.config.keyspace.clone();
        tokio::spawn(async move {
            if let Err(e) = pool.warmup("3.0.0", None, auth_provider.as_ref(), keyspace.as_deref()).await {
                warn!(host = %pool.host, "pool warmup failed: {e}");
            }
        });
    }

    /// §5 "Client `shutdown` cancels all pending requests with
    /// `ClientClosed`, then closes the control connection, then drains
    /// each Pool (configurable grace)".
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.control.shutdown().await;
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
    }
}

fn default_options(config: &ClusterConfig) -> ExecutionOptions {
    let q = &config.query_options;
    ExecutionOptions {
        consistency: q.consistency,
        serial_consistency: q.serial_consistency,
        page_size: Some(q.fetch_size),
        is_idempotent: q.default_idempotence,
        keyspace: config.keyspace.clone(),
        ..ExecutionOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::config::{PoliciesConfig, PoolingOptions, ProtocolOptions, QueryOptions, SocketOptions};

    fn minimal_config() -> ClusterConfig {
        ClusterConfig {
            contact_points: vec!["127.0.0.1".to_string()],
            local_data_center: None,
            keyspace: Some("ks".to_string()),
            protocol_options: ProtocolOptions::default(),
            socket_options: SocketOptions::default(),
            pooling: PoolingOptions::default(),
            policies: PoliciesConfig::default(),
            auth_provider: crate::cfg::enums::AuthProviderKind::None,
            ssl_options: None,
            cloud: None,
            query_options: QueryOptions::default(),
            profiles: std::collections::HashMap::new(),
            is_metadata_sync_enabled: true,
            prepare_on_all_hosts: false,
            re_prepare_on_up: true,
            max_prepared: 1000,
            refresh_schema_delay_ms: 1000,
        }
    }

    #[test]
    fn default_options_use_configured_query_defaults() {
        let mut config = minimal_config();
        config.query_options.consistency = crate::protocol::primitives::Consistency::Quorum;
        config.query_options.fetch_size = 42;

        let opts = default_options(&config);
        assert_eq!(opts.consistency, crate::protocol::primitives::Consistency::Quorum);
        assert_eq!(opts.page_size, Some(42));
        assert_eq!(opts.keyspace.as_deref(), Some("ks"));
    }
}
