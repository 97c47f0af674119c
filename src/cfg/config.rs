// SPDX-License-Identifier: Apache-2.0

//! Cluster configuration (§6 "Configuration options"), loaded from YAML
//! the way the teacher's `Config::load_from_file` does, then validated
//! and normalized before any connection is attempted.

use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AuthProvider, NoneAuthProvider, PlainTextAuthProvider},
    balancing::{DcAwarePolicy, LoadBalancingPolicy, RoundRobinPolicy, TokenAwarePolicy},
    cfg::enums::{
        AuthProviderKind, CompressionAlgorithm, LoadBalancingConfig, PartitionerKind,
        ReconnectionPolicyKind, RetryPolicyKind, SpeculativeExecutionConfig,
    },
    pool::{ConstantReconnectionPolicy, ExponentialReconnectionPolicy, ReconnectionPolicy},
    protocol::primitives::Consistency,
    retry::{
        ConstantSpeculativeExecutionPolicy, DefaultRetryPolicy, FallthroughRetryPolicy,
        NoSpeculativeExecutionPolicy, RetryPolicy, SpeculativeExecutionPolicy,
    },
    token::{ByteOrderedPartitioner, Murmur3Partitioner, Partitioner, RandomPartitioner},
};

/// §6's literal configuration-options surface. Deserialized from YAML;
/// every field the spec names has a sensible default so a minimal
/// document only needs `contact_points`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClusterConfig {
    pub contact_points: Vec<String>,
    #[serde(default)]
    pub local_data_center: Option<String>,
    #[serde(default)]
    pub keyspace: Option<String>,
    #[serde(default)]
    pub protocol_options: ProtocolOptions,
    #[serde(default)]
    pub socket_options: SocketOptions,
    #[serde(default)]
    pub pooling: PoolingOptions,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub auth_provider: AuthProviderKind,
    #[serde(default)]
    pub ssl_options: Option<SslOptions>,
    #[serde(default)]
    pub cloud: Option<CloudOptions>,
    #[serde(default)]
    pub query_options: QueryOptions,
    /// Named execution profiles (§6 "profiles"), each overriding a
    /// subset of `query_options` for requests that opt in explicitly.
    #[serde(default)]
    pub profiles: HashMap<String, QueryOptions>,
    #[serde(default = "default_true")]
    pub is_metadata_sync_enabled: bool,
    #[serde(default)]
    pub prepare_on_all_hosts: bool,
    #[serde(default = "default_true")]
    pub re_prepare_on_up: bool,
    #[serde(default = "default_max_prepared")]
    pub max_prepared: usize,
    #[serde(default = "default_refresh_schema_delay_ms")]
    pub refresh_schema_delay_ms: u64,
    /// §6 DSE extensions (Insights RPC, continuous paging); unset by
    /// default so this probe never talks to a non-DSE cluster.
    #[serde(default)]
    pub dse: DseOptions,
}

fn default_true() -> bool {
    true
}

fn default_max_prepared() -> usize {
    1000
}

fn default_refresh_schema_delay_ms() -> u64 {
    1000
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProtocolOptions {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub max_version: Option<u8>,
    #[serde(default = "default_max_schema_agreement_wait_seconds")]
    pub max_schema_agreement_wait_seconds: u64,
}

fn default_port() -> u16 {
    9042
}

fn default_max_schema_agreement_wait_seconds() -> u64 {
    10
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_version: None,
            max_schema_agreement_wait_seconds: default_max_schema_agreement_wait_seconds(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SocketOptions {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_keep_alive_delay_ms")]
    pub keep_alive_delay_ms: u64,
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    #[serde(default = "default_coalescing_threshold")]
    pub coalescing_threshold: usize,
    #[serde(default = "default_defunct_read_timeout_threshold")]
    pub defunct_read_timeout_threshold: u32,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    12_000
}
fn default_keep_alive_delay_ms() -> u64 {
    30_000
}
fn default_coalescing_threshold() -> usize {
    8_192
}
fn default_defunct_read_timeout_threshold() -> u32 {
    64
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            keep_alive: true,
            keep_alive_delay_ms: default_keep_alive_delay_ms(),
            tcp_no_delay: true,
            coalescing_threshold: default_coalescing_threshold(),
            defunct_read_timeout_threshold: default_defunct_read_timeout_threshold(),
        }
    }
}

impl SocketOptions {
    pub fn to_connection_config(&self) -> crate::connection::ConnectionConfig {
        crate::connection::ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.keep_alive_delay_ms),
            tcp_nodelay: self.tcp_no_delay,
            coalescing_threshold: self.coalescing_threshold,
            defunct_read_timeout_threshold: self.defunct_read_timeout_threshold,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolingOptions {
    #[serde(default = "default_heart_beat_interval_ms")]
    pub heart_beat_interval_ms: u64,
    #[serde(default)]
    pub core_connections_per_host: Option<usize>,
    #[serde(default = "default_true")]
    pub warmup: bool,
}

fn default_heart_beat_interval_ms() -> u64 {
    30_000
}

impl Default for PoolingOptions {
    fn default() -> Self {
        Self {
            heart_beat_interval_ms: default_heart_beat_interval_ms(),
            core_connections_per_host: None,
            warmup: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PoliciesConfig {
    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,
    #[serde(default)]
    pub retry: RetryPolicyKind,
    #[serde(default)]
    pub reconnection: ReconnectionPolicyKind,
    #[serde(default)]
    pub address_resolution: AddressResolutionConfig,
    #[serde(default)]
    pub speculative_execution: SpeculativeExecutionConfig,
    #[serde(default)]
    pub partitioner: PartitionerKind,
}

/// §4.10 "resolve rpc_address through any DNS/NAT layer configured".
/// `None` is an identity resolver; `translate` rewrites a discovered
/// `rpc_address` to a different contact address keyed by its string
/// form (used for e.g. a NAT port-forward table).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AddressResolutionConfig {
    #[serde(default)]
    pub translate: HashMap<String, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SslOptions {
    pub ca_cert_path: String,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

/// §4.10 "Cloud Metadata Bootstrap": exactly one of the two forms.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CloudOptions {
    #[serde(default)]
    pub secure_connect_bundle: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QueryOptions {
    #[serde(default = "default_consistency")]
    pub consistency: Consistency,
    #[serde(default)]
    pub serial_consistency: Option<Consistency>,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: i32,
    #[serde(default)]
    pub default_idempotence: bool,
    #[serde(default)]
    pub compression: CompressionAlgorithm,
}

/// §6 "DSE extensions": Insights RPC telemetry and continuous paging.
/// Both are opt-in since neither is meaningful against plain Cassandra.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct DseOptions {
    /// Fire a `CALL InsightsRpc.reportInsight(?)` once the control
    /// connection bootstraps, the way `dse-driver`'s `MonitorReportingTask`
    /// does on startup.
    #[serde(default)]
    pub insights_enabled: bool,
}

fn default_consistency() -> Consistency {
    Consistency::LocalOne
}

fn default_fetch_size() -> i32 {
    5_000
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            consistency: default_consistency(),
            serial_consistency: None,
            fetch_size: default_fetch_size(),
            default_idempotence: false,
            compression: CompressionAlgorithm::None,
        }
    }
}

impl ClusterConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse cluster config file: {}", path.display()))?;
        config.validate_and_normalize()
    }

    /// Mirrors the teacher's `Config::validate_and_normalize`: reject
    /// contradictory or empty settings up front rather than discovering
    /// them mid-handshake.
    pub fn validate_and_normalize(mut self) -> Result<Self> {
        ensure!(!self.contact_points.is_empty(), "contact_points must not be empty");

        let is_cloud = self.cloud.is_some();
        if is_cloud {
            let cloud = self.cloud.as_ref().expect("checked above");
            ensure!(
                cloud.secure_connect_bundle.is_some() != cloud.endpoint.is_some(),
                "cloud config must set exactly one of secure_connect_bundle or endpoint"
            );
        }

        if let Some(max) = self.protocol_options.max_version {
            ensure!((1..=5).contains(&max), "protocol_options.max_version must be between 1 and 5");
        }

        if let AuthProviderKind::Dse { ref username, ref password, .. }
        | AuthProviderKind::Plain { ref username, ref password } = self.auth_provider
        {
            ensure!(!username.is_empty(), "auth_provider username must not be empty");
            ensure!(!password.is_empty(), "auth_provider password must not be empty");
        }

        ensure!(self.max_prepared > 0, "max_prepared must be greater than zero");

        if self.policies.load_balancing.dc_aware && self.local_data_center.is_none() {
            // DC-aware load balancing needs a local DC name; fall back
            // to the first contact point's implied DC being unknown is
            // not an option, so require it explicitly here rather than
            // deep inside the policy constructor.
            anyhow::bail!("policies.load_balancing.dc_aware requires local_data_center to be set");
        }

        self.contact_points = self.contact_points.into_iter().map(|cp| cp.trim().to_string()).collect();
        Ok(self)
    }

    /// Resolves `contact_points` (bare host or `host:port`) against
    /// `protocol_options.port` for entries that omit one.
    pub fn resolve_contact_points(&self) -> Result<Vec<SocketAddr>> {
        self.contact_points
            .iter()
            .map(|cp| {
                let candidate =
                    if cp.contains(':') { cp.clone() } else { format!("{cp}:{}", self.protocol_options.port) };
                candidate
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid contact point: {cp}"))
            })
            .collect()
    }

    pub fn build_auth_provider(&self) -> Result<Arc<dyn AuthProvider>> {
        Ok(match &self.auth_provider {
            AuthProviderKind::None => Arc::new(NoneAuthProvider) as Arc<dyn AuthProvider>,
            AuthProviderKind::Plain { username, password } => {
                Arc::new(PlainTextAuthProvider::new(username.clone(), password.clone()))
            },
            AuthProviderKind::Dse { username, password, authorization_id } => {
                let provider = PlainTextAuthProvider::new(username.clone(), password.clone());
                match authorization_id {
                    Some(id) => Arc::new(provider.with_authorization_id(id.clone())),
                    None => Arc::new(provider),
                }
            },
            AuthProviderKind::Gssapi { service_principal } => {
                let principal = service_principal
                    .clone()
                    .context("auth_provider.kind=gssapi requires service_principal to be set")?;
                Arc::new(crate::auth::gssapi::DseGssapiAuthProvider::new(
                    principal,
                    crate::auth::gssapi::HostResolution::ReverseDns,
                )?)
            },
        })
    }

    pub fn build_reconnection_policy(&self) -> Arc<dyn ReconnectionPolicy> {
        match self.policies.reconnection {
            ReconnectionPolicyKind::Constant { delay_ms } => {
                Arc::new(ConstantReconnectionPolicy { delay: Duration::from_millis(delay_ms) })
            },
            ReconnectionPolicyKind::Exponential { base_ms, max_ms } => Arc::new(ExponentialReconnectionPolicy {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            }),
        }
    }

    pub fn build_retry_policy(&self) -> Arc<dyn RetryPolicy> {
        match self.policies.retry {
            RetryPolicyKind::Default => Arc::new(DefaultRetryPolicy),
            RetryPolicyKind::Fallthrough => Arc::new(FallthroughRetryPolicy),
        }
    }

    pub fn build_speculative_execution_policy(&self) -> Arc<dyn SpeculativeExecutionPolicy> {
        let spec = &self.policies.speculative_execution;
        if !spec.enabled {
            return Arc::new(NoSpeculativeExecutionPolicy);
        }
        Arc::new(ConstantSpeculativeExecutionPolicy {
            delay: Duration::from_millis(spec.delay_ms),
            max_executions: spec.max_executions,
        })
    }

    pub fn build_partitioner(&self) -> Arc<dyn Partitioner> {
        match self.policies.partitioner {
            PartitionerKind::Murmur3 => Arc::new(Murmur3Partitioner),
            PartitionerKind::Random => Arc::new(RandomPartitioner),
            PartitionerKind::ByteOrdered => Arc::new(ByteOrderedPartitioner),
        }
    }

    /// Builds the base policy chain named by `policies.load_balancing`
    /// (§4.6: round-robin, optionally wrapped in DC-aware, optionally
    /// wrapped in token-aware). Token-awareness needs the token ring and
    /// replication strategy the Control Connection maintains, so those
    /// are threaded in by the caller rather than built here.
    pub fn build_load_balancing_policy(
        &self,
        ring: Arc<parking_lot::RwLock<crate::token::TokenRing>>,
        strategy: Arc<parking_lot::RwLock<crate::token::ReplicationStrategy>>,
    ) -> Arc<dyn LoadBalancingPolicy> {
        let lb = &self.policies.load_balancing;
        let base: Arc<dyn LoadBalancingPolicy> = if lb.dc_aware {
            let dc = self.local_data_center.clone().unwrap_or_default();
            Arc::new(DcAwarePolicy::new(dc, lb.used_hosts_per_remote_dc))
        } else {
            Arc::new(RoundRobinPolicy::new())
        };

        if lb.token_aware {
            Arc::new(TokenAwarePolicy::new(base, self.build_partitioner(), ring, strategy))
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ClusterConfig {
        ClusterConfig {
            contact_points: vec!["127.0.0.1".to_string()],
            local_data_center: None,
            keyspace: None,
            protocol_options: ProtocolOptions::default(),
            socket_options: SocketOptions::default(),
            pooling: PoolingOptions::default(),
            policies: PoliciesConfig::default(),
            auth_provider: AuthProviderKind::None,
            ssl_options: None,
            cloud: None,
            query_options: QueryOptions::default(),
            profiles: HashMap::new(),
            is_metadata_sync_enabled: true,
            prepare_on_all_hosts: false,
            re_prepare_on_up: true,
            max_prepared: 1000,
            refresh_schema_delay_ms: 1000,
            dse: DseOptions::default(),
        }
    }

    #[test]
    fn empty_contact_points_rejected() {
        let mut cfg = minimal();
        cfg.contact_points.clear();
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn dc_aware_without_local_dc_rejected() {
        let mut cfg = minimal();
        cfg.policies.load_balancing.dc_aware = true;
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn cloud_requires_exactly_one_of_bundle_or_endpoint() {
        let mut cfg = minimal();
        cfg.cloud = Some(CloudOptions { secure_connect_bundle: None, endpoint: None });
        assert!(cfg.validate_and_normalize().is_err());

        cfg.cloud = Some(CloudOptions {
            secure_connect_bundle: Some("bundle.zip".to_string()),
            endpoint: None,
        });
        assert!(cfg.validate_and_normalize().is_ok());
    }

    #[test]
    fn resolve_contact_points_applies_default_port() {
        let cfg = minimal();
        let resolved = cfg.resolve_contact_points().unwrap();
        assert_eq!(resolved, vec!["127.0.0.1:9042".parse().unwrap()]);
    }

    #[test]
    fn plain_auth_provider_rejects_empty_credentials() {
        let mut cfg = minimal();
        cfg.auth_provider = AuthProviderKind::Plain { username: String::new(), password: "x".to_string() };
        assert!(cfg.validate_and_normalize().is_err());
    }
}
