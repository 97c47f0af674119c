// SPDX-License-Identifier: Apache-2.0

//! Small serializable enums used by [`crate::cfg::config::ClusterConfig`]
//! (§6 "Configuration options").

use core::fmt;

use serde::{Deserialize, Serialize};

/// `socketOptions`/STARTUP `COMPRESSION` choice (§4.1, §6). `None` is
/// always valid; the other two require their Cargo feature.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Snappy,
}

impl CompressionAlgorithm {
    pub fn as_startup_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Lz4 => Some("lz4"),
            Self::Snappy => Some("snappy"),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Snappy => "snappy",
        })
    }
}

/// `policies.reconnectionPolicy` kind (§4.4, §6).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReconnectionPolicyKind {
    Constant { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for ReconnectionPolicyKind {
    fn default() -> Self {
        Self::Exponential { base_ms: 1_000, max_ms: 60_000 }
    }
}

/// `authProvider` choice (§4.3, §6). `Dse` carries an optional
/// `authorizationId` for proxy execution (§6 "proxy authentication").
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AuthProviderKind {
    #[default]
    None,
    Plain {
        username: String,
        password: String,
    },
    Dse {
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorization_id: Option<String>,
    },
    Gssapi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_principal: Option<String>,
    },
}

/// `token::Partitioner` selection; the wire-negotiated default is
/// always Murmur3, but a cluster running `RandomPartitioner` or
/// `ByteOrderedPartitioner` must be told explicitly since the
/// partitioner class name isn't carried by `system.local` in a form
/// this crate's out-of-scope type codec would decode for us.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionerKind {
    #[default]
    Murmur3,
    Random,
    ByteOrdered,
}

/// `policies.retry` kind (§4.7, §6).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    #[default]
    Default,
    Fallthrough,
}

/// `policies.loadBalancing` kind (§4.6, §6). `token_aware` layers a
/// `TokenAwarePolicy` in front of whichever of the other two is named;
/// `dc_aware`'s `local_dc` falls back to `ClusterConfig::local_data_center`
/// when unset.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LoadBalancingConfig {
    #[serde(default)]
    pub dc_aware: bool,
    #[serde(default)]
    pub used_hosts_per_remote_dc: usize,
    #[serde(default = "default_true")]
    pub token_aware: bool,
}

fn default_true() -> bool {
    true
}

/// `policies.speculativeExecution` (§4.7, §6). `None` (the default)
/// disables speculative execution entirely.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default)]
pub struct SpeculativeExecutionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_speculative_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_speculative_max_executions")]
    pub max_executions: usize,
}

fn default_speculative_delay_ms() -> u64 {
    100
}

fn default_speculative_max_executions() -> usize {
    2
}
