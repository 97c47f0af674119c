// SPDX-License-Identifier: Apache-2.0

//! The immutable [`Request`] a caller submits and the
//! [`ExecutionOptions`] that travel with it (§3 "Request").
//!
//! Everything here is client-side only — wire encoding for the parts
//! that do cross the protocol lives in
//! [`crate::protocol::messages::query::QueryParameters`]; a fresh one
//! is built from `ExecutionOptions` for every attempt so paging state
//! and timestamp can vary across retries while `Request` itself never
//! changes after submission.

use std::{collections::HashMap, time::Duration};

use crate::{
    prepared::PrepareKey,
    protocol::{primitives::Consistency, value::ValueList},
};

/// §6 DSE extension: "continuous paging options in the QUERY frame
/// custom payload". Minimal plumbing — only what a client needs to ask
/// for continuous paging, not the server's page-delivery protocol.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousPagingOptions {
    pub max_pages: u32,
    pub pages_per_second: u32,
}

impl ContinuousPagingOptions {
    /// Serializes to the `continuousPaging` custom-payload entry (§6):
    /// two big-endian `u32`s, matching every other fixed-width wire
    /// primitive this codec writes.
    pub fn to_payload_entry(self) -> (String, Vec<u8>) {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&self.max_pages.to_be_bytes());
        bytes.extend_from_slice(&self.pages_per_second.to_be_bytes());
        ("continuousPaging".to_string(), bytes)
    }
}

/// What to run: either inline CQL text or a previously prepared
/// statement identified by its cache key (§4.5).
#[derive(Debug, Clone)]
pub enum Statement {
    Simple(String),
    Prepared(PrepareKey),
}

impl Statement {
    pub fn query_text(&self) -> &str {
        match self {
            Statement::Simple(q) => q,
            Statement::Prepared(key) => &key.query,
        }
    }
}

/// §3 "Request": consistency, page-size, page-state, timeout,
/// idempotence flag, routing-key, serial-consistency, timestamp,
/// hints. `hints` (bind-value type hints for the out-of-scope type
/// codec) is represented as an opaque byte count per value since this
/// crate never interprets bound values (§1).
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Vec<u8>>,
    pub timeout: Duration,
    pub is_idempotent: bool,
    pub routing_key: Option<Vec<u8>>,
    pub keyspace: Option<String>,
    pub default_timestamp: Option<i64>,
    pub preferred_host: Option<std::net::SocketAddr>,
    /// §6 DSE extension; `None` means a plain QUERY frame with no
    /// custom payload.
    pub continuous_paging: Option<ContinuousPagingOptions>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            consistency: Consistency::LocalOne,
            serial_consistency: None,
            page_size: None,
            paging_state: None,
            timeout: Duration::from_secs(12),
            is_idempotent: false,
            routing_key: None,
            keyspace: None,
            default_timestamp: None,
            preferred_host: None,
            continuous_paging: None,
        }
    }
}

impl ExecutionOptions {
    /// Builds the `<bytes map>` custom payload for this attempt, or
    /// `None` when no DSE extension is in use (the common case).
    pub fn custom_payload(&self) -> Option<HashMap<String, Vec<u8>>> {
        let cp = self.continuous_paging?;
        let (key, value) = cp.to_payload_entry();
        Some(HashMap::from([(key, value)]))
    }
}

/// A request submitted to the cluster. Immutable once built; the
/// Request Handler clones whatever per-attempt state it needs
/// (paging state, bound consistency after a `RetryDecision` override)
/// rather than mutating this struct (§3).
#[derive(Debug, Clone)]
pub struct Request {
    pub statement: Statement,
    pub values: ValueList,
    pub options: ExecutionOptions,
}

impl Request {
    pub fn simple(query: impl Into<String>) -> Self {
        Self {
            statement: Statement::Simple(query.into()),
            values: ValueList::Empty,
            options: ExecutionOptions::default(),
        }
    }

    pub fn prepared(key: PrepareKey) -> Self {
        Self {
            statement: Statement::Prepared(key),
            values: ValueList::Empty,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_values(mut self, values: ValueList) -> Self {
        self.values = values;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_continuous_paging_means_no_custom_payload() {
        assert!(ExecutionOptions::default().custom_payload().is_none());
    }

    #[test]
    fn continuous_paging_encodes_one_payload_entry() {
        let mut options = ExecutionOptions::default();
        options.continuous_paging = Some(ContinuousPagingOptions { max_pages: 10, pages_per_second: 5 });
        let payload = options.custom_payload().expect("continuous paging set");
        let bytes = payload.get("continuousPaging").expect("continuousPaging key present");
        assert_eq!(&bytes[..4], &10u32.to_be_bytes());
        assert_eq!(&bytes[4..], &5u32.to_be_bytes());
    }
}
