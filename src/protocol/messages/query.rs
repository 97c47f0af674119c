// SPDX-License-Identifier: Apache-2.0

//! `QUERY` request (§4.1) and the execution-options it carries (§3
//! "Request": consistency, page-size, page-state, timeout, idempotence
//! flag, routing-key, serial-consistency, timestamp, hints).
//!
//! Timeout/idempotence/routing-key/hints are client-side-only concerns
//! (not wire fields) and live on [`crate::request::execution::ExecutionOptions`]
//! instead; this module only encodes what actually crosses the wire.

use bitflags::bitflags;
use bytes::BytesMut;

use crate::{
    errors::Result,
    protocol::{
        messages::RequestBody,
        opcode::Opcode,
        primitives::{
            write_consistency, write_int, write_long, write_long_string, write_short,
            Consistency,
        },
        value::{Value, ValueList},
        version::ProtocolVersion,
    },
};

bitflags! {
    /// QUERY/EXECUTE/BATCH flags byte (protocol v2-v4 layout; §4.1, §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u8 {
        const VALUES                 = 0x01;
        const SKIP_METADATA           = 0x02;
        const PAGE_SIZE               = 0x04;
        const WITH_PAGING_STATE        = 0x08;
        const WITH_SERIAL_CONSISTENCY   = 0x10;
        const WITH_DEFAULT_TIMESTAMP     = 0x20;
        /// §6: "named parameters (v3+)".
        const WITH_NAMES_FOR_VALUES      = 0x40;
    }
}

/// Wire-level QUERY parameters. One is built fresh per attempt by the
/// request handler so paging-state/timestamp can vary across retries
/// while the logical [`crate::request::execution::Request`] stays
/// immutable (§3 "Request").
#[derive(Debug, Clone)]
pub struct QueryParameters {
    pub consistency: Consistency,
    pub values: ValueList,
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Vec<u8>>,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            consistency: Consistency::LocalOne,
            values: ValueList::Empty,
            skip_metadata: false,
            page_size: None,
            paging_state: None,
            serial_consistency: None,
            default_timestamp: None,
        }
    }
}

impl QueryParameters {
    pub fn encode(&self, version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_consistency(out, self.consistency);

        let mut flags = QueryFlags::empty();
        if !self.values.is_empty() {
            flags |= QueryFlags::VALUES;
        }
        if self.skip_metadata {
            flags |= QueryFlags::SKIP_METADATA;
        }
        if self.page_size.is_some() {
            flags |= QueryFlags::PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= QueryFlags::WITH_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= QueryFlags::WITH_SERIAL_CONSISTENCY;
        }
        if self.default_timestamp.is_some() {
            flags |= QueryFlags::WITH_DEFAULT_TIMESTAMP;
        }
        if self.values.is_named() {
            if !version.supports_named_values() {
                return Err(crate::errors::DriverError::Argument(
                    "named parameters require protocol v3+".to_string(),
                ));
            }
            flags |= QueryFlags::WITH_NAMES_FOR_VALUES;
        }
        out.extend_from_slice(&[flags.bits()]);

        match &self.values {
            ValueList::Empty => {},
            ValueList::Positional(values) => {
                write_short(out, values.len() as u16);
                for v in values {
                    v.write(out);
                }
            },
            ValueList::Named(values) => {
                write_short(out, values.len() as u16);
                for (name, v) in values {
                    crate::protocol::primitives::write_string(out, name);
                    v.write(out);
                }
            },
        }

        if let Some(size) = self.page_size {
            write_int(out, size);
        }
        if let Some(state) = &self.paging_state {
            crate::protocol::primitives::write_bytes(out, Some(state));
        }
        if let Some(sc) = self.serial_consistency {
            write_consistency(out, sc);
        }
        if let Some(ts) = self.default_timestamp {
            write_long(out, ts);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
    pub parameters: QueryParameters,
}

impl QueryMessage {
    pub fn new(query: impl Into<String>, parameters: QueryParameters) -> Self {
        Self {
            query: query.into(),
            parameters,
        }
    }
}

impl RequestBody for QueryMessage {
    fn opcode(&self) -> Opcode {
        Opcode::Query
    }

    fn encode_body(&self, version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_long_string(out, &self.query);
        self.parameters.encode(version, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::primitives::{read_consistency, read_long_string};

    #[test]
    fn query_encodes_statement_and_consistency() {
        let msg = QueryMessage::new(
            "SELECT * FROM ks.t",
            QueryParameters {
                consistency: Consistency::Quorum,
                ..Default::default()
            },
        );
        let mut out = BytesMut::new();
        msg.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        let mut rd = out.freeze();
        let query = read_long_string(&mut rd).unwrap();
        assert_eq!(query, "SELECT * FROM ks.t");
        let consistency = read_consistency(&mut rd).unwrap();
        assert_eq!(consistency, Consistency::Quorum);
        // flags byte follows, zero because there are no values/paging/etc.
        assert_eq!(rd[0], 0);
    }

    #[test]
    fn named_values_rejected_below_v3() {
        let msg = QueryMessage::new(
            "INSERT INTO ks.t (a) VALUES (:a)",
            QueryParameters {
                values: ValueList::Named(vec![("a".to_string(), Value::Bytes(vec![1]))]),
                ..Default::default()
            },
        );
        let mut out = BytesMut::new();
        assert!(msg.encode_body(ProtocolVersion::V2, &mut out).is_err());
    }
}
