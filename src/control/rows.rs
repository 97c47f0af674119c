// SPDX-License-Identifier: Apache-2.0

//! Minimal row reader for `system.local`/`system.peers` (§4.9 EXPANDED
//! note in `SPEC_FULL.md`: only the columns the control connection
//! itself needs, not the full out-of-scope CQL type system per §1).

use std::net::{IpAddr, SocketAddr};

use bytes::Buf;
use uuid::Uuid;

use crate::{
    errors::{DriverError, Result},
    protocol::messages::result::{ColumnSpec, ResultMetadata, Rows},
};

/// One decoded `system.local`/`system.peers` row, indexed by column
/// name rather than position so a missing/renamed column in an older
/// server fails a single lookup instead of misaligning every field.
pub struct SystemRow<'a> {
    columns: &'a [ColumnSpec],
    values: &'a [Option<Vec<u8>>],
}

impl<'a> SystemRow<'a> {
    fn raw(&self, name: &str) -> Option<&'a [u8]> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        self.values.get(idx)?.as_deref()
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.raw(name).map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn uuid(&self, name: &str) -> Option<Uuid> {
        let b = self.raw(name)?;
        Uuid::from_slice(b).ok()
    }

    /// `inet` column value: raw 4 or 16 address octets, no length
    /// prefix and no port (system tables store host addresses bare).
    pub fn inet(&self, name: &str) -> Option<IpAddr> {
        let b = self.raw(name)?;
        match b.len() {
            4 => Some(IpAddr::from(<[u8; 4]>::try_from(b).ok()?)),
            16 => Some(IpAddr::from(<[u8; 16]>::try_from(b).ok()?)),
            _ => None,
        }
    }

    /// `set<text>`/`list<text>` column: CQL collection framing is
    /// `[int count]([int len][bytes])*`.
    pub fn text_set(&self, name: &str) -> Vec<String> {
        let Some(mut buf) = self.raw(name) else { return Vec::new() };
        let mut out = Vec::new();
        if buf.remaining() < 4 {
            return out;
        }
        let count = buf.get_i32();
        for _ in 0..count.max(0) {
            if buf.remaining() < 4 {
                break;
            }
            let len = buf.get_i32();
            if len < 0 || buf.remaining() < len as usize {
                break;
            }
            let mut item = vec![0u8; len as usize];
            buf.copy_to_slice(&mut item);
            out.push(String::from_utf8_lossy(&item).into_owned());
        }
        out
    }
}

/// Walks every row of a `Rows` result, handing each to `f` as a
/// [`SystemRow`] view over the shared column metadata.
pub fn for_each_row<'a>(rows: &'a Rows, mut f: impl FnMut(SystemRow<'a>)) {
    for row in &rows.rows {
        f(SystemRow { columns: &rows.metadata.columns, values: row });
    }
}

pub fn first_row<'a>(rows: &'a Rows) -> Option<SystemRow<'a>> {
    rows.rows.first().map(|row| SystemRow { columns: &rows.metadata.columns, values: row })
}

pub fn expect_metadata_column(metadata: &ResultMetadata, name: &str) -> Result<()> {
    if metadata.columns.iter().any(|c| c.name == name) {
        Ok(())
    } else {
        Err(DriverError::protocol(format!("system table row is missing expected column '{name}'")))
    }
}

/// Builds a contact-point's endpoint from a row's `rpc_address`
/// (falling back to `peer`/`broadcast_address` for older servers) and
/// the cluster's configured native port.
pub fn row_endpoint(row: &SystemRow<'_>, port: u16) -> Option<SocketAddr> {
    let ip = row
        .inet("rpc_address")
        .or_else(|| row.inet("native_address"))
        .or_else(|| row.inet("peer"))
        .or_else(|| row.inet("broadcast_address"))?;
    Some(SocketAddr::new(ip, port))
}
