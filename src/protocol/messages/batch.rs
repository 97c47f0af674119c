// SPDX-License-Identifier: Apache-2.0

//! `BATCH` request (§4.1): a list of simple or prepared statements
//! executed atomically (logged) or unlogged, at a single consistency
//! level.

use bitflags::bitflags;
use bytes::BytesMut;

use crate::{
    errors::Result,
    protocol::{
        messages::RequestBody,
        opcode::Opcode,
        primitives::{write_consistency, write_long, write_long_string, write_short, write_short_bytes, Consistency},
        value::{Value, ValueList},
        version::ProtocolVersion,
    },
};

/// §4.1 BATCH type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchType {
    Logged = 0,
    Unlogged = 1,
    Counter = 2,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BatchFlags: u8 {
        const WITH_SERIAL_CONSISTENCY = 0x10;
        const WITH_DEFAULT_TIMESTAMP   = 0x20;
        const WITH_NAMES_FOR_VALUES    = 0x40;
    }
}

/// One statement within a batch, identified either by text (simple
/// statement) or by a previously prepared statement id.
#[derive(Debug, Clone)]
pub enum BatchStatement {
    Simple { query: String, values: ValueList },
    Prepared { id: Vec<u8>, values: ValueList },
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_type: BatchType,
    pub statements: Vec<BatchStatement>,
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
}

impl Batch {
    pub fn new(batch_type: BatchType, consistency: Consistency) -> Self {
        Self {
            batch_type,
            statements: Vec::new(),
            consistency,
            serial_consistency: None,
            default_timestamp: None,
        }
    }

    pub fn push(&mut self, statement: BatchStatement) {
        self.statements.push(statement);
    }
}

fn write_values(out: &mut BytesMut, values: &ValueList, version: ProtocolVersion) -> Result<()> {
    match values {
        ValueList::Empty => write_short(out, 0),
        ValueList::Positional(vs) => {
            write_short(out, vs.len() as u16);
            for v in vs {
                v.write(out);
            }
        },
        ValueList::Named(vs) => {
            if !version.supports_named_values() {
                return Err(crate::errors::DriverError::Argument(
                    "named parameters require protocol v3+".to_string(),
                ));
            }
            write_short(out, vs.len() as u16);
            for (name, v) in vs {
                crate::protocol::primitives::write_string(out, name);
                v.write(out);
            }
        },
    }
    Ok(())
}

impl RequestBody for Batch {
    fn opcode(&self) -> Opcode {
        Opcode::Batch
    }

    fn encode_body(&self, version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        out.extend_from_slice(&[self.batch_type as u8]);
        write_short(out, self.statements.len() as u16);

        let any_named = self
            .statements
            .iter()
            .any(|s| matches!(s, BatchStatement::Simple { values: ValueList::Named(_), .. } | BatchStatement::Prepared { values: ValueList::Named(_), .. }));

        for stmt in &self.statements {
            match stmt {
                BatchStatement::Simple { query, values } => {
                    out.extend_from_slice(&[0u8]);
                    write_long_string(out, query);
                    write_values(out, values, version)?;
                },
                BatchStatement::Prepared { id, values } => {
                    out.extend_from_slice(&[1u8]);
                    write_short_bytes(out, id);
                    write_values(out, values, version)?;
                },
            }
        }

        write_consistency(out, self.consistency);

        let mut flags = BatchFlags::empty();
        if self.serial_consistency.is_some() {
            flags |= BatchFlags::WITH_SERIAL_CONSISTENCY;
        }
        if self.default_timestamp.is_some() {
            flags |= BatchFlags::WITH_DEFAULT_TIMESTAMP;
        }
        if any_named {
            flags |= BatchFlags::WITH_NAMES_FOR_VALUES;
        }
        out.extend_from_slice(&[flags.bits()]);

        if let Some(sc) = self.serial_consistency {
            write_consistency(out, sc);
        }
        if let Some(ts) = self.default_timestamp {
            write_long(out, ts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_encodes_mixed_statement_kinds() {
        let mut batch = Batch::new(BatchType::Logged, Consistency::Quorum);
        batch.push(BatchStatement::Simple {
            query: "INSERT INTO ks.t (a) VALUES (1)".to_string(),
            values: ValueList::Empty,
        });
        batch.push(BatchStatement::Prepared {
            id: vec![9, 9],
            values: ValueList::Positional(vec![Value::Bytes(vec![1, 2])]),
        });
        let mut out = BytesMut::new();
        batch.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        assert_eq!(out[0], BatchType::Logged as u8);
    }
}
