// SPDX-License-Identifier: Apache-2.0

//! `RESULT` response body (§4.1): Void / Rows / Set_Keyspace / Prepared
//! / Schema_Change.
//!
//! Row *values* stay as opaque `<bytes>` (§1 — the CQL type codec is an
//! out-of-scope external collaborator); this module only decodes the
//! framing needed to split a RESULT body into column metadata and row
//! value lists. Column type options are walked just far enough to skip
//! their encoded length so later columns parse correctly, without
//! retaining full type information.

use bitflags::bitflags;
use bytes::{Buf, Bytes};

use crate::{
    errors::Result,
    protocol::primitives::{read_bytes, read_int, read_short, read_string},
    protocol::version::ProtocolVersion,
};

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RowsFlags: i32 {
        const GLOBAL_TABLES_SPEC = 0x0001;
        const HAS_MORE_PAGES      = 0x0002;
        const NO_METADATA         = 0x0004;
    }
}

/// A column's declared type, walked only deep enough to know its
/// encoded length (§1: full value decoding is out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTypeId(pub u16);

fn skip_option(buf: &mut Bytes) -> Result<ColumnTypeId> {
    let id = read_short(buf)?;
    match id {
        // Custom: followed by a [string] class name.
        0x0000 => {
            read_string(buf)?;
        },
        // List/Set: followed by one nested option.
        0x0020 | 0x0022 => {
            skip_option(buf)?;
        },
        // Map: followed by two nested options.
        0x0021 => {
            skip_option(buf)?;
            skip_option(buf)?;
        },
        // UDT: keyspace, name, field count, then (name, option) * count.
        0x0030 => {
            read_string(buf)?;
            read_string(buf)?;
            let n = read_short(buf)?;
            for _ in 0..n {
                read_string(buf)?;
                skip_option(buf)?;
            }
        },
        // Tuple: field count, then option * count.
        0x0031 => {
            let n = read_short(buf)?;
            for _ in 0..n {
                skip_option(buf)?;
            }
        },
        _ => {},
    }
    Ok(ColumnTypeId(id))
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub name: String,
    pub type_id: ColumnTypeId,
}

#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub flags: RowsFlags,
    pub paging_state: Option<Vec<u8>>,
    pub columns: Vec<ColumnSpec>,
}

impl ResultMetadata {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let raw_flags = read_int(buf)?;
        let flags = RowsFlags::from_bits_truncate(raw_flags);
        let columns_count = read_int(buf)?;

        let paging_state = if flags.contains(RowsFlags::HAS_MORE_PAGES) {
            read_bytes(buf)?
        } else {
            None
        };

        let mut columns = Vec::new();
        if !flags.contains(RowsFlags::NO_METADATA) {
            let global_spec = if flags.contains(RowsFlags::GLOBAL_TABLES_SPEC) {
                Some((read_string(buf)?, read_string(buf)?))
            } else {
                None
            };
            for _ in 0..columns_count {
                let (keyspace, table) = match &global_spec {
                    Some((ks, table)) => (Some(ks.clone()), Some(table.clone())),
                    None => (Some(read_string(buf)?), Some(read_string(buf)?)),
                };
                let name = read_string(buf)?;
                let type_id = skip_option(buf)?;
                columns.push(ColumnSpec {
                    keyspace,
                    table,
                    name,
                    type_id,
                });
            }
        }

        Ok(Self {
            flags,
            paging_state,
            columns,
        })
    }
}

/// `Rows::decode` needs `metadata.columns.len()` to know how many value
/// slots follow each row; when a server sets NO_METADATA (valid only
/// after EXECUTE against a statement whose bind metadata the client
/// already cached) the caller must supply that count out of band via
/// [`ResultBody::decode_rows_with_column_count`] instead of `decode`.
#[derive(Debug, Clone)]
pub struct Rows {
    pub metadata: ResultMetadata,
    /// Raw row bytes, one `Vec<Option<Vec<u8>>>` per row (one entry per
    /// column, `None` for SQL NULL). Value interpretation is the
    /// out-of-scope type codec's job.
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub id: Vec<u8>,
    pub result_metadata_id: Option<Vec<u8>>,
    pub bind_metadata: ResultMetadata,
    pub result_metadata: ResultMetadata,
}

#[derive(Debug, Clone)]
pub enum ResultBody {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(super::event::EventBody),
}

impl ResultBody {
    pub fn decode(version: ProtocolVersion, buf: &mut Bytes) -> Result<Self> {
        Self::decode_with_known_columns(version, buf, None)
    }

    /// Like [`Self::decode`], but `known_column_count` supplies the
    /// column count for a RESULT whose server set NO_METADATA (valid
    /// after EXECUTE, when the client already cached the prepared
    /// statement's result metadata). Required in that case; ignored
    /// otherwise.
    pub fn decode_with_known_columns(
        version: ProtocolVersion,
        buf: &mut Bytes,
        known_column_count: Option<usize>,
    ) -> Result<Self> {
        let kind = read_int(buf)?;
        Ok(match kind {
            KIND_VOID => ResultBody::Void,
            KIND_ROWS => {
                let metadata = ResultMetadata::decode(buf)?;
                let column_count = if metadata.flags.contains(RowsFlags::NO_METADATA) {
                    known_column_count.ok_or_else(|| {
                        crate::errors::DriverError::protocol(
                            "RESULT set NO_METADATA but no cached column count was supplied",
                        )
                    })?
                } else {
                    metadata.columns.len()
                };
                let row_count = read_int(buf)?;
                let mut rows = Vec::with_capacity(row_count.max(0) as usize);
                for _ in 0..row_count {
                    let mut row = Vec::with_capacity(column_count);
                    for _ in 0..column_count {
                        row.push(read_bytes(buf)?);
                    }
                    rows.push(row);
                }
                ResultBody::Rows(Rows { metadata, rows })
            },
            KIND_SET_KEYSPACE => ResultBody::SetKeyspace(read_string(buf)?),
            KIND_PREPARED => {
                let id = crate::protocol::primitives::read_short_bytes(buf)?;
                let result_metadata_id = if version as u8 >= ProtocolVersion::V5 as u8 {
                    Some(crate::protocol::primitives::read_short_bytes(buf)?)
                } else {
                    None
                };
                let bind_metadata = ResultMetadata::decode(buf)?;
                let result_metadata = ResultMetadata::decode(buf)?;
                ResultBody::Prepared(Prepared {
                    id,
                    result_metadata_id,
                    bind_metadata,
                    result_metadata,
                })
            },
            KIND_SCHEMA_CHANGE => {
                // SCHEMA_CHANGE's RESULT body is identical in shape to the
                // EVENT variant of the same name, minus the leading
                // "SCHEMA_CHANGE" event-type string already consumed by `kind`.
                ResultBody::SchemaChange(decode_schema_change_fields(buf)?)
            },
            other => {
                return Err(crate::errors::DriverError::protocol(format!(
                    "unknown RESULT kind: 0x{other:08x}"
                )));
            },
        })
    }
}

fn decode_schema_change_fields(buf: &mut Bytes) -> Result<super::event::EventBody> {
    use super::event::{EventBody, SchemaChangeTarget, SchemaChangeType};

    let change = match read_string(buf)?.as_str() {
        "CREATED" => SchemaChangeType::Created,
        "UPDATED" => SchemaChangeType::Updated,
        "DROPPED" => SchemaChangeType::Dropped,
        other => {
            return Err(crate::errors::DriverError::protocol(format!(
                "unknown schema change type: {other}"
            )));
        },
    };
    let target = match read_string(buf)?.as_str() {
        "KEYSPACE" => SchemaChangeTarget::Keyspace,
        "TABLE" => SchemaChangeTarget::Table,
        "TYPE" => SchemaChangeTarget::UserType,
        "FUNCTION" => SchemaChangeTarget::Function,
        "AGGREGATE" => SchemaChangeTarget::Aggregate,
        other => {
            return Err(crate::errors::DriverError::protocol(format!(
                "unknown schema change target: {other}"
            )));
        },
    };
    let keyspace = read_string(buf)?;
    let name = match target {
        SchemaChangeTarget::Keyspace => None,
        _ => Some(read_string(buf)?),
    };
    Ok(EventBody::SchemaChange {
        change,
        target,
        keyspace,
        name,
    })
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::primitives::write_string;

    #[test]
    fn void_result_decodes() {
        let mut raw = BytesMut::new();
        raw.put_i32(KIND_VOID);
        let mut rd = raw.freeze();
        assert!(matches!(ResultBody::decode(ProtocolVersion::V4, &mut rd).unwrap(), ResultBody::Void));
    }

    #[test]
    fn set_keyspace_decodes_name() {
        let mut raw = BytesMut::new();
        raw.put_i32(KIND_SET_KEYSPACE);
        write_string(&mut raw, "my_ks");
        let mut rd = raw.freeze();
        match ResultBody::decode(ProtocolVersion::V4, &mut rd).unwrap() {
            ResultBody::SetKeyspace(ks) => assert_eq!(ks, "my_ks"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn rows_decodes_two_rows_one_column() {
        let mut raw = BytesMut::new();
        raw.put_i32(KIND_ROWS);
        raw.put_i32(RowsFlags::GLOBAL_TABLES_SPEC.bits());
        raw.put_i32(1); // columns_count
        write_string(&mut raw, "ks");
        write_string(&mut raw, "t");
        write_string(&mut raw, "a");
        raw.put_u16(0x000D); // varchar type id
        raw.put_i32(2); // row_count
        crate::protocol::primitives::write_bytes(&mut raw, Some(b"a"));
        crate::protocol::primitives::write_bytes(&mut raw, None);
        let mut rd = raw.freeze();
        match ResultBody::decode(ProtocolVersion::V4, &mut rd).unwrap() {
            ResultBody::Rows(rows) => {
                assert_eq!(rows.rows.len(), 2);
                assert_eq!(rows.rows[0][0], Some(b"a".to_vec()));
                assert_eq!(rows.rows[1][0], None);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
