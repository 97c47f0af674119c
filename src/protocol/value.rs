// SPDX-License-Identifier: Apache-2.0

//! Minimal bound-value representation.
//!
//! §1 places the CQL type system (encoding/decoding `int`, `text`,
//! `list`, UDTs, …) out of scope as an external collaborator — only
//! the `<bytes>`/`<short bytes>` framing those values travel in belongs
//! to this crate (§4.1). `Value` is therefore deliberately thin: it is
//! either already-encoded bytes, NULL, or NOT_SET (protocol v4+, used
//! to skip a bind variable without overwriting the server-side default).

use bytes::{BufMut, BytesMut};

use crate::protocol::primitives::write_int;

/// One bound value in a QUERY/EXECUTE/BATCH parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Already-serialized CQL value bytes, produced by the (out-of-scope)
    /// type-codec collaborator.
    Bytes(Vec<u8>),
    /// CQL `NULL`.
    Null,
    /// Protocol v4+ "not set" marker — leaves any existing bound value
    /// (e.g. in a prepared statement) untouched.
    NotSet,
}

impl Value {
    pub fn write(&self, out: &mut BytesMut) {
        match self {
            Value::Bytes(b) => {
                write_int(out, b.len() as i32);
                out.put_slice(b);
            },
            Value::Null => write_int(out, -1),
            Value::NotSet => write_int(out, -2),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

/// A named or positional value list, §6 "named parameters (v3+)".
#[derive(Debug, Clone, Default)]
pub enum ValueList {
    #[default]
    Empty,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl ValueList {
    pub fn len(&self) -> usize {
        match self {
            ValueList::Empty => 0,
            ValueList::Positional(v) => v.len(),
            ValueList::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        matches!(self, ValueList::Named(_))
    }
}
