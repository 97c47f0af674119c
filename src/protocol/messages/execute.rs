// SPDX-License-Identifier: Apache-2.0

//! `EXECUTE` request — a prepared statement id plus bound values (§4.1,
//! §4.6). Shares [`QueryParameters`](crate::protocol::messages::query::QueryParameters)
//! with QUERY/BATCH since the two wire formats are identical past the
//! statement identifier.

use bytes::BytesMut;

use crate::{
    errors::Result,
    protocol::{
        messages::{query::QueryParameters, RequestBody},
        opcode::Opcode,
        primitives::write_short_bytes,
        version::ProtocolVersion,
    },
};

#[derive(Debug, Clone)]
pub struct Execute {
    /// The prepared statement id returned by a prior PREPARE/RESULT
    /// (§4.6 `PreparedEntry::Ready.id`).
    pub id: Vec<u8>,
    pub parameters: QueryParameters,
}

impl Execute {
    pub fn new(id: Vec<u8>, parameters: QueryParameters) -> Self {
        Self { id, parameters }
    }
}

impl RequestBody for Execute {
    fn opcode(&self) -> Opcode {
        Opcode::Execute
    }

    fn encode_body(&self, version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_short_bytes(out, &self.id);
        self.parameters.encode(version, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::primitives::read_short_bytes;

    #[test]
    fn execute_encodes_id_then_parameters() {
        let e = Execute::new(vec![1, 2, 3, 4], QueryParameters::default());
        let mut out = BytesMut::new();
        e.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        let mut rd = out.freeze();
        assert_eq!(read_short_bytes(&mut rd).unwrap(), vec![1, 2, 3, 4]);
    }
}
