// SPDX-License-Identifier: Apache-2.0

//! `PREPARE` request (§4.1, §4.6 Prepared Statement Cache).

use bytes::BytesMut;

use crate::{
    errors::Result,
    protocol::{messages::RequestBody, opcode::Opcode, primitives::write_long_string, version::ProtocolVersion},
};

#[derive(Debug, Clone)]
pub struct Prepare {
    pub query: String,
}

impl Prepare {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into() }
    }
}

impl RequestBody for Prepare {
    fn opcode(&self) -> Opcode {
        Opcode::Prepare
    }

    fn encode_body(&self, _version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_long_string(out, &self.query);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::primitives::read_long_string;

    #[test]
    fn prepare_encodes_query_string() {
        let p = Prepare::new("SELECT * FROM ks.t WHERE k = ?");
        let mut out = BytesMut::new();
        p.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        let mut rd = out.freeze();
        assert_eq!(read_long_string(&mut rd).unwrap(), "SELECT * FROM ks.t WHERE k = ?");
    }
}
