// SPDX-License-Identifier: Apache-2.0

//! `REGISTER` request — subscribe the connection to server push events
//! (§4.9 Control Connection: STATUS_CHANGE/TOPOLOGY_CHANGE/SCHEMA_CHANGE).

use bytes::BytesMut;

use crate::{
    errors::Result,
    protocol::{messages::RequestBody, opcode::Opcode, primitives::write_string_list, version::ProtocolVersion},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "TOPOLOGY_CHANGE" => EventType::TopologyChange,
            "STATUS_CHANGE" => EventType::StatusChange,
            "SCHEMA_CHANGE" => EventType::SchemaChange,
            other => {
                return Err(crate::errors::DriverError::protocol(format!(
                    "unknown event type: {other}"
                )));
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct Register {
    pub event_types: Vec<EventType>,
}

impl Register {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn all() -> Self {
        Self::new(vec![
            EventType::TopologyChange,
            EventType::StatusChange,
            EventType::SchemaChange,
        ])
    }
}

impl RequestBody for Register {
    fn opcode(&self) -> Opcode {
        Opcode::Register
    }

    fn encode_body(&self, _version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        let names: Vec<String> = self.event_types.iter().map(|t| t.as_str().to_string()).collect();
        write_string_list(out, &names);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::primitives::read_string_list;

    #[test]
    fn register_all_encodes_three_event_types() {
        let r = Register::all();
        let mut out = BytesMut::new();
        r.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        let mut rd = out.freeze();
        let names = read_string_list(&mut rd).unwrap();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"SCHEMA_CHANGE".to_string()));
    }
}
