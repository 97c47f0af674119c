// SPDX-License-Identifier: Apache-2.0

//! `EVENT` response body (§4.9): pushed by the server on a connection
//! that issued REGISTER, always on stream id -1.

use bytes::Bytes;

use crate::{
    errors::Result,
    protocol::{
        messages::register::EventType,
        primitives::{read_inet_addr, read_string},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyChangeType {
    NewNode,
    RemovedNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChangeType {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    Keyspace,
    Table,
    UserType,
    Function,
    Aggregate,
}

#[derive(Debug, Clone)]
pub enum EventBody {
    TopologyChange {
        change: TopologyChangeType,
        address: std::net::IpAddr,
    },
    StatusChange {
        change: StatusChangeType,
        address: std::net::IpAddr,
    },
    SchemaChange {
        change: SchemaChangeType,
        target: SchemaChangeTarget,
        keyspace: String,
        name: Option<String>,
    },
}

impl EventBody {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let event_type = EventType::from_str(&read_string(buf)?)?;
        Ok(match event_type {
            EventType::TopologyChange => {
                let change = match read_string(buf)?.as_str() {
                    "NEW_NODE" => TopologyChangeType::NewNode,
                    "REMOVED_NODE" => TopologyChangeType::RemovedNode,
                    other => {
                        return Err(crate::errors::DriverError::protocol(format!(
                            "unknown topology change type: {other}"
                        )));
                    },
                };
                EventBody::TopologyChange {
                    change,
                    address: read_inet_addr(buf)?,
                }
            },
            EventType::StatusChange => {
                let change = match read_string(buf)?.as_str() {
                    "UP" => StatusChangeType::Up,
                    "DOWN" => StatusChangeType::Down,
                    other => {
                        return Err(crate::errors::DriverError::protocol(format!(
                            "unknown status change type: {other}"
                        )));
                    },
                };
                EventBody::StatusChange {
                    change,
                    address: read_inet_addr(buf)?,
                }
            },
            EventType::SchemaChange => {
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
                EventBody::SchemaChange {
                    change,
                    target,
                    keyspace,
                    name,
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::protocol::primitives::write_string;

    #[test]
    fn decodes_status_change_up() {
        let mut raw = BytesMut::new();
        write_string(&mut raw, "STATUS_CHANGE");
        write_string(&mut raw, "UP");
        crate::protocol::primitives::write_inet(&mut raw, "10.0.0.1:9042".parse().unwrap());
        let mut rd = raw.freeze();
        match EventBody::decode(&mut rd).unwrap() {
            EventBody::StatusChange { change, .. } => assert_eq!(change, StatusChangeType::Up),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_schema_change_keyspace_has_no_name() {
        let mut raw = BytesMut::new();
        write_string(&mut raw, "SCHEMA_CHANGE");
        write_string(&mut raw, "CREATED");
        write_string(&mut raw, "KEYSPACE");
        write_string(&mut raw, "my_ks");
        let mut rd = raw.freeze();
        match EventBody::decode(&mut rd).unwrap() {
            EventBody::SchemaChange { keyspace, name, .. } => {
                assert_eq!(keyspace, "my_ks");
                assert!(name.is_none());
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
