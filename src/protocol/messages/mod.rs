// SPDX-License-Identifier: Apache-2.0

//! Message bodies for every opcode named in §4.1.

pub mod batch;
pub mod error;
pub mod event;
pub mod execute;
pub mod prepare;
pub mod query;
pub mod register;
pub mod result;
pub mod startup;

use bytes::{Bytes, BytesMut};
use enum_dispatch::enum_dispatch;

use crate::{
    errors::Result,
    protocol::{
        messages::error::ErrorBodyDecode,
        opcode::Opcode,
        version::ProtocolVersion,
    },
};

/// Common behaviour for every outbound message body.
#[enum_dispatch]
pub trait RequestBody {
    fn opcode(&self) -> Opcode;
    fn encode_body(&self, version: ProtocolVersion, out: &mut BytesMut) -> Result<()>;
}

/// Every request message this driver can send, dispatched to its
/// concrete encoder the way the teacher's `Pdu<'a>` enum dispatches
/// `BasicHeaderSegment`/`SendingData` over PDU variants.
#[enum_dispatch(RequestBody)]
#[derive(Debug)]
pub enum Request {
    Startup(startup::Startup),
    Options(startup::Options),
    AuthResponse(startup::AuthResponse),
    Query(query::QueryMessage),
    Prepare(prepare::Prepare),
    Execute(execute::Execute),
    Batch(batch::Batch),
    Register(register::Register),
}

/// Every response message this driver can receive. Decoding is opcode
/// driven (the opcode lives in the frame header, not the body) so this
/// is a plain dispatch function rather than an enum_dispatch trait.
#[derive(Debug)]
pub enum Response {
    Error(error::ErrorBody),
    Ready,
    Authenticate(startup::Authenticate),
    Supported(startup::Supported),
    Result(result::ResultBody),
    Event(event::EventBody),
    AuthChallenge(startup::AuthChallenge),
    AuthSuccess(startup::AuthSuccess),
}

impl Response {
    pub fn decode(opcode: Opcode, version: ProtocolVersion, body: Bytes) -> Result<Self> {
        let mut buf = body;
        Ok(match opcode {
            Opcode::Error => Response::Error(error::ErrorBody::decode(&mut buf)?),
            Opcode::Ready => Response::Ready,
            Opcode::Authenticate => {
                Response::Authenticate(startup::Authenticate::decode(&mut buf)?)
            },
            Opcode::Supported => Response::Supported(startup::Supported::decode(&mut buf)?),
            Opcode::Result => Response::Result(result::ResultBody::decode(version, &mut buf)?),
            Opcode::Event => Response::Event(event::EventBody::decode(&mut buf)?),
            Opcode::AuthChallenge => {
                Response::AuthChallenge(startup::AuthChallenge::decode(&mut buf)?)
            },
            Opcode::AuthSuccess => {
                Response::AuthSuccess(startup::AuthSuccess::decode(&mut buf)?)
            },
            other => {
                return Err(crate::errors::DriverError::protocol(format!(
                    "opcode {other:?} is not a valid response opcode"
                )));
            },
        })
    }
}
