// SPDX-License-Identifier: Apache-2.0

//! The CQL native protocol opcode byte (§4.1).
//!
//! Every frame header carries a single opcode byte identifying the
//! message kind. Unlike the iSCSI BHS opcode this byte has no embedded
//! flag bits — direction is instead carried by the top bit of the
//! *version* byte (§3) — so decoding here is a plain `TryFrom<u8>`.

use std::convert::TryFrom;

use thiserror::Error;

/// All opcodes defined by the CQL native protocol (§4.1).
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    #[default]
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Error,
            0x01 => Self::Startup,
            0x02 => Self::Ready,
            0x03 => Self::Authenticate,
            0x05 => Self::Options,
            0x06 => Self::Supported,
            0x07 => Self::Query,
            0x08 => Self::Result,
            0x09 => Self::Prepare,
            0x0A => Self::Execute,
            0x0B => Self::Register,
            0x0C => Self::Event,
            0x0D => Self::Batch,
            0x0E => Self::AuthChallenge,
            0x0F => Self::AuthResponse,
            0x10 => Self::AuthSuccess,
            _ => return None,
        })
    }
}

/// Returned when a frame header carries an undefined opcode byte.
/// §4.1: "Unknown opcode or flag → ProtocolError and close the Connection".
#[derive(Debug, Error)]
#[error("invalid opcode: 0x{0:02x}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_u8(byte).ok_or(UnknownOpcode(byte))
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}
