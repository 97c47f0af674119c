// SPDX-License-Identifier: Apache-2.0

//! Protocol-version negotiation (§1, §4.9 "Protocol downgrade ladder").

use std::fmt;

/// CQL native protocol versions this crate can speak (§6: "versions 1
/// through 5").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
}

impl ProtocolVersion {
    pub const HIGHEST: Self = Self::V5;

    /// The downgrade ladder of §4.9: v4 → v3 → v2 → v1.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::V5 => Some(Self::V4),
            Self::V4 => Some(Self::V3),
            Self::V3 => Some(Self::V2),
            Self::V2 => Some(Self::V1),
            Self::V1 => None,
        }
    }

    /// Stream ids are 8-bit (v1/v2) or 16-bit (v3+), §3.
    pub fn stream_id_bits(self) -> u32 {
        match self {
            Self::V1 | Self::V2 => 8,
            Self::V3 | Self::V4 | Self::V5 => 16,
        }
    }

    /// Header length in bytes: 1 (version) + 1 (flags) + stream bytes +
    /// 1 (opcode) + 4 (length).
    pub fn header_len(self) -> usize {
        let stream_bytes = (self.stream_id_bits() / 8) as usize;
        1 + 1 + stream_bytes + 1 + 4
    }

    /// Named bind-marker support in QUERY/EXECUTE (§6: "named parameters
    /// (v3+)").
    pub fn supports_named_values(self) -> bool {
        self >= Self::V3
    }

    /// BATCH requests (§6: "batch (v2+)").
    pub fn supports_batch(self) -> bool {
        self >= Self::V2
    }

    pub fn from_raw(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            5 => Some(Self::V5),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", *self as u8)
    }
}
