// SPDX-License-Identifier: Apache-2.0

//! Wire protocol engine (§4.1): frame codec, opcodes, message bodies,
//! primitive encodings, protocol-version negotiation.

pub mod frame;
pub mod messages;
pub mod opcode;
pub mod primitives;
pub mod value;
pub mod version;
