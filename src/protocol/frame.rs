// SPDX-License-Identifier: Apache-2.0

//! Binary frame codec (§4.1).
//!
//! A frame is `(version, flags, stream-id, opcode, body)`. The codec is
//! streaming: [`try_decode_frame`] returns `Ok(None)` when the buffer
//! holds less than a complete frame, mirroring the teacher's
//! `ClientConnection::read_loop`, which resizes its scratch buffer and
//! keeps reading until a full PDU has arrived rather than erroring on a
//! short read.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    errors::{DriverError, Result},
    protocol::{opcode::Opcode, version::ProtocolVersion},
};

bitflags! {
    /// Frame header flags (§3, §4.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const COMPRESSION    = 0x01;
        const TRACING        = 0x02;
        const CUSTOM_PAYLOAD  = 0x04;
        const WARNING        = 0x08;
        /// v5+ uses the low bits of this byte for BETA; kept for forward
        /// compatibility with the decoder, unused by this crate's encoder.
        const USE_BETA       = 0x10;
    }
}

/// Which direction a frame travels; encoded as the top bit of the
/// version byte (0 = request, 1 = response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

const RESPONSE_BIT: u8 = 0x80;

/// A fully decoded frame header (without the body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: ProtocolVersion,
    pub direction: Direction,
    pub flags: FrameFlags,
    /// Signed: EVENT frames use stream-id -1 (§4.2 "delivered to the
    /// Control Connection instead").
    pub stream: i16,
    pub opcode: Opcode,
    pub length: u32,
}

impl FrameHeader {
    pub fn request(version: ProtocolVersion, stream: i16, opcode: Opcode) -> Self {
        Self {
            version,
            direction: Direction::Request,
            flags: FrameFlags::empty(),
            stream,
            opcode,
            length: 0,
        }
    }

    /// Encode the header into `out`. The length is written from `self.length`
    /// — callers set it after serializing the body, or use [`encode_frame`].
    pub fn encode(&self, out: &mut impl BufMut) {
        let version_byte = match self.direction {
            Direction::Request => self.version as u8,
            Direction::Response => self.version as u8 | RESPONSE_BIT,
        };
        out.put_u8(version_byte);
        out.put_u8(self.flags.bits());
        if self.version.stream_id_bits() == 8 {
            out.put_u8(self.stream as u8);
        } else {
            out.put_i16(self.stream);
        }
        out.put_u8(self.opcode.into());
        out.put_u32(self.length);
    }

    /// Try to decode a header assuming `version` was already negotiated.
    /// Before negotiation (first STARTUP exchange) callers should use
    /// [`peek_version`] on the raw first byte instead.
    fn decode(buf: &mut impl Buf, version: ProtocolVersion) -> Result<Self> {
        let version_byte = buf.get_u8();
        let direction = if version_byte & RESPONSE_BIT != 0 {
            Direction::Response
        } else {
            Direction::Request
        };
        let raw_version = version_byte & !RESPONSE_BIT;
        let decoded_version = ProtocolVersion::from_raw(raw_version)
            .ok_or_else(|| DriverError::protocol(format!("unknown protocol version byte 0x{version_byte:02x}")))?;
        if decoded_version != version {
            return Err(DriverError::protocol(format!(
                "frame declares protocol {decoded_version} but connection negotiated {version}"
            )));
        }
        let raw_flags = buf.get_u8();
        let flags = FrameFlags::from_bits(raw_flags)
            .ok_or_else(|| DriverError::protocol(format!("unknown frame flag bits: 0x{raw_flags:02x}")))?;
        let stream = if version.stream_id_bits() == 8 {
            buf.get_u8() as i8 as i16
        } else {
            buf.get_i16()
        };
        let opcode = Opcode::try_from(buf.get_u8())
            .map_err(|e| DriverError::protocol(format!("unknown opcode: {e}")))?;
        let length = buf.get_u32();
        Ok(Self {
            version,
            direction,
            flags,
            stream,
            opcode,
            length,
        })
    }
}

/// Peek the protocol version out of a not-yet-negotiated connection's
/// first byte, used only during the initial STARTUP/SUPPORTED exchange
/// before a version has been committed to the Connection.
pub fn peek_version(first_byte: u8) -> Result<ProtocolVersion> {
    ProtocolVersion::from_raw(first_byte & !RESPONSE_BIT)
        .ok_or_else(|| DriverError::protocol(format!("unknown protocol version byte 0x{first_byte:02x}")))
}

/// Encode a complete frame (header + body) ready for a single socket write.
pub fn encode_frame(
    version: ProtocolVersion,
    direction: Direction,
    flags: FrameFlags,
    stream: i16,
    opcode: Opcode,
    body: &[u8],
) -> Bytes {
    let header = FrameHeader {
        version,
        direction,
        flags,
        stream,
        opcode,
        length: body.len() as u32,
    };
    let mut out = BytesMut::with_capacity(version.header_len() + body.len());
    header.encode(&mut out);
    out.put_slice(body);
    out.freeze()
}

/// Streaming frame decoder state (§5: "the codec is streaming").
///
/// Owns the accumulation buffer so the caller (the Connection read loop)
/// can feed it arbitrary-sized socket reads and pull out complete frames
/// as they become available, without re-parsing bytes already consumed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode one frame out of the accumulated buffer. Returns
    /// `Ok(None)` if the buffer doesn't yet hold a complete frame — the
    /// caller should read more bytes from the socket and feed them in.
    pub fn try_decode(&mut self, version: ProtocolVersion) -> Result<Option<(FrameHeader, Bytes)>> {
        let header_len = version.header_len();
        if self.buf.len() < header_len {
            return Ok(None);
        }
        let mut header_view = &self.buf[..header_len];
        let header = FrameHeader::decode(&mut header_view, version)?;
        let total = header_len + header.length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let mut frame = self.buf.split_to(total);
        frame.advance(header_len);
        Ok(Some((header, frame.freeze())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_v4() {
        let body = b"hello world";
        let bytes = encode_frame(
            ProtocolVersion::V4,
            Direction::Request,
            FrameFlags::empty(),
            7,
            Opcode::Query,
            body,
        );
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let (hdr, decoded_body) = dec.try_decode(ProtocolVersion::V4).unwrap().unwrap();
        assert_eq!(hdr.stream, 7);
        assert_eq!(hdr.opcode, Opcode::Query);
        assert_eq!(hdr.direction, Direction::Request);
        assert_eq!(&decoded_body[..], body);
    }

    #[test]
    fn header_round_trip_v1_8bit_stream() {
        let bytes = encode_frame(
            ProtocolVersion::V1,
            Direction::Response,
            FrameFlags::empty(),
            42,
            Opcode::Ready,
            b"",
        );
        assert_eq!(bytes.len(), ProtocolVersion::V1.header_len());
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let (hdr, body) = dec.try_decode(ProtocolVersion::V1).unwrap().unwrap();
        assert_eq!(hdr.stream, 42);
        assert!(body.is_empty());
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let bytes = encode_frame(
            ProtocolVersion::V4,
            Direction::Request,
            FrameFlags::empty(),
            1,
            Opcode::Options,
            b"0123456789",
        );
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes[..5]);
        assert!(dec.try_decode(ProtocolVersion::V4).unwrap().is_none());
        dec.feed(&bytes[5..]);
        let (hdr, body) = dec.try_decode(ProtocolVersion::V4).unwrap().unwrap();
        assert_eq!(hdr.opcode, Opcode::Options);
        assert_eq!(&body[..], b"0123456789");
    }

    #[test]
    fn event_stream_id_is_negative_one() {
        let bytes = encode_frame(
            ProtocolVersion::V4,
            Direction::Response,
            FrameFlags::empty(),
            -1,
            Opcode::Event,
            b"",
        );
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let (hdr, _) = dec.try_decode(ProtocolVersion::V4).unwrap().unwrap();
        assert_eq!(hdr.stream, -1);
    }

    #[test]
    fn unknown_opcode_is_protocol_error() {
        let mut raw = BytesMut::new();
        raw.put_u8(ProtocolVersion::V4 as u8);
        raw.put_u8(0);
        raw.put_i16(0);
        raw.put_u8(0x7f); // not a valid opcode
        raw.put_u32(0);
        let mut dec = FrameDecoder::new();
        dec.feed(&raw);
        assert!(dec.try_decode(ProtocolVersion::V4).is_err());
    }
}
