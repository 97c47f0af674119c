// SPDX-License-Identifier: Apache-2.0

//! Pluggable frame-body compression (§4.1 "compressed frames (LZ4 and
//! Snappy optional)"). Neither implementation is linked in by default;
//! enable `compression-lz4` / `compression-snappy` to pull them in.

use crate::errors::{DriverError, Result};

/// A negotiated compression algorithm's body codec. The frame header's
/// `COMPRESSION` flag (§3) tells the decoder a frame needs
/// [`BodyCompressor::decompress`] before the primitive codecs run.
pub trait BodyCompressor: Send + Sync + std::fmt::Debug {
    /// The `COMPRESSION` STARTUP option value (§4.2), e.g. `"lz4"`.
    fn name(&self) -> &'static str;
    fn compress(&self, body: &[u8]) -> Vec<u8>;
    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Picks a compressor by STARTUP option name, used when negotiating
/// against the server's `SUPPORTED` advertisement (§4.2).
pub fn by_name(name: &str) -> Result<Box<dyn BodyCompressor>> {
    match name {
        #[cfg(feature = "compression-lz4")]
        "lz4" => Ok(Box::new(Lz4Compressor)),
        #[cfg(feature = "compression-snappy")]
        "snappy" => Ok(Box::new(SnappyCompressor)),
        other => Err(DriverError::Config(format!(
            "compression algorithm '{other}' is not compiled into this build"
        ))),
    }
}

#[cfg(feature = "compression-lz4")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "compression-lz4")]
impl BodyCompressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    /// Cassandra's LZ4 body format prefixes the block with a 4-byte
    /// big-endian uncompressed length, matching the protocol spec's
    /// `Compressor.java` framing.
    fn compress(&self, body: &[u8]) -> Vec<u8> {
        let compressed = lz4_flex::block::compress(body);
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&compressed);
        out
    }

    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() < 4 {
            return Err(DriverError::protocol("truncated LZ4 frame body"));
        }
        let uncompressed_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        lz4_flex::block::decompress(&body[4..], uncompressed_len)
            .map_err(|e| DriverError::protocol(format!("LZ4 decompress failed: {e}")))
    }
}

#[cfg(feature = "compression-snappy")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

#[cfg(feature = "compression-snappy")]
impl BodyCompressor for SnappyCompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, body: &[u8]) -> Vec<u8> {
        snap::raw::Encoder::new().compress_vec(body).unwrap_or_default()
    }

    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|e| DriverError::protocol(format!("snappy decompress failed: {e}")))
    }
}

#[cfg(all(test, feature = "compression-lz4"))]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips() {
        let c = Lz4Compressor;
        let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = c.compress(&data);
        let decompressed = c.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
