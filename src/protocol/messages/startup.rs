// SPDX-License-Identifier: Apache-2.0

//! STARTUP / READY / AUTHENTICATE / OPTIONS / SUPPORTED / AUTH_* (§4.1,
//! §4.2 "Startup sequence", §4.3 auth framework).

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    errors::Result,
    protocol::{
        messages::RequestBody,
        opcode::Opcode,
        primitives::{
            read_bytes, read_string_map, read_string_multimap, write_bytes, write_string_map,
        },
        version::ProtocolVersion,
    },
};

/// `STARTUP` — the first frame on any Connection (§4.2).
#[derive(Debug, Clone)]
pub struct Startup {
    pub options: HashMap<String, String>,
}

impl Startup {
    pub fn new(cql_version: &str, compression: Option<&str>) -> Self {
        let mut options = HashMap::new();
        options.insert("CQL_VERSION".to_string(), cql_version.to_string());
        if let Some(c) = compression {
            options.insert("COMPRESSION".to_string(), c.to_string());
        }
        Self { options }
    }
}

impl RequestBody for Startup {
    fn opcode(&self) -> Opcode {
        Opcode::Startup
    }

    fn encode_body(&self, _version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_string_map(out, &self.options);
        Ok(())
    }
}

/// `OPTIONS` — used both to discover `SUPPORTED` values and as the
/// Connection heartbeat (§4.2 "Heartbeat").
#[derive(Debug, Clone, Default)]
pub struct Options;

impl RequestBody for Options {
    fn opcode(&self) -> Opcode {
        Opcode::Options
    }

    fn encode_body(&self, _version: ProtocolVersion, _out: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

/// `SUPPORTED` response body: server-advertised option values.
#[derive(Debug, Clone)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            options: read_string_multimap(buf)?,
        })
    }

    pub fn compression_algorithms(&self) -> &[String] {
        self.options
            .get("COMPRESSION")
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cql_versions(&self) -> &[String] {
        self.options
            .get("CQL_VERSION")
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// `AUTHENTICATE` response body: names the server authenticator class
/// (§4.3 — e.g. `com.datastax.bdp.cassandra.auth.DseAuthenticator`).
#[derive(Debug, Clone)]
pub struct Authenticate {
    pub authenticator_class: String,
}

impl Authenticate {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            authenticator_class: crate::protocol::primitives::read_string(buf)?,
        })
    }
}

/// `AUTH_RESPONSE` request body — one SASL step's response bytes.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub token: Vec<u8>,
}

impl RequestBody for AuthResponse {
    fn opcode(&self) -> Opcode {
        Opcode::AuthResponse
    }

    fn encode_body(&self, _version: ProtocolVersion, out: &mut BytesMut) -> Result<()> {
        write_bytes(out, Some(&self.token));
        Ok(())
    }
}

/// `AUTH_CHALLENGE` response body.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub token: Vec<u8>,
}

impl AuthChallenge {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            token: read_bytes(buf)?.unwrap_or_default(),
        })
    }
}

/// `AUTH_SUCCESS` response body — optional final server token.
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    pub token: Option<Vec<u8>>,
}

impl AuthSuccess {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            token: read_bytes(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    #[test]
    fn startup_encodes_cql_version_and_compression() {
        let s = Startup::new("3.0.0", Some("lz4"));
        let mut out = BytesMut::new();
        s.encode_body(ProtocolVersion::V4, &mut out).unwrap();
        let mut rd = out.freeze();
        let map = read_string_map(&mut rd).unwrap();
        assert_eq!(map.get("CQL_VERSION").unwrap(), "3.0.0");
        assert_eq!(map.get("COMPRESSION").unwrap(), "lz4");
    }

    #[test]
    fn supported_decodes_multimap() {
        let mut raw = BytesMut::new();
        raw.put_u16(1);
        crate::protocol::primitives::write_string(&mut raw, "COMPRESSION");
        crate::protocol::primitives::write_string_list(
            &mut raw,
            &["lz4".to_string(), "snappy".to_string()],
        );
        let mut rd = raw.freeze();
        let sup = Supported::decode(&mut rd).unwrap();
        assert_eq!(sup.compression_algorithms(), &["lz4", "snappy"]);
    }
}
