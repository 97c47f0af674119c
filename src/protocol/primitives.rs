// SPDX-License-Identifier: Apache-2.0

//! Key encodings shared by every message body (§4.1).
//!
//! These are the primitive serializers the native protocol spec names
//! directly: `[short]`, `[int]`, `[long]`, `[string]`, `[long string]`,
//! `[bytes]`, `[short bytes]`, `[string map]`, `[string multimap]`,
//! `[uuid]`, `[inet]`, `[consistency]`. Full CQL value codecs (blob,
//! varint, list/map/UDT, …) are an out-of-scope external collaborator
//! per §1 — only their `<bytes>`-level framing belongs here.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::errors::{DriverError, Result};

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(DriverError::protocol(format!(
            "truncated frame: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn write_short(out: &mut impl BufMut, v: u16) {
    out.put_u16(v);
}

pub fn read_short(buf: &mut impl Buf) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn write_int(out: &mut impl BufMut, v: i32) {
    out.put_i32(v);
}

pub fn read_int(buf: &mut impl Buf) -> Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn write_long(out: &mut impl BufMut, v: i64) {
    out.put_i64(v);
}

pub fn read_long(buf: &mut impl Buf) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

/// `[string]` — `[short]` length n, followed by n UTF-8 bytes.
pub fn write_string(out: &mut impl BufMut, s: &str) {
    write_short(out, s.len() as u16);
    out.put_slice(s.as_bytes());
}

pub fn read_string(buf: &mut impl Buf) -> Result<String> {
    let len = read_short(buf)? as usize;
    need(buf, len)?;
    let mut b = vec![0u8; len];
    buf.copy_to_slice(&mut b);
    String::from_utf8(b).map_err(|e| DriverError::protocol(format!("non-UTF-8 string: {e}")))
}

/// `[long string]` — `[int]` length n, followed by n UTF-8 bytes.
pub fn write_long_string(out: &mut impl BufMut, s: &str) {
    write_int(out, s.len() as i32);
    out.put_slice(s.as_bytes());
}

pub fn read_long_string(buf: &mut impl Buf) -> Result<String> {
    let len = read_int(buf)?;
    if len < 0 {
        return Err(DriverError::protocol("negative long string length"));
    }
    let len = len as usize;
    need(buf, len)?;
    let mut b = vec![0u8; len];
    buf.copy_to_slice(&mut b);
    String::from_utf8(b).map_err(|e| DriverError::protocol(format!("non-UTF-8 string: {e}")))
}

/// `[bytes]` — `[int]` length n; n < 0 means null.
pub fn write_bytes(out: &mut impl BufMut, v: Option<&[u8]>) {
    match v {
        Some(b) => {
            write_int(out, b.len() as i32);
            out.put_slice(b);
        },
        None => write_int(out, -1),
    }
}

pub fn read_bytes(buf: &mut impl Buf) -> Result<Option<Vec<u8>>> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    need(buf, len)?;
    let mut b = vec![0u8; len];
    buf.copy_to_slice(&mut b);
    Ok(Some(b))
}

/// `[short bytes]` — `[short]` length n (non-nullable), followed by n bytes.
pub fn write_short_bytes(out: &mut impl BufMut, v: &[u8]) {
    write_short(out, v.len() as u16);
    out.put_slice(v);
}

pub fn read_short_bytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let len = read_short(buf)? as usize;
    need(buf, len)?;
    let mut b = vec![0u8; len];
    buf.copy_to_slice(&mut b);
    Ok(b)
}

/// `[string list]` — `[short]` n, followed by n `[string]`.
pub fn write_string_list(out: &mut impl BufMut, items: &[String]) {
    write_short(out, items.len() as u16);
    for s in items {
        write_string(out, s);
    }
}

pub fn read_string_list(buf: &mut impl Buf) -> Result<Vec<String>> {
    let n = read_short(buf)?;
    (0..n).map(|_| read_string(buf)).collect()
}

/// `[string map]` — `[short]` n, followed by n `([string],[string])` pairs.
pub fn write_string_map(out: &mut impl BufMut, map: &HashMap<String, String>) {
    write_short(out, map.len() as u16);
    for (k, v) in map {
        write_string(out, k);
        write_string(out, v);
    }
}

pub fn read_string_map(buf: &mut impl Buf) -> Result<HashMap<String, String>> {
    let n = read_short(buf)?;
    let mut m = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let k = read_string(buf)?;
        let v = read_string(buf)?;
        m.insert(k, v);
    }
    Ok(m)
}

/// `[string multimap]` — `[short]` n, followed by n `([string],[string list])`.
pub fn read_string_multimap(buf: &mut impl Buf) -> Result<HashMap<String, Vec<String>>> {
    let n = read_short(buf)?;
    let mut m = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let k = read_string(buf)?;
        let v = read_string_list(buf)?;
        m.insert(k, v);
    }
    Ok(m)
}

pub fn write_string_multimap(out: &mut impl BufMut, map: &HashMap<String, Vec<String>>) {
    write_short(out, map.len() as u16);
    for (k, v) in map {
        write_string(out, k);
        write_string_list(out, v);
    }
}

/// `[uuid]` — exactly 16 bytes, big-endian.
pub fn write_uuid(out: &mut impl BufMut, id: &Uuid) {
    out.put_slice(id.as_bytes());
}

pub fn read_uuid(buf: &mut impl Buf) -> Result<Uuid> {
    need(buf, 16)?;
    let mut b = [0u8; 16];
    buf.copy_to_slice(&mut b);
    Ok(Uuid::from_bytes(b))
}

/// `[inet]` — one length byte (4 or 16), raw address octets, then a
/// 4-byte big-endian port.
pub fn write_inet(out: &mut impl BufMut, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(v4) => {
            out.put_u8(4);
            out.put_slice(&v4.octets());
        },
        IpAddr::V6(v6) => {
            out.put_u8(16);
            out.put_slice(&v6.octets());
        },
    }
    out.put_u32(addr.port() as u32);
}

pub fn read_inet(buf: &mut impl Buf) -> Result<SocketAddr> {
    need(buf, 1)?;
    let len = buf.get_u8();
    let ip = match len {
        4 => {
            need(buf, 4)?;
            let mut b = [0u8; 4];
            buf.copy_to_slice(&mut b);
            IpAddr::V4(Ipv4Addr::from(b))
        },
        16 => {
            need(buf, 16)?;
            let mut b = [0u8; 16];
            buf.copy_to_slice(&mut b);
            IpAddr::V6(Ipv6Addr::from(b))
        },
        other => {
            return Err(DriverError::protocol(format!(
                "invalid inet address length: {other}"
            )));
        },
    };
    need(buf, 4)?;
    let port = buf.get_u32() as u16;
    Ok(SocketAddr::new(ip, port))
}

/// `[inet]` without a port, used by `system.peers.rpc_address` style rows
/// that are plain addresses rather than `(addr, port)` pairs.
pub fn read_inet_addr(buf: &mut impl Buf) -> Result<IpAddr> {
    need(buf, 1)?;
    let len = buf.get_u8();
    match len {
        4 => {
            need(buf, 4)?;
            let mut b = [0u8; 4];
            buf.copy_to_slice(&mut b);
            Ok(IpAddr::V4(Ipv4Addr::from(b)))
        },
        16 => {
            need(buf, 16)?;
            let mut b = [0u8; 16];
            buf.copy_to_slice(&mut b);
            Ok(IpAddr::V6(Ipv6Addr::from(b)))
        },
        other => Err(DriverError::protocol(format!(
            "invalid inet address length: {other}"
        ))),
    }
}

/// `[consistency]` — a `[short]` naming one of the consistency levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

impl Consistency {
    pub fn from_raw(v: u16) -> Result<Self> {
        Ok(match v {
            0x0000 => Self::Any,
            0x0001 => Self::One,
            0x0002 => Self::Two,
            0x0003 => Self::Three,
            0x0004 => Self::Quorum,
            0x0005 => Self::All,
            0x0006 => Self::LocalQuorum,
            0x0007 => Self::EachQuorum,
            0x0008 => Self::Serial,
            0x0009 => Self::LocalSerial,
            0x000A => Self::LocalOne,
            other => {
                return Err(DriverError::protocol(format!(
                    "invalid consistency level: 0x{other:04x}"
                )));
            },
        })
    }
}

pub fn write_consistency(out: &mut impl BufMut, c: Consistency) {
    write_short(out, c as u16);
}

pub fn read_consistency(buf: &mut impl Buf) -> Result<Consistency> {
    Consistency::from_raw(read_short(buf)?)
}

/// `[bytes map]` — carries CUSTOM_PAYLOAD bodies (§6 DSE extensions).
pub fn write_bytes_map(out: &mut impl BufMut, map: &HashMap<String, Vec<u8>>) {
    write_short(out, map.len() as u16);
    for (k, v) in map {
        write_string(out, k);
        write_bytes(out, Some(v));
    }
}

pub fn read_bytes_map(buf: &mut impl Buf) -> Result<HashMap<String, Vec<u8>>> {
    let n = read_short(buf)?;
    let mut m = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let k = read_string(buf)?;
        let v = read_bytes(buf)?.unwrap_or_default();
        m.insert(k, v);
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hello");
        let mut rd = buf.freeze();
        assert_eq!(read_string(&mut rd).unwrap(), "hello");
    }

    #[test]
    fn bytes_null_round_trip() {
        let mut buf = BytesMut::new();
        write_bytes(&mut buf, None);
        write_bytes(&mut buf, Some(b"abc"));
        let mut rd = buf.freeze();
        assert_eq!(read_bytes(&mut rd).unwrap(), None);
        assert_eq!(read_bytes(&mut rd).unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn inet_round_trip_v4_and_v6() {
        let mut buf = BytesMut::new();
        let a4: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        let a6: SocketAddr = "[::1]:9042".parse().unwrap();
        write_inet(&mut buf, a4);
        write_inet(&mut buf, a6);
        let mut rd = buf.freeze();
        assert_eq!(read_inet(&mut rd).unwrap(), a4);
        assert_eq!(read_inet(&mut rd).unwrap(), a6);
    }

    #[test]
    fn consistency_round_trip() {
        let mut buf = BytesMut::new();
        write_consistency(&mut buf, Consistency::LocalQuorum);
        let mut rd = buf.freeze();
        assert_eq!(read_consistency(&mut rd).unwrap(), Consistency::LocalQuorum);
    }

    #[test]
    fn string_map_round_trip() {
        let mut map = HashMap::new();
        map.insert("CQL_VERSION".to_string(), "3.0.0".to_string());
        let mut buf = BytesMut::new();
        write_string_map(&mut buf, &map);
        let mut rd = buf.freeze();
        assert_eq!(read_string_map(&mut rd).unwrap(), map);
    }
}
