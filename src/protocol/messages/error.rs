// SPDX-License-Identifier: Apache-2.0

//! `ERROR` response body (§4.1, §7): decodes into
//! [`crate::errors::ServerError`] so the retry policy can act on it
//! without re-parsing the frame.

use bytes::Bytes;

use crate::{
    errors::{DriverError, ErrorCode, ErrorDetail, Result, ServerError},
    protocol::primitives::{read_int, read_short, read_short_bytes, read_string},
};

pub type ErrorBody = ServerError;

pub(crate) trait ErrorBodyDecode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

impl ErrorBodyDecode for ServerError {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let raw_code = read_int(buf)?;
        let code = ErrorCode::from_raw(raw_code)
            .ok_or_else(|| DriverError::protocol(format!("unknown error code: 0x{raw_code:08x}")))?;
        let message = read_string(buf)?;

        let detail = match code {
            ErrorCode::Unavailable => ErrorDetail::Unavailable {
                consistency: read_short(buf)?,
                required: read_int(buf)?,
                alive: read_int(buf)?,
            },
            ErrorCode::WriteTimeout => ErrorDetail::WriteTimeout {
                consistency: read_short(buf)?,
                received: read_int(buf)?,
                block_for: read_int(buf)?,
                write_type: read_string(buf)?,
            },
            ErrorCode::ReadTimeout => ErrorDetail::ReadTimeout {
                consistency: read_short(buf)?,
                received: read_int(buf)?,
                block_for: read_int(buf)?,
                data_present: buf.first().copied().unwrap_or(0) != 0,
            },
            ErrorCode::Unprepared => ErrorDetail::Unprepared {
                id: read_short_bytes(buf)?,
            },
            ErrorCode::AlreadyExists => ErrorDetail::AlreadyExists {
                keyspace: read_string(buf)?,
                table: read_string(buf)?,
            },
            _ => ErrorDetail::None,
        };

        Ok(ServerError { code, message, detail })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::primitives::write_string;

    #[test]
    fn decodes_unavailable_detail() {
        let mut raw = BytesMut::new();
        raw.put_i32(ErrorCode::Unavailable as i32);
        write_string(&mut raw, "not enough replicas");
        raw.put_u16(0x0004); // QUORUM
        raw.put_i32(3);
        raw.put_i32(1);
        let mut rd = raw.freeze();
        let err = ServerError::decode(&mut rd).unwrap();
        match err.detail {
            ErrorDetail::Unavailable { required, alive, .. } => {
                assert_eq!(required, 3);
                assert_eq!(alive, 1);
            },
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[test]
    fn decodes_syntax_error_with_no_detail() {
        let mut raw = BytesMut::new();
        raw.put_i32(ErrorCode::SyntaxError as i32);
        write_string(&mut raw, "line 1:0 no viable alternative");
        let mut rd = raw.freeze();
        let err = ServerError::decode(&mut rd).unwrap();
        assert!(matches!(err.detail, ErrorDetail::None));
    }
}
