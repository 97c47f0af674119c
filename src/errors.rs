// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the driver core (§7).
//!
//! `DriverError` is the single error type that crosses component
//! boundaries. Each variant maps to one row of §7's table; the
//! propagation rule (retry vs rethrow vs transparent recovery) lives
//! with the retry policy and request handler, not here — this module
//! only classifies.

use std::{fmt, net::SocketAddr};

use thiserror::Error;

/// Server-side sub-codes carried by a CQL `ERROR` frame (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    ServerError = 0x0000,
    ProtocolError = 0x000A,
    AuthenticationError = 0x0100,
    Unavailable = 0x1000,
    Overloaded = 0x1001,
    IsBootstrapping = 0x1002,
    TruncateError = 0x1003,
    WriteTimeout = 0x1100,
    ReadTimeout = 0x1200,
    ReadFailure = 0x1300,
    FunctionFailure = 0x1400,
    WriteFailure = 0x1500,
    SyntaxError = 0x2000,
    Unauthorized = 0x2100,
    Invalid = 0x2200,
    ConfigError = 0x2300,
    AlreadyExists = 0x2400,
    Unprepared = 0x2500,
}

impl ErrorCode {
    pub fn from_raw(code: i32) -> Option<Self> {
        Some(match code {
            0x0000 => Self::ServerError,
            0x000A => Self::ProtocolError,
            0x0100 => Self::AuthenticationError,
            0x1000 => Self::Unavailable,
            0x1001 => Self::Overloaded,
            0x1002 => Self::IsBootstrapping,
            0x1003 => Self::TruncateError,
            0x1100 => Self::WriteTimeout,
            0x1200 => Self::ReadTimeout,
            0x1300 => Self::ReadFailure,
            0x1400 => Self::FunctionFailure,
            0x1500 => Self::WriteFailure,
            0x2000 => Self::SyntaxError,
            0x2100 => Self::Unauthorized,
            0x2200 => Self::Invalid,
            0x2300 => Self::ConfigError,
            0x2400 => Self::AlreadyExists,
            0x2500 => Self::Unprepared,
            _ => return None,
        })
    }

    /// Errors that flow through the retry policy (§7 "Propagation").
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::Overloaded
                | Self::IsBootstrapping
                | Self::ServerError
                | Self::ReadFailure
                | Self::WriteFailure
        )
    }

    /// Logical errors that must rethrow immediately (§7).
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Self::Invalid
                | Self::SyntaxError
                | Self::AlreadyExists
                | Self::Unauthorized
                | Self::ConfigError
                | Self::FunctionFailure
        )
    }
}

/// A server `ERROR` frame body, decoded enough to drive retry decisions.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: ErrorDetail,
}

/// Sub-code-specific payload carried alongside the message.
#[derive(Debug, Clone, Default)]
pub enum ErrorDetail {
    #[default]
    None,
    Unavailable {
        consistency: u16,
        required: i32,
        alive: i32,
    },
    WriteTimeout {
        consistency: u16,
        received: i32,
        block_for: i32,
        write_type: String,
    },
    ReadTimeout {
        consistency: u16,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    Unprepared {
        id: Vec<u8>,
    },
    AlreadyExists {
        keyspace: String,
        table: String,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// The single error type threaded through the driver core.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Codec violation; the Connection that produced it must close (§4.1, §7).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport failure; closes the Connection, triggers reconnection.
    #[error("socket error on {addr:?}: {source}")]
    Socket {
        addr: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },

    /// Fatal for the current login attempt; never retried.
    #[error("authentication error on {host}: {message}")]
    Authentication { host: String, message: String },

    /// The query plan was exhausted; wraps one inner error per attempted host.
    #[error("no host available ({} inner errors)", .errors.len())]
    NoHostAvailable { errors: Vec<(SocketAddr, String)> },

    /// Internal: a Connection has no free stream-id slot. Always retried on
    /// the next host; never surfaced to a caller directly.
    #[error("connection busy (stream-id space exhausted)")]
    BusyConnection,

    /// Server-side response, §7 sub-codes.
    #[error("server error: {0}")]
    Response(#[from] Box<ServerError>),

    /// Input validation failure.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Configuration invalid or a required resource missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// An invariant was violated; abort the request rather than guess.
    #[error("internal driver invariant violated: {0}")]
    Internal(String),

    /// The request timed out waiting for a Connection response. Tracked
    /// separately from `Response(ReadTimeout)` which is server-reported.
    #[error("client timeout waiting for response from {host}")]
    ClientTimeout { host: SocketAddr },

    /// Client shutdown was requested while the operation was in flight.
    #[error("client closed")]
    ClientClosed,
}

impl DriverError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn socket(addr: Option<SocketAddr>, source: std::io::Error) -> Self {
        Self::Socket { addr, source }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// `DriverError` can't derive `Clone` (`std::io::Error` doesn't), but
    /// fanning one failure out to many waiters (prepared-cache waiter
    /// list, a Connection's pending table) needs an owned copy per
    /// recipient. `io::Error` is recreated from its kind and message.
    pub fn shallow_clone(&self) -> Self {
        match self {
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Socket { addr, source } => {
                Self::Socket { addr: *addr, source: std::io::Error::new(source.kind(), source.to_string()) }
            },
            Self::Authentication { host, message } => {
                Self::Authentication { host: host.clone(), message: message.clone() }
            },
            Self::NoHostAvailable { errors } => Self::NoHostAvailable { errors: errors.clone() },
            Self::BusyConnection => Self::BusyConnection,
            Self::Response(e) => Self::Response(e.clone()),
            Self::Argument(m) => Self::Argument(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Internal(m) => Self::Internal(m.clone()),
            Self::ClientTimeout { host } => Self::ClientTimeout { host: *host },
            Self::ClientClosed => Self::ClientClosed,
        }
    }

    /// Whether this error should ever be retried per §7's propagation rule.
    /// `NoHostAvailable`/`Authentication`/`Argument`/`Config`/`Internal` are
    /// terminal; `Response` delegates to `ErrorCode::is_recoverable`.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Response(e) => e.code.is_recoverable(),
            Self::Socket { .. } | Self::BusyConnection | Self::ClientTimeout { .. } => {
                true
            },
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
