// SPDX-License-Identifier: Apache-2.0

//! SASL authentication framework (§4.3).
//!
//! An [`AuthProvider`] produces a fresh [`Authenticator`] per
//! connection. The Authenticator is a sequential challenge/response
//! state machine driven by the Connection's startup sequence (§4.2)
//! until `AUTH_SUCCESS`.

pub mod gssapi;
pub mod plain;

use crate::errors::{DriverError, Result};

/// Outcome of one `evaluate_challenge` step.
#[derive(Debug)]
pub enum ChallengeOutcome {
    /// Send this token back as the next `AUTH_RESPONSE`.
    Respond(Vec<u8>),
    /// The client side considers the exchange complete; the server's
    /// next frame should be `AUTH_SUCCESS`.
    Done,
}

/// A per-connection SASL state machine (§4.3 contract).
///
/// §9 models the source's inheritance chain (Base → DSE →
/// PlainText/GSSAPI) as a trait with a default `initial_response` that
/// branches on the authenticator class name the server declared; each
/// concrete scheme only implements `evaluate_challenge`/`on_success`.
pub trait Authenticator: Send {
    /// The very first `AUTH_RESPONSE` payload. Default implements the
    /// DSE scheme-negotiation rule (§4.3 "DseAuthenticator scheme
    /// negotiation"): if the server's authenticator class is the DSE
    /// wrapper, respond with the SASL mechanism name; otherwise treat
    /// the well-known bootstrap token as already delivered and hand it
    /// to `evaluate_challenge`.
    fn initial_response(&mut self, server_authenticator_class: &str) -> Result<Vec<u8>> {
        if server_authenticator_class == DSE_AUTHENTICATOR_CLASS {
            Ok(self.sasl_mechanism().as_bytes().to_vec())
        } else {
            match self.evaluate_challenge(self.bootstrap_token())? {
                ChallengeOutcome::Respond(bytes) => Ok(bytes),
                ChallengeOutcome::Done => Ok(Vec::new()),
            }
        }
    }

    /// The SASL mechanism name sent during DSE scheme negotiation
    /// (`GSSAPI`, `PLAIN`).
    fn sasl_mechanism(&self) -> &'static str;

    /// The per-scheme well-known bootstrap challenge substituted in
    /// when the server is not the DSE wrapper (§4.3: `PLAIN-START`,
    /// `GSSAPI-START`).
    fn bootstrap_token(&self) -> &'static [u8];

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<ChallengeOutcome>;

    /// Fire-and-forget per §9's open question: errors here are logged
    /// at `warn!` by the caller, never propagated.
    fn on_success(&mut self, token: Option<&[u8]>) -> Result<()> {
        let _ = token;
        Ok(())
    }
}

pub const DSE_AUTHENTICATOR_CLASS: &str = "com.datastax.bdp.cassandra.auth.DseAuthenticator";
pub const CASSANDRA_PASSWORD_AUTHENTICATOR_CLASS: &str =
    "org.apache.cassandra.auth.PasswordAuthenticator";

/// Produces a fresh [`Authenticator`] per connection, given the
/// server's declared class name and the host endpoint (§4.3 contract).
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    fn new_authenticator(
        &self,
        host: std::net::SocketAddr,
        authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>>;
}

/// No credentials configured. If the server nonetheless sends
/// AUTHENTICATE, fail with a distinct, host-naming error (§4.3
/// "NoAuth").
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuthProvider;

impl AuthProvider for NoneAuthProvider {
    fn new_authenticator(
        &self,
        host: std::net::SocketAddr,
        _authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>> {
        Err(DriverError::Authentication {
            host: host.to_string(),
            message: "server requires authentication but no AuthProvider is configured"
                .to_string(),
        })
    }
}

pub use plain::PlainTextAuthProvider;
