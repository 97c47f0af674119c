// SPDX-License-Identifier: Apache-2.0

//! PLAIN SASL mechanism (§4.3 "PLAIN"), including DSE proxy-execute
//! (`authorizationId`) and "transitional mode".

use std::net::SocketAddr;

use crate::{
    auth::{Authenticator, ChallengeOutcome, DSE_AUTHENTICATOR_CLASS},
    errors::{DriverError, Result},
};

const PLAIN_START: &[u8] = b"PLAIN-START";

/// Builds a username/password (optionally DSE proxy-execute)
/// [`AuthProvider`](crate::auth::AuthProvider).
#[derive(Debug, Clone)]
pub struct PlainTextAuthProvider {
    username: String,
    password: String,
    /// §6 DSE extensions: "proxy authentication via
    /// `ProxyExecute`/`ProxyLogin` permissions (carried by auth
    /// provider `authorizationId`)".
    authorization_id: String,
}

impl PlainTextAuthProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            authorization_id: String::new(),
        }
    }

    /// Authenticate as `username`/`password` but execute requests as
    /// `authorization_id` (DSE `ProxyExecute`).
    pub fn with_authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = authorization_id.into();
        self
    }
}

impl crate::auth::AuthProvider for PlainTextAuthProvider {
    fn new_authenticator(
        &self,
        _host: SocketAddr,
        _authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>> {
        Ok(Box::new(PlainTextAuthenticator {
            username: self.username.clone(),
            password: self.password.clone(),
            authorization_id: self.authorization_id.clone(),
        }))
    }
}

#[derive(Debug)]
struct PlainTextAuthenticator {
    username: String,
    password: String,
    authorization_id: String,
}

impl PlainTextAuthenticator {
    fn response(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.authorization_id.len() + 1 + self.username.len() + 1 + self.password.len(),
        );
        out.extend_from_slice(self.authorization_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.username.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        out
    }
}

impl Authenticator for PlainTextAuthenticator {
    fn sasl_mechanism(&self) -> &'static str {
        "PLAIN"
    }

    fn bootstrap_token(&self) -> &'static [u8] {
        PLAIN_START
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<ChallengeOutcome> {
        if challenge != PLAIN_START {
            return Err(DriverError::Authentication {
                host: String::new(),
                message: format!(
                    "unexpected PLAIN challenge: expected PLAIN-START, got {} bytes",
                    challenge.len()
                ),
            });
        }
        Ok(ChallengeOutcome::Respond(self.response()))
    }
}

/// DSE "transitional mode" (§4.3): AUTHENTICATE was sent but no
/// credentials are configured and the server is the DSE authenticator;
/// respond with an empty PLAIN payload rather than failing outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransitionalAuthProvider;

impl crate::auth::AuthProvider for TransitionalAuthProvider {
    fn new_authenticator(
        &self,
        host: SocketAddr,
        authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>> {
        if authenticator_class != DSE_AUTHENTICATOR_CLASS {
            return Err(DriverError::Authentication {
                host: host.to_string(),
                message: "server requires authentication but no AuthProvider is configured"
                    .to_string(),
            });
        }
        Ok(Box::new(TransitionalAuthenticator))
    }
}

#[derive(Debug)]
struct TransitionalAuthenticator;

impl Authenticator for TransitionalAuthenticator {
    fn sasl_mechanism(&self) -> &'static str {
        "PLAIN"
    }

    fn bootstrap_token(&self) -> &'static [u8] {
        PLAIN_START
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<ChallengeOutcome> {
        Ok(ChallengeOutcome::Respond(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthProvider;

    #[test]
    fn plain_initial_response_is_byte_exact() {
        // §8 testable property: u="u", p="p", authorizationId="" yields
        // "\0u\0p".
        let provider = PlainTextAuthProvider::new("u", "p");
        let mut authenticator = provider
            .new_authenticator("127.0.0.1:9042".parse().unwrap(), "anything")
            .unwrap();
        let token = authenticator.initial_response("anything").unwrap();
        assert_eq!(token, b"\0u\0p");
    }

    #[test]
    fn plain_dse_negotiation_sends_mechanism_name_first() {
        let provider = PlainTextAuthProvider::new("u", "p");
        let mut authenticator = provider
            .new_authenticator(
                "127.0.0.1:9042".parse().unwrap(),
                super::super::DSE_AUTHENTICATOR_CLASS,
            )
            .unwrap();
        let token = authenticator
            .initial_response(super::super::DSE_AUTHENTICATOR_CLASS)
            .unwrap();
        assert_eq!(token, b"PLAIN");
    }

    #[test]
    fn plain_rejects_unexpected_challenge() {
        let mut authenticator = PlainTextAuthenticator {
            username: "u".into(),
            password: "p".into(),
            authorization_id: String::new(),
        };
        assert!(authenticator.evaluate_challenge(b"WRONG").is_err());
    }

    #[test]
    fn proxy_execute_prefixes_authorization_id() {
        let provider = PlainTextAuthProvider::new("alice", "alice-pwd").with_authorization_id("bob");
        let mut authenticator = provider
            .new_authenticator("127.0.0.1:9042".parse().unwrap(), "anything")
            .unwrap();
        let token = authenticator.initial_response("anything").unwrap();
        assert_eq!(token, b"bob\0alice\0alice-pwd");
    }
}
