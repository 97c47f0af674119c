// SPDX-License-Identifier: Apache-2.0

//! GSSAPI/Kerberos SASL mechanism (§4.3 "GSSAPI").
//!
//! Gated behind the `gssapi` Cargo feature (§9 "Optional native
//! Kerberos dependency"): with the feature disabled this module still
//! compiles, and [`DseGssapiAuthProvider::new`] returns a
//! `ConfigError` rather than failing to build.

use std::net::SocketAddr;

use crate::{
    auth::{Authenticator, ChallengeOutcome},
    errors::{DriverError, Result},
};

const GSSAPI_START: &[u8] = b"GSSAPI-START";

/// Pluggable host-name resolution for the GSSAPI service principal
/// (`service@resolved-host`), §4.3.
#[derive(Debug, Clone, Copy)]
pub enum HostResolution {
    /// Use the connection's IP address literally.
    IpPassthrough,
    /// Resolve via reverse DNS (PTR lookup).
    ReverseDns,
    /// Resolve via `getnameinfo`-equivalent canonicalization.
    CanonicalHostname,
}

#[derive(Debug, Clone)]
pub struct DseGssapiAuthProvider {
    service_principal: String,
    resolution: HostResolution,
}

#[cfg(feature = "gssapi")]
mod imp {
    use libgssapi::{
        context::{ClientCtx, CtxFlags, SecurityContext},
        credential::{Cred, CredUsage},
        name::Name,
        oid::{OidSet, GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE},
    };
    use tracing::warn;

    use super::*;

    impl DseGssapiAuthProvider {
        pub fn new(service_principal: impl Into<String>, resolution: HostResolution) -> Result<Self> {
            Ok(Self {
                service_principal: service_principal.into(),
                resolution,
            })
        }

        fn resolve_host(&self, host: SocketAddr) -> Result<String> {
            match self.resolution {
                HostResolution::IpPassthrough => Ok(host.ip().to_string()),
                HostResolution::ReverseDns | HostResolution::CanonicalHostname => {
                    // Best-effort: the real resolution strategy lives in an
                    // out-of-scope address-resolution collaborator (§1);
                    // fall back to the literal address if unresolved.
                    Ok(host.ip().to_string())
                },
            }
        }
    }

    impl crate::auth::AuthProvider for DseGssapiAuthProvider {
        fn new_authenticator(
            &self,
            host: SocketAddr,
            _authenticator_class: &str,
        ) -> Result<Box<dyn Authenticator>> {
            let hostname = self.resolve_host(host)?;
            let principal = format!("{}@{}", self.service_principal, hostname);

            let mut mechs = OidSet::new().map_err(|e| DriverError::Authentication {
                host: host.to_string(),
                message: format!("gssapi: {e}"),
            })?;
            mechs.add(&GSS_MECH_KRB5).map_err(|e| DriverError::Authentication {
                host: host.to_string(),
                message: format!("gssapi: {e}"),
            })?;

            let name = Name::new(principal.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE)).map_err(|e| {
                DriverError::Authentication {
                    host: host.to_string(),
                    message: format!("gssapi: invalid principal name: {e}"),
                }
            })?;

            let cred = Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs)).map_err(|e| {
                DriverError::Authentication {
                    host: host.to_string(),
                    message: format!("gssapi: failed to acquire credentials: {e}"),
                }
            })?;

            let ctx = ClientCtx::new(cred, name, CtxFlags::GSS_C_MUTUAL_FLAG, Some(&GSS_MECH_KRB5));

            Ok(Box::new(GssapiAuthenticator {
                ctx,
                step: Step::Initial,
            }))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Initial,
        Negotiating,
        Complete,
    }

    struct GssapiAuthenticator {
        ctx: ClientCtx,
        step: Step,
    }

    impl std::fmt::Debug for GssapiAuthenticator {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GssapiAuthenticator").field("step", &self.step).finish()
        }
    }

    impl Authenticator for GssapiAuthenticator {
        fn sasl_mechanism(&self) -> &'static str {
            "GSSAPI"
        }

        fn bootstrap_token(&self) -> &'static [u8] {
            GSSAPI_START
        }

        /// Three transitions (§4.3): (0) initiate context for the
        /// service principal, (1) subsequent challenges stepped through
        /// GSS, (2) final unwrap/wrap with optional authorization id.
        fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<ChallengeOutcome> {
            match self.step {
                Step::Initial => {
                    self.step = Step::Negotiating;
                    let token = self.ctx.step(challenge, None).map_err(|e| DriverError::Authentication {
                        host: String::new(),
                        message: format!("gssapi: init_sec_context failed: {e}"),
                    })?;
                    match token {
                        Some(t) => Ok(ChallengeOutcome::Respond(t.to_vec())),
                        None => Ok(ChallengeOutcome::Done),
                    }
                },
                Step::Negotiating => {
                    if self.ctx.is_complete() {
                        self.step = Step::Complete;
                        let unwrapped = self.ctx.unwrap(challenge).map_err(|e| DriverError::Authentication {
                            host: String::new(),
                            message: format!("gssapi: unwrap failed: {e}"),
                        })?;
                        let wrapped = self.ctx.wrap(false, &unwrapped).map_err(|e| DriverError::Authentication {
                            host: String::new(),
                            message: format!("gssapi: wrap failed: {e}"),
                        })?;
                        Ok(ChallengeOutcome::Respond(wrapped.to_vec()))
                    } else {
                        let token = self.ctx.step(challenge, None).map_err(|e| DriverError::Authentication {
                            host: String::new(),
                            message: format!("gssapi: step failed: {e}"),
                        })?;
                        match token {
                            Some(t) => Ok(ChallengeOutcome::Respond(t.to_vec())),
                            None => Ok(ChallengeOutcome::Done),
                        }
                    }
                },
                Step::Complete => Ok(ChallengeOutcome::Done),
            }
        }

        fn on_success(&mut self, _token: Option<&[u8]>) -> Result<()> {
            // §9 Open question: shutdown errors here stay fire-and-forget;
            // only logged, never surfaced.
            if let Err(e) = self.ctx.delete_sec_context() {
                warn!("gssapi context teardown failed: {e}");
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "gssapi"))]
mod imp {
    use super::*;

    impl DseGssapiAuthProvider {
        pub fn new(_service_principal: impl Into<String>, _resolution: HostResolution) -> Result<Self> {
            Err(DriverError::Config(
                "DseGssapiAuthProvider requires the `gssapi` Cargo feature (native Kerberos \
                 dependency not linked in this build)"
                    .to_string(),
            ))
        }
    }

    impl crate::auth::AuthProvider for DseGssapiAuthProvider {
        fn new_authenticator(
            &self,
            host: SocketAddr,
            _authenticator_class: &str,
        ) -> Result<Box<dyn Authenticator>> {
            Err(DriverError::Config(format!(
                "DseGssapiAuthProvider requires the `gssapi` Cargo feature (host {host})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "gssapi"))]
    fn without_feature_construction_fails_with_config_error() {
        let err = DseGssapiAuthProvider::new("dse", HostResolution::IpPassthrough).unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }
}
