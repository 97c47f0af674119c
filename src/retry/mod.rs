// SPDX-License-Identifier: Apache-2.0

//! Retry decisions and speculative execution policy (§4.7).
//!
//! This module only *decides*; the Request Handler (`request/`) is the
//! component that actually retries, moves host, or spawns a
//! speculative attempt. Keeping the split this way lets the idempotence
//! gate live above the policy call, matching §8's testable property
//! that a non-idempotent write-timeout never reaches the policy.

use std::time::Duration;

use crate::protocol::primitives::Consistency;

/// What the Request Handler should do next after a failed attempt
/// (§4.7 "Retry decisions").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySameHost { consistency: Option<Consistency> },
    RetryNextHost { consistency: Option<Consistency> },
    /// Return an empty/void result to the caller rather than an error.
    Ignore,
    Rethrow,
}

/// Context handed to the policy for one failed attempt (§4.7: "context
/// (consistency, received/required, data-present, nb-retries)").
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    pub consistency: Consistency,
    pub received: i32,
    pub block_for: i32,
    pub data_present: bool,
    pub retry_count: u32,
    pub is_idempotent: bool,
}

pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn on_unavailable(&self, ctx: &RetryContext) -> RetryDecision;
    fn on_read_timeout(&self, ctx: &RetryContext) -> RetryDecision;
    /// Only ever invoked for idempotent requests — see
    /// [`decide_for_write_timeout`].
    fn on_write_timeout(&self, ctx: &RetryContext) -> RetryDecision;
    /// Client-side socket error or client timeout, distinct from a
    /// server-reported `ReadTimeout`/`WriteTimeout` (§4.7 "Client
    /// timeout"). Only ever invoked for idempotent requests — see
    /// [`decide_for_request_error`].
    fn on_request_error(&self, ctx: &RetryContext) -> RetryDecision;
}

/// Idempotence gate (§4.7, §8): non-idempotent requests rethrow
/// immediately on write-timeout without consulting the policy.
pub fn decide_for_write_timeout(policy: &dyn RetryPolicy, ctx: &RetryContext) -> RetryDecision {
    if !ctx.is_idempotent {
        return RetryDecision::Rethrow;
    }
    policy.on_write_timeout(ctx)
}

/// Idempotence gate (§4.7, §8): non-idempotent requests rethrow
/// immediately on a client-side request error without consulting the
/// policy.
pub fn decide_for_request_error(policy: &dyn RetryPolicy, ctx: &RetryContext) -> RetryDecision {
    if !ctx.is_idempotent {
        return RetryDecision::Rethrow;
    }
    policy.on_request_error(ctx)
}

/// Whether a request is eligible for speculative execution at all
/// (§4.7: "not speculatively executed" for non-idempotent requests).
pub fn speculation_allowed(is_idempotent: bool) -> bool {
    is_idempotent
}

/// The default policy, modeled on the driver family's standard
/// `DefaultRetryPolicy`: retry once on the same host when there is a
/// chance more data has since arrived, retry write-timeouts and
/// request-errors on idempotent requests, give up otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn on_unavailable(&self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count == 0 {
            RetryDecision::RetryNextHost { consistency: None }
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_read_timeout(&self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count == 0 && ctx.received >= ctx.block_for && !ctx.data_present {
            RetryDecision::RetrySameHost { consistency: None }
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_write_timeout(&self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count == 0 {
            RetryDecision::RetrySameHost { consistency: None }
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_request_error(&self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count == 0 {
            RetryDecision::RetryNextHost { consistency: None }
        } else {
            RetryDecision::Rethrow
        }
    }
}

/// A policy that always rethrows; useful as a building block for
/// per-profile overrides that only want retries on specific error
/// kinds (constructed directly rather than via a fallthrough chain).
#[derive(Debug, Default, Clone, Copy)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn on_unavailable(&self, _ctx: &RetryContext) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_read_timeout(&self, _ctx: &RetryContext) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_write_timeout(&self, _ctx: &RetryContext) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_request_error(&self, _ctx: &RetryContext) -> RetryDecision {
        RetryDecision::Rethrow
    }
}

/// §4.7 "Speculative execution": after `delay`, spawn a parallel
/// attempt on the next host, up to `max_executions` total attempts.
pub trait SpeculativeExecutionPolicy: Send + Sync + std::fmt::Debug {
    fn delay(&self) -> Duration;
    fn max_executions(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeculativeExecutionPolicy {
    pub delay: Duration,
    pub max_executions: usize,
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn delay(&self) -> Duration {
        self.delay
    }

    fn max_executions(&self) -> usize {
        self.max_executions
    }
}

/// No speculative execution at all — the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeculativeExecutionPolicy;

impl SpeculativeExecutionPolicy for NoSpeculativeExecutionPolicy {
    fn delay(&self) -> Duration {
        Duration::MAX
    }

    fn max_executions(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ctx(is_idempotent: bool) -> RetryContext {
        RetryContext {
            consistency: Consistency::Quorum,
            received: 0,
            block_for: 1,
            data_present: false,
            retry_count: 0,
            is_idempotent,
        }
    }

    #[derive(Debug, Default)]
    struct CountingPolicy {
        write_timeout_calls: AtomicUsize,
        request_error_calls: AtomicUsize,
    }

    impl RetryPolicy for CountingPolicy {
        fn on_unavailable(&self, _ctx: &RetryContext) -> RetryDecision {
            RetryDecision::Rethrow
        }

        fn on_read_timeout(&self, _ctx: &RetryContext) -> RetryDecision {
            RetryDecision::Rethrow
        }

        fn on_write_timeout(&self, _ctx: &RetryContext) -> RetryDecision {
            self.write_timeout_calls.fetch_add(1, Ordering::SeqCst);
            RetryDecision::RetrySameHost { consistency: None }
        }

        fn on_request_error(&self, _ctx: &RetryContext) -> RetryDecision {
            self.request_error_calls.fetch_add(1, Ordering::SeqCst);
            RetryDecision::RetryNextHost { consistency: None }
        }
    }

    #[test]
    fn non_idempotent_write_timeout_never_consults_policy() {
        let policy = CountingPolicy::default();
        let decision = decide_for_write_timeout(&policy, &ctx(false));
        assert_eq!(decision, RetryDecision::Rethrow);
        assert_eq!(policy.write_timeout_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn idempotent_write_timeout_consults_policy() {
        let policy = CountingPolicy::default();
        let decision = decide_for_write_timeout(&policy, &ctx(true));
        assert_eq!(decision, RetryDecision::RetrySameHost { consistency: None });
        assert_eq!(policy.write_timeout_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_idempotent_request_error_never_consults_policy() {
        let policy = CountingPolicy::default();
        let decision = decide_for_request_error(&policy, &ctx(false));
        assert_eq!(decision, RetryDecision::Rethrow);
        assert_eq!(policy.request_error_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_policy_retries_unavailable_once() {
        let policy = DefaultRetryPolicy;
        assert_eq!(
            policy.on_unavailable(&ctx(true)),
            RetryDecision::RetryNextHost { consistency: None }
        );
        let second = RetryContext { retry_count: 1, ..ctx(true) };
        assert_eq!(policy.on_unavailable(&second), RetryDecision::Rethrow);
    }

    #[test]
    fn speculation_not_allowed_for_non_idempotent() {
        assert!(!speculation_allowed(false));
        assert!(speculation_allowed(true));
    }
}
