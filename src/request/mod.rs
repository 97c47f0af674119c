// SPDX-License-Identifier: Apache-2.0

//! Request Handler (§4.8): obtain a query plan, borrow a Connection
//! from each candidate host in turn, transparently prepare statements
//! that are unprepared or unknown on the chosen host, consult the
//! retry policy on failure, and race a speculative attempt on the next
//! host when the policy calls for it.

pub mod execution;

use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    balancing::{LoadBalancingPolicy, RoutingInfo},
    connection::Connection,
    errors::{DriverError, ErrorCode, Result, ServerError},
    host::{Host, HostRegistry},
    pool::Pool,
    prepared::{ClaimOutcome, PrepareKey, PreparedCache},
    protocol::messages::{
        execute::Execute,
        prepare::Prepare,
        query::{QueryMessage, QueryParameters},
        result::ResultBody,
        Request as WireRequest, Response,
    },
    request::execution::{Request, Statement},
    retry::{decide_for_request_error, decide_for_write_timeout, RetryContext, RetryDecision, RetryPolicy, SpeculativeExecutionPolicy},
};

/// Everything the Request Handler needs from the Cluster/Session layer,
/// bundled so `execute` can be called without threading six separate
/// arguments through every helper. Cheap to clone — every field is an
/// `Arc` — so a speculative lane can own one independently of its
/// siblings.
#[derive(Debug, Clone)]
pub struct ExecutionResources {
    pub hosts: Arc<HostRegistry>,
    pub pools: Arc<DashMap<SocketAddr, Arc<Pool>>>,
    pub balancer: Arc<dyn LoadBalancingPolicy>,
    pub prepared: Arc<PreparedCache>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub speculative: Arc<dyn SpeculativeExecutionPolicy>,
}

/// Runs the full algorithm for one logical request, including
/// speculative execution if the policy and the request's idempotence
/// both allow it.
pub async fn execute(resources: &ExecutionResources, request: &Request) -> Result<ResultBody> {
    let routing = RoutingInfo {
        keyspace: request.options.keyspace.clone(),
        routing_key: request.options.routing_key.clone(),
        preferred_host: request.options.preferred_host,
        is_idempotent: request.options.is_idempotent,
    };
    let snapshot = resources.hosts.snapshot();
    let plan: VecDeque<Arc<Host>> = resources.balancer.new_query_plan(&snapshot, &routing).collect();
    let hosts = Arc::new(Mutex::new(plan));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let max_executions = resources.speculative.max_executions();
    if !crate::retry::speculation_allowed(request.options.is_idempotent) || max_executions <= 1 {
        return run_lane(resources, request, &routing, hosts, errors).await;
    }

    speculate(resources, request, &routing, hosts, errors, max_executions).await
}

/// §4.7 "Speculative execution": stagger up to `max_executions` lanes
/// by the policy's delay; the first to finish wins and the rest are
/// aborted, discarding whatever they were waiting on.
async fn speculate(
    resources: &ExecutionResources,
    request: &Request,
    routing: &RoutingInfo,
    hosts: Arc<Mutex<VecDeque<Arc<Host>>>>,
    errors: Arc<Mutex<Vec<(SocketAddr, String)>>>,
    max_executions: usize,
) -> Result<ResultBody> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Result<ResultBody>>();
    let delay = resources.speculative.delay();
    let mut handles = Vec::with_capacity(max_executions);

    for i in 0..max_executions {
        let tx = tx.clone();
        let resources = resources.clone();
        let request = request.clone();
        let routing = routing.clone();
        let hosts = hosts.clone();
        let errors = errors.clone();
        let stagger = delay.saturating_mul(i as u32);
        handles.push(tokio::spawn(async move {
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            debug!(lane = i, "speculative execution lane starting");
            let result = run_lane(&resources, &request, &routing, hosts, errors).await;
            let _ = tx.send(result);
        }));
    }
    drop(tx);

    let outcome = rx.recv().await;
    for handle in handles {
        handle.abort();
    }
    outcome.unwrap_or_else(|| Err(DriverError::internal("all speculative lanes were aborted without a result")))
}

/// One lane: pop hosts off the shared plan until one succeeds, a
/// terminal error is hit, or the plan is exhausted.
async fn run_lane(
    resources: &ExecutionResources,
    request: &Request,
    routing: &RoutingInfo,
    hosts: Arc<Mutex<VecDeque<Arc<Host>>>>,
    errors: Arc<Mutex<Vec<(SocketAddr, String)>>>,
) -> Result<ResultBody> {
    loop {
        let host = hosts.lock().pop_front();
        let Some(host) = host else {
            return Err(DriverError::NoHostAvailable { errors: errors.lock().clone() });
        };

        match try_host(resources, request, routing, &host).await {
            AttemptOutcome::Success(body) => return Ok(body),
            AttemptOutcome::Terminal(e) => return Err(e),
            AttemptOutcome::NextHost(msg) => errors.lock().push((host.address, msg)),
        }
    }
}

enum AttemptOutcome {
    Success(ResultBody),
    Terminal(DriverError),
    NextHost(String),
}

/// Drives every same-host retry for one candidate host: borrow a
/// Connection, transparently PREPARE if needed, send, and loop while
/// the retry policy says `RetrySameHost`.
async fn try_host(
    resources: &ExecutionResources,
    request: &Request,
    routing: &RoutingInfo,
    host: &Arc<Host>,
) -> AttemptOutcome {
    let Some(pool) = resources.pools.get(&host.address).map(|p| p.clone()) else {
        return AttemptOutcome::NextHost("no pool open for this host".to_string());
    };
    let conn = match pool.borrow() {
        Ok(c) => c,
        Err(e) => return AttemptOutcome::NextHost(e.to_string()),
    };

    if let Statement::Prepared(key) = &request.statement {
        if let Err(e) = ensure_prepared(resources, &conn, host.address, key).await {
            return match e.is_recoverable() {
                true => AttemptOutcome::NextHost(e.to_string()),
                false => AttemptOutcome::Terminal(e),
            };
        }
    }

    let mut retry_count = 0u32;
    let mut already_reprepared = false;

    loop {
        let wire = match build_wire_request(resources, request) {
            Ok(w) => w,
            Err(e) => return AttemptOutcome::Terminal(e),
        };

        let send_result = match request.options.custom_payload() {
            Some(payload) => {
                match tokio::time::timeout(request.options.timeout, conn.send_with_payload(wire, &payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::ClientTimeout { host: host.address }),
                }
            },
            None => match tokio::time::timeout(request.options.timeout, conn.send(wire)).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::ClientTimeout { host: host.address }),
            },
        };

        match send_result {
            Ok(Response::Result(body)) => return AttemptOutcome::Success(body),
            Ok(other) => {
                return AttemptOutcome::Terminal(DriverError::protocol(format!(
                    "unexpected response to request: {other:?}"
                )));
            },
            Err(DriverError::Response(server_error)) => {
                if !already_reprepared && server_error.code == ErrorCode::Unprepared {
                    if let Statement::Prepared(key) = &request.statement {
                        if let Err(e) = reprepare(resources, &conn, host.address, key).await {
                            return AttemptOutcome::Terminal(e);
                        }
                        already_reprepared = true;
                        continue;
                    }
                }
                match decide_for_server_error(resources, &server_error, retry_count, request.options.is_idempotent) {
                    RetryDecision::RetrySameHost { .. } => {
                        retry_count += 1;
                        continue;
                    },
                    RetryDecision::RetryNextHost { .. } => {
                        return AttemptOutcome::NextHost(server_error.to_string());
                    },
                    RetryDecision::Ignore => return AttemptOutcome::Success(ResultBody::Void),
                    RetryDecision::Rethrow => return AttemptOutcome::Terminal(DriverError::Response(server_error)),
                }
            },
            Err(e @ (DriverError::ClientTimeout { .. } | DriverError::Socket { .. } | DriverError::BusyConnection)) => {
                let ctx = RetryContext {
                    consistency: request.options.consistency,
                    received: 0,
                    block_for: 0,
                    data_present: false,
                    retry_count,
                    is_idempotent: request.options.is_idempotent,
                };
                match decide_for_request_error(resources.retry_policy.as_ref(), &ctx) {
                    RetryDecision::RetrySameHost { .. } => {
                        retry_count += 1;
                        continue;
                    },
                    RetryDecision::Ignore => return AttemptOutcome::Success(ResultBody::Void),
                    RetryDecision::RetryNextHost { .. } | RetryDecision::Rethrow => {
                        return AttemptOutcome::NextHost(e.to_string());
                    },
                }
            },
            Err(e) => return AttemptOutcome::Terminal(e),
        }
    }
}

fn decide_for_server_error(
    resources: &ExecutionResources,
    se: &ServerError,
    retry_count: u32,
    is_idempotent: bool,
) -> RetryDecision {
    use crate::errors::ErrorDetail;

    if se.code.is_logical() {
        return RetryDecision::Rethrow;
    }

    match &se.detail {
        ErrorDetail::Unavailable { consistency, required, alive } => {
            let ctx = RetryContext {
                consistency: consistency_or_default(*consistency),
                received: *alive,
                block_for: *required,
                data_present: false,
                retry_count,
                is_idempotent,
            };
            resources.retry_policy.on_unavailable(&ctx)
        },
        ErrorDetail::ReadTimeout { consistency, received, block_for, data_present } => {
            let ctx = RetryContext {
                consistency: consistency_or_default(*consistency),
                received: *received,
                block_for: *block_for,
                data_present: *data_present,
                retry_count,
                is_idempotent,
            };
            resources.retry_policy.on_read_timeout(&ctx)
        },
        ErrorDetail::WriteTimeout { consistency, received, block_for, .. } => {
            let ctx = RetryContext {
                consistency: consistency_or_default(*consistency),
                received: *received,
                block_for: *block_for,
                data_present: false,
                retry_count,
                is_idempotent,
            };
            decide_for_write_timeout(resources.retry_policy.as_ref(), &ctx)
        },
        _ if se.code.is_recoverable() => {
            // Overloaded / IsBootstrapping / ServerError / *Failure: no
            // structured detail to hand the policy, so treat like a
            // request error rather than guessing at a retry context.
            if is_idempotent {
                RetryDecision::RetryNextHost { consistency: None }
            } else {
                RetryDecision::Rethrow
            }
        },
        _ => RetryDecision::Rethrow,
    }
}

fn consistency_or_default(raw: u16) -> crate::protocol::primitives::Consistency {
    crate::protocol::primitives::Consistency::from_raw(raw).unwrap_or(crate::protocol::primitives::Consistency::One)
}

/// Transparent prepare-before-execute (§4.5, §4.8): resolve the cache
/// entry for `key`, preparing it on *some* host if this is the first
/// caller to need it, then prepare it on `host` specifically if it
/// hasn't been seen there yet.
async fn ensure_prepared(
    resources: &ExecutionResources,
    conn: &Arc<Connection>,
    host: SocketAddr,
    key: &PrepareKey,
) -> Result<()> {
    let entry = match resources.prepared.claim(key) {
        ClaimOutcome::Cached(entry) => entry,
        ClaimOutcome::Wait(rx) => match rx.await {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DriverError::internal("prepared-cache waiter channel dropped")),
        },
        ClaimOutcome::YouPrepare => match send_prepare(conn, &key.query).await {
            Ok(wire) => {
                resources.prepared.resolve(key, Ok(wire));
                resources
                    .prepared
                    .get_cached(key)
                    .ok_or_else(|| DriverError::internal("prepared entry missing immediately after resolve"))?
            },
            Err(e) => {
                resources.prepared.resolve(key, Err(e.shallow_clone()));
                return Err(e);
            },
        },
    };

    if !entry.is_known_on(host) {
        send_prepare(conn, &key.query).await?;
        entry.mark_known(host);
    }
    Ok(())
}

async fn reprepare(resources: &ExecutionResources, conn: &Arc<Connection>, host: SocketAddr, key: &PrepareKey) -> Result<()> {
    send_prepare(conn, &key.query).await?;
    if let Some(entry) = resources.prepared.get_cached(key) {
        entry.mark_known(host);
    }
    Ok(())
}

async fn send_prepare(conn: &Arc<Connection>, query: &str) -> Result<crate::protocol::messages::result::Prepared> {
    match conn.send(WireRequest::Prepare(Prepare::new(query))).await? {
        Response::Result(ResultBody::Prepared(p)) => Ok(p),
        other => Err(DriverError::protocol(format!("unexpected response to PREPARE: {other:?}"))),
    }
}

fn build_wire_request(resources: &ExecutionResources, request: &Request) -> Result<WireRequest> {
    let parameters = QueryParameters {
        consistency: request.options.consistency,
        values: request.values.clone(),
        skip_metadata: false,
        page_size: request.options.page_size,
        paging_state: request.options.paging_state.clone(),
        serial_consistency: request.options.serial_consistency,
        default_timestamp: request.options.default_timestamp,
    };

    Ok(match &request.statement {
        Statement::Simple(query) => WireRequest::Query(QueryMessage::new(query.clone(), parameters)),
        Statement::Prepared(key) => {
            let entry = resources
                .prepared
                .get_cached(key)
                .ok_or_else(|| DriverError::internal("prepared statement vanished from cache mid-request"))?;
            WireRequest::Execute(Execute::new(entry.query_id.clone(), parameters))
        },
    })
}

#[cfg(test)]
mod tests {
    use dashmap::DashMap;

    use super::*;
    use crate::{
        errors::ErrorDetail,
        host::HostRegistry,
        protocol::primitives::Consistency,
        retry::{DefaultRetryPolicy, NoSpeculativeExecutionPolicy},
    };

    fn resources() -> ExecutionResources {
        ExecutionResources {
            hosts: Arc::new(HostRegistry::new()),
            pools: Arc::new(DashMap::new()),
            balancer: Arc::new(crate::balancing::RoundRobinPolicy::new()),
            prepared: Arc::new(PreparedCache::new(100)),
            retry_policy: Arc::new(DefaultRetryPolicy),
            speculative: Arc::new(NoSpeculativeExecutionPolicy),
        }
    }

    fn server_error(code: ErrorCode, detail: ErrorDetail) -> ServerError {
        ServerError { code, message: "test".to_string(), detail }
    }

    #[test]
    fn logical_errors_always_rethrow() {
        let res = resources();
        let se = server_error(ErrorCode::SyntaxError, ErrorDetail::None);
        assert_eq!(decide_for_server_error(&res, &se, 0, true), RetryDecision::Rethrow);
    }

    #[test]
    fn read_timeout_retries_same_host_once_when_data_missing() {
        let res = resources();
        let se = server_error(
            ErrorCode::ReadTimeout,
            ErrorDetail::ReadTimeout { consistency: 0x0004, received: 1, block_for: 1, data_present: false },
        );
        assert_eq!(
            decide_for_server_error(&res, &se, 0, true),
            RetryDecision::RetrySameHost { consistency: None }
        );
    }

    #[test]
    fn write_timeout_rethrows_for_non_idempotent_request() {
        let res = resources();
        let se = server_error(
            ErrorCode::WriteTimeout,
            ErrorDetail::WriteTimeout { consistency: 0x0004, received: 0, block_for: 1, write_type: "SIMPLE".into() },
        );
        assert_eq!(decide_for_server_error(&res, &se, 0, false), RetryDecision::Rethrow);
    }

    #[test]
    fn consistency_or_default_falls_back_on_unknown_raw_value() {
        assert_eq!(consistency_or_default(0xFFFF), Consistency::One);
        assert_eq!(consistency_or_default(0x0004), Consistency::Quorum);
    }
}
