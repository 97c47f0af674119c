// SPDX-License-Identifier: Apache-2.0

//! Control Connection (§4.9): the single connection responsible for
//! discovering cluster topology, keeping the [`HostRegistry`] and
//! [`TokenRing`] current, and polling for schema agreement. Every
//! other component only ever reads what this module writes.

pub mod rows;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthProvider,
    cfg::config::ClusterConfig,
    connection::{Connection, ConnectionConfig},
    control::rows::{first_row, for_each_row, row_endpoint, SystemRow},
    errors::{DriverError, Result},
    host::{Host, HostRegistry},
    pool::ReconnectionPolicy,
    protocol::{
        messages::{
            event::{EventBody, SchemaChangeTarget, StatusChangeType, TopologyChangeType},
            query::{QueryMessage, QueryParameters},
            register::Register,
            result::ResultBody,
            Request, Response,
        },
        primitives::Consistency,
        version::ProtocolVersion,
    },
    token::{ReplicationStrategy, Token, TokenRing},
};

const LOCAL_QUERY: &str = "SELECT rpc_address, data_center, rack, release_version, dse_version, \
     tokens, schema_version, host_id FROM system.local";
const PEERS_QUERY: &str = "SELECT peer, rpc_address, data_center, rack, release_version, \
     dse_version, tokens, schema_version, host_id FROM system.peers";

/// §4.9 "polls every ~500ms until agreement or the configured timeout".
const SCHEMA_AGREEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Discovers and maintains cluster topology from a single upstream
/// connection. Holds the authoritative write access to [`HostRegistry`]
/// and [`TokenRing`] — every other component only reads snapshots.
pub struct ControlConnection {
    connection: AsyncMutex<Option<Arc<Connection>>>,
    current_host: SyncRwLock<Option<SocketAddr>>,
    hosts: Arc<HostRegistry>,
    ring: Arc<SyncRwLock<TokenRing>>,
    strategy: Arc<SyncRwLock<ReplicationStrategy>>,
    config: Arc<ClusterConfig>,
    auth_provider: Arc<dyn AuthProvider>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    cancel: CancellationToken,
    /// Debounces rapid-fire SCHEMA_CHANGE events (§4.9 "schema-refresh
    /// debounce") into a single trailing refresh.
    refresh_generation: std::sync::atomic::AtomicU64,
}

impl ControlConnection {
    /// Bootstraps over `config.contact_points`, trying each in turn and
    /// downgrading the protocol version on a mismatch (§4.9 "downgrade
    /// ladder"). On success, populates the registry/ring and spawns the
    /// background event-processing task.
    pub async fn bootstrap(
        config: Arc<ClusterConfig>,
        hosts: Arc<HostRegistry>,
        ring: Arc<SyncRwLock<TokenRing>>,
        strategy: Arc<SyncRwLock<ReplicationStrategy>>,
        auth_provider: Arc<dyn AuthProvider>,
        reconnection_policy: Arc<dyn ReconnectionPolicy>,
    ) -> Result<Arc<Self>> {
        let control = Arc::new(Self {
            connection: AsyncMutex::new(None),
            current_host: SyncRwLock::new(None),
            hosts,
            ring,
            strategy,
            config,
            auth_provider,
            reconnection_policy,
            cancel: CancellationToken::new(),
            refresh_generation: std::sync::atomic::AtomicU64::new(0),
        });

        control.connect_and_refresh(None).await?;
        control.clone().spawn_event_loop();
        if control.config.dse.insights_enabled {
            control.clone().report_insight();
        }
        Ok(control)
    }

    /// §6 DSE extensions: "Insights RPC (`CALL InsightsRpc.reportInsight(?)`)
    /// for telemetry", fired once after bootstrap when
    /// `dse.insights_enabled` is configured. Fire-and-forget: failures are
    /// logged, never surfaced (telemetry must never block connecting).
    fn report_insight(self: Arc<Self>) {
        tokio::spawn(async move {
            let conn = { self.connection.lock().await.clone() };
            let Some(conn) = conn else { return };
            let startup_message = serde_json::json!({
                "metadata": { "name": "driver.startup", "insightMappingId": "v1" },
                "data": { "driverName": "cassandra-native-driver-rs" },
            })
            .to_string();

            let request = Request::Query(QueryMessage::new(
                "CALL InsightsRpc.reportInsight(?)",
                QueryParameters {
                    consistency: Consistency::One,
                    values: crate::protocol::value::ValueList::Positional(vec![
                        crate::protocol::value::Value::Bytes(startup_message.into_bytes()),
                    ]),
                    ..QueryParameters::default()
                },
            ));

            if let Err(e) = conn.send(request).await {
                warn!("Insights RPC reportInsight failed (non-fatal): {e}");
            }
        });
    }

    /// Attempts every contact point (or, on reconnection, the previous
    /// control host first) at the configured max version, downgrading
    /// on each failure, until one connects and a topology refresh
    /// succeeds.
    async fn connect_and_refresh(&self, prefer: Option<SocketAddr>) -> Result<()> {
        let contact_points = self.config.resolve_contact_points().map_err(|e| DriverError::Config(e.to_string()))?;
        let mut candidates: Vec<SocketAddr> = Vec::with_capacity(contact_points.len() + 1);
        if let Some(addr) = prefer {
            candidates.push(addr);
        }
        for addr in contact_points {
            if !candidates.contains(&addr) {
                candidates.push(addr);
            }
        }

        let max_version = self
            .config
            .protocol_options
            .max_version
            .and_then(ProtocolVersion::from_raw)
            .unwrap_or(ProtocolVersion::HIGHEST);

        let mut errors = Vec::new();
        for addr in candidates {
            let mut version = max_version;
            loop {
                match self.try_connect(addr, version).await {
                    Ok(conn) => {
                        if let Err(e) = self.refresh_from(&conn).await {
                            warn!(host = %addr, "topology refresh after connect failed: {e}");
                            errors.push((addr, e.to_string()));
                            break;
                        }
                        *self.connection.lock().await = Some(conn);
                        *self.current_host.write() = Some(addr);
                        self.hosts.set_protocol_version(version);
                        info!(host = %addr, %version, "control connection established");
                        return Ok(());
                    },
                    Err(DriverError::Protocol(msg)) if version.downgrade().is_some() => {
                        debug!(host = %addr, %version, "protocol mismatch, downgrading: {msg}");
                        version = version.downgrade().expect("checked above");
                    },
                    Err(e) => {
                        errors.push((addr, e.to_string()));
                        break;
                    },
                }
            }
        }

        Err(DriverError::NoHostAvailable { errors })
    }

    async fn try_connect(&self, addr: SocketAddr, version: ProtocolVersion) -> Result<Arc<Connection>> {
        let conn_config: ConnectionConfig = self.config.socket_options.to_connection_config();
        let conn = Connection::connect(addr, version, conn_config).await?;
        conn.startup(
            "3.0.0",
            None,
            self.auth_provider.as_ref(),
            self.config.keyspace.as_deref(),
        )
        .await?;
        Ok(conn)
    }

    /// Queries `system.local`/`system.peers`, rebuilds the Host
    /// Registry and token ring from the rows (§4.9, §3 "Token Ring").
    async fn refresh_from(&self, conn: &Arc<Connection>) -> Result<()> {
        let local_rows = query_rows(conn, LOCAL_QUERY).await?;
        let peers_rows = query_rows(conn, PEERS_QUERY).await?;

        let port = self.config.protocol_options.port;

        if let Some(row) = first_row(&local_rows) {
            self.apply_row(&row, port, true);
        }
        for_each_row(&peers_rows, |row| self.apply_row(&row, port, false));

        self.rebuild_ring();
        Ok(())
    }

    fn apply_row(&self, row: &SystemRow<'_>, port: u16, is_local: bool) {
        let Some(address) = row_endpoint(row, port) else {
            warn!("system table row has no usable address, skipping");
            return;
        };
        let datacenter = row.text("data_center").unwrap_or_default();
        let rack = row.text("rack").unwrap_or_default();
        let host_id = row.uuid("host_id").unwrap_or_else(Uuid::nil);

        let mut host = Host::new(address, host_id, datacenter.clone(), rack);
        if let Some(release_version) = row.text("release_version") {
            host.release_version = release_version;
        }
        host.dse_version = row.text("dse_version");
        host.schema_version = row.uuid("schema_version");

        host.tokens = row
            .text_set("tokens")
            .iter()
            .filter_map(|raw| raw.parse::<i64>().ok())
            .map(Token)
            .collect();

        self.hosts.upsert_host(host);
        if is_local {
            debug!(%address, "local host row applied");
        }
    }

    /// Rebuilds the token ring from every Host currently in the
    /// registry (called after a topology refresh touches any host).
    fn rebuild_ring(&self) {
        let snapshot = self.hosts.snapshot();
        let owners = snapshot.hosts.values().flat_map(|host| {
            host.tokens.iter().map(move |t| (*t, host.address, host.datacenter.clone()))
        });
        self.ring.write().rebuild(owners);
    }

    /// §4.9 "registers for STATUS_CHANGE/TOPOLOGY_CHANGE/SCHEMA_CHANGE
    /// and drives Host Registry updates from them". Runs until the
    /// connection this control connection owns is closed or `shutdown`
    /// is called.
    fn spawn_event_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }

                let conn = { self.connection.lock().await.clone() };
                let Some(conn) = conn else {
                    return;
                };

                let (tx, mut rx) = mpsc::unbounded_channel::<EventBody>();
                conn.register_event_sink(tx);
                if let Err(e) = conn.send(Request::Register(Register::all())).await {
                    warn!("REGISTER failed on control connection: {e}");
                }

                loop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        event = rx.recv() => {
                            match event {
                                Some(event) => self.handle_event(event).await,
                                None => break,
                            }
                        }
                    }
                }

                if self.cancel.is_cancelled() {
                    return;
                }
                warn!("control connection event stream ended, reconnecting");
                self.reconnect().await;
            }
        });
    }

    async fn handle_event(&self, event: EventBody) {
        match event {
            EventBody::StatusChange { change, address } => {
                let addr = SocketAddr::new(address, self.config.protocol_options.port);
                if let Some(host) = self.hosts.host(addr) {
                    let up = matches!(change, StatusChangeType::Up);
                    if host.set_up(up) {
                        info!(%addr, up, "host status changed");
                    }
                }
            },
            EventBody::TopologyChange { change, address } => {
                let addr = SocketAddr::new(address, self.config.protocol_options.port);
                match change {
                    TopologyChangeType::NewNode => {
                        info!(%addr, "new node joined, scheduling topology refresh");
                        self.schedule_refresh();
                    },
                    TopologyChangeType::RemovedNode => {
                        info!(%addr, "node removed");
                        self.hosts.remove_host(addr);
                        self.rebuild_ring();
                    },
                }
            },
            EventBody::SchemaChange { target, keyspace, .. } => {
                debug!(?target, %keyspace, "schema change event, scheduling debounced refresh");
                if matches!(target, SchemaChangeTarget::Keyspace | SchemaChangeTarget::Table) {
                    self.schedule_refresh();
                }
            },
        }
    }

    /// Debounces bursts of topology/schema events into one trailing
    /// refresh a short delay after the last one observed (§4.9).
    fn schedule_refresh(self: &Arc<Self>) {
        let generation = self.refresh_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let control = self.clone();
        let delay = Duration::from_millis(self.config.refresh_schema_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if control.refresh_generation.load(std::sync::atomic::Ordering::SeqCst) != generation {
                return;
            }
            let conn = { control.connection.lock().await.clone() };
            if let Some(conn) = conn {
                if let Err(e) = control.refresh_from(&conn).await {
                    warn!("debounced topology refresh failed: {e}");
                    return;
                }
                control.rebuild_ring();
            }
        });
    }

    async fn reconnect(self: &Arc<Self>) {
        let preferred = *self.current_host.read();
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.connect_and_refresh(preferred).await {
                Ok(()) => {
                    self.rebuild_ring();
                    self.clone().spawn_event_loop();
                    return;
                },
                Err(e) => {
                    warn!("control connection reconnect attempt {attempt} failed: {e}");
                    let delay = self.reconnection_policy.next_delay(attempt);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// §4.9 "schema agreement": polls `system.local`/`system.peers`
    /// schema_version columns until every up host agrees or
    /// `max_schema_agreement_wait_seconds` elapses.
    pub async fn wait_for_schema_agreement(&self) -> Result<bool> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.protocol_options.max_schema_agreement_wait_seconds);

        loop {
            let conn = { self.connection.lock().await.clone() };
            let Some(conn) = conn else {
                return Err(DriverError::internal("schema agreement polled with no control connection"));
            };

            let local = query_rows(&conn, "SELECT schema_version FROM system.local").await?;
            let peers = query_rows(&conn, "SELECT schema_version FROM system.peers").await?;

            let mut versions = std::collections::HashSet::new();
            if let Some(row) = first_row(&local) {
                if let Some(v) = row.uuid("schema_version") {
                    versions.insert(v);
                }
            }
            for_each_row(&peers, |row| {
                if let Some(v) = row.uuid("schema_version") {
                    versions.insert(v);
                }
            });

            if versions.len() <= 1 {
                if let Some(v) = versions.into_iter().next() {
                    self.hosts.set_schema_digest(v);
                }
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SCHEMA_AGREEMENT_POLL_INTERVAL).await;
        }
    }

    /// Cancels the event loop and closes the underlying connection
    /// (§5 "Client `shutdown` ... closes the control connection").
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close();
        }
    }
}

async fn query_rows(conn: &Arc<Connection>, query: &str) -> Result<crate::protocol::messages::result::Rows> {
    let request = Request::Query(QueryMessage::new(
        query,
        QueryParameters { consistency: Consistency::One, ..QueryParameters::default() },
    ));
    match conn.send(request).await? {
        Response::Result(ResultBody::Rows(rows)) => Ok(rows),
        Response::Result(other) => Err(DriverError::protocol(format!(
            "expected Rows result from system table query, got {other:?}"
        ))),
        Response::Error(e) => Err(DriverError::Response(Box::new(e))),
        other => Err(DriverError::protocol(format!("unexpected response to system table query: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::result::{ColumnSpec, ColumnTypeId, ResultMetadata, RowsFlags};

    fn rows_with_columns(names: &[&str]) -> crate::protocol::messages::result::Rows {
        crate::protocol::messages::result::Rows {
            metadata: ResultMetadata {
                flags: RowsFlags::empty(),
                paging_state: None,
                columns: names
                    .iter()
                    .map(|n| ColumnSpec {
                        keyspace: None,
                        table: None,
                        name: n.to_string(),
                        type_id: ColumnTypeId(0x000D),
                    })
                    .collect(),
            },
            rows: Vec::new(),
        }
    }

    #[test]
    fn row_reader_looks_up_columns_by_name() {
        let rows = rows_with_columns(&["rpc_address", "data_center"]);
        assert!(rows.metadata.columns.iter().any(|c| c.name == "data_center"));
    }

    #[test]
    fn system_row_decodes_tokens_as_text_set() {
        let mut rows = rows_with_columns(&["tokens"]);
        let mut buf = bytes::BytesMut::new();
        buf.extend_from_slice(&2i32.to_be_bytes());
        let t1 = b"123";
        buf.extend_from_slice(&(t1.len() as i32).to_be_bytes());
        buf.extend_from_slice(t1);
        let t2 = b"456";
        buf.extend_from_slice(&(t2.len() as i32).to_be_bytes());
        buf.extend_from_slice(t2);
        rows.rows.push(vec![Some(buf.to_vec())]);

        let row = first_row(&rows).unwrap();
        assert_eq!(row.text_set("tokens"), vec!["123".to_string(), "456".to_string()]);
    }
}
