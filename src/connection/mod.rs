// SPDX-License-Identifier: Apache-2.0

//! Connection & pool manager, Connection half (§4.2).
//!
//! One [`Connection`] owns exactly one TCP socket and multiplexes many
//! concurrent `send()` calls over it via stream-ids, mirroring the
//! teacher's `ClientConnection` (split read/write halves behind
//! `Mutex`, a per-request pending table, a `CancellationToken` for
//! shutdown) but keyed by a signed stream-id instead of an iSCSI ITT,
//! and with a coalescing writer task instead of one `write_all` per
//! request.

pub mod compression;
pub mod stream_id;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU32, AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    errors::{DriverError, Result},
    protocol::{
        frame::{Direction, FrameDecoder, FrameFlags, encode_frame},
        messages::{Request, RequestBody, Response, startup},
        opcode::Opcode,
        version::ProtocolVersion,
    },
};

/// `Init -> Starting -> Authenticating -> Ready -> Defunct/Closed`
/// (§4.2 "State machine"). Transitions are linear; `Ready` is the only
/// state accepting user requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Starting = 1,
    Authenticating = 2,
    Ready = 3,
    Defunct = 4,
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Starting,
            2 => Self::Authenticating,
            3 => Self::Ready,
            4 => Self::Defunct,
            _ => Self::Closed,
        }
    }
}

/// Tunable socket/pooling knobs this Connection enforces directly
/// (§6 `socketOptions`/`pooling`).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub tcp_nodelay: bool,
    pub coalescing_threshold: usize,
    pub defunct_read_timeout_threshold: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(12),
            heartbeat_interval: Duration::from_secs(30),
            tcp_nodelay: true,
            coalescing_threshold: 8192,
            defunct_read_timeout_threshold: 64,
        }
    }
}

struct PendingEntry {
    tx: oneshot::Sender<Result<Response>>,
    deadline: Instant,
}

/// One multiplexed socket to one [`Host`](crate::host::Host) (§3
/// "Connection").
#[derive(Debug)]
pub struct Connection {
    pub host: SocketAddr,
    writer_tx: mpsc::UnboundedSender<Bytes>,
    pending: DashMap<i16, PendingEntry>,
    stream_alloc: stream_id::StreamIdAllocator,
    version: ProtocolVersion,
    state: AtomicU8,
    /// Milliseconds since UNIX epoch of the last frame this Connection
    /// wrote, consulted by the heartbeat task (§4.2 "Heartbeat").
    last_send_millis: AtomicI64,
    /// Consecutive client-timeout count; at
    /// `defunctReadTimeoutThreshold` the Connection closes itself
    /// eagerly (§4.2 "Defunct threshold").
    timeout_streak: AtomicU32,
    in_flight: AtomicUsize,
    config: ConnectionConfig,
    cancel: CancellationToken,
    /// EVENT frames (stream-id -1) are forwarded here instead of the
    /// pending table (§4.2); `None` on a pool connection that never
    /// registered for events.
    event_tx: std::sync::OnceLock<mpsc::UnboundedSender<crate::protocol::messages::event::EventBody>>,
}

impl Connection {
    /// Opens the TCP socket and starts the read/write/heartbeat tasks.
    /// The Connection starts in `Init`; callers must drive
    /// [`Connection::startup`] before `send()` will accept requests.
    pub async fn connect(
        host: SocketAddr,
        version: ProtocolVersion,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| {
                DriverError::socket(Some(host), std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout"))
            })?
            .map_err(|e| DriverError::socket(Some(host), e))?;
        stream.set_nodelay(config.tcp_nodelay).ok();

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            host,
            writer_tx,
            pending: DashMap::new(),
            stream_alloc: stream_id::StreamIdAllocator::new(version),
            version,
            state: AtomicU8::new(ConnectionState::Init as u8),
            last_send_millis: AtomicI64::new(0),
            timeout_streak: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            config,
            cancel: CancellationToken::new(),
            event_tx: std::sync::OnceLock::new(),
        });

        tokio::spawn(writer_task(write_half, writer_rx, conn.cancel.clone(), conn.config.coalescing_threshold));

        let reader = conn.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop(read_half).await {
                debug!(host = %reader.host, "connection read loop exited: {e}");
            }
            reader.fail_all_pending(DriverError::socket(
                Some(reader.host),
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection closed"),
            ));
            reader.state.store(ConnectionState::Closed as u8, Ordering::Release);
        });

        let heartbeat = conn.clone();
        tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stream_capacity(&self) -> usize {
        self.stream_alloc.capacity()
    }

    pub fn register_event_sink(&self, tx: mpsc::UnboundedSender<crate::protocol::messages::event::EventBody>) {
        let _ = self.event_tx.set(tx);
    }

    /// Startup sequence (§4.2): STARTUP, optional AUTHENTICATE driven
    /// by `auth_provider`, optional REGISTER (by the caller, after this
    /// returns), optional `USE <keyspace>`.
    pub async fn startup(
        self: &Arc<Self>,
        cql_version: &str,
        compression: Option<&str>,
        auth_provider: &dyn crate::auth::AuthProvider,
        keyspace: Option<&str>,
    ) -> Result<()> {
        self.state.store(ConnectionState::Starting as u8, Ordering::Release);
        let startup_msg = Request::Startup(startup::Startup::new(cql_version, compression));
        let response = self.raw_send(startup_msg, self.config.read_timeout, None).await?;

        match response {
            Response::Ready => {},
            Response::Authenticate(auth) => {
                self.state.store(ConnectionState::Authenticating as u8, Ordering::Release);
                self.drive_authentication(auth_provider, &auth.authenticator_class).await?;
            },
            other => {
                return Err(DriverError::protocol(format!("unexpected STARTUP response: {other:?}")));
            },
        }

        self.state.store(ConnectionState::Ready as u8, Ordering::Release);

        if let Some(ks) = keyspace {
            let query = crate::protocol::messages::query::QueryMessage::new(
                format!("USE {ks}"),
                crate::protocol::messages::query::QueryParameters::default(),
            );
            self.send(Request::Query(query)).await?;
        }

        Ok(())
    }

    async fn drive_authentication(
        self: &Arc<Self>,
        auth_provider: &dyn crate::auth::AuthProvider,
        authenticator_class: &str,
    ) -> Result<()> {
        let mut authenticator = auth_provider.new_authenticator(self.host, authenticator_class)?;
        let token = authenticator.initial_response(authenticator_class)?;
        let mut response = self
            .raw_send(
                Request::AuthResponse(startup::AuthResponse { token }),
                self.config.read_timeout,
                None,
            )
            .await?;

        loop {
            match response {
                Response::AuthSuccess(success) => {
                    if let Err(e) = authenticator.on_success(success.token.as_deref()) {
                        // §9 open question: fire-and-forget, log only.
                        warn!(host = %self.host, "authenticator on_success reported an error: {e}");
                    }
                    return Ok(());
                },
                Response::AuthChallenge(challenge) => {
                    match authenticator.evaluate_challenge(&challenge.token)? {
                        crate::auth::ChallengeOutcome::Respond(token) => {
                            response = self
                                .raw_send(
                                    Request::AuthResponse(startup::AuthResponse { token }),
                                    self.config.read_timeout,
                                    None,
                                )
                                .await?;
                        },
                        crate::auth::ChallengeOutcome::Done => {
                            return Ok(());
                        },
                    }
                },
                other => {
                    return Err(DriverError::protocol(format!("unexpected auth response: {other:?}")));
                },
            }
        }
    }

    /// Send a request; accepted only while `Ready` (§4.2 "Ready is the
    /// only state in which user requests are accepted").
    pub async fn send(self: &Arc<Self>, request: Request) -> Result<Response> {
        if self.state() != ConnectionState::Ready {
            return Err(DriverError::internal(format!(
                "send() attempted on a connection in state {:?}",
                self.state()
            )));
        }
        self.raw_send(request, self.config.read_timeout, None).await
    }

    /// Like [`Self::send`] but attaches a CUSTOM_PAYLOAD body (§6 DSE
    /// extensions: continuous paging options, Insights RPC arguments).
    pub async fn send_with_payload(
        self: &Arc<Self>,
        request: Request,
        custom_payload: &HashMap<String, Vec<u8>>,
    ) -> Result<Response> {
        if self.state() != ConnectionState::Ready {
            return Err(DriverError::internal(format!(
                "send() attempted on a connection in state {:?}",
                self.state()
            )));
        }
        self.raw_send(request, self.config.read_timeout, Some(custom_payload)).await
    }

    /// Like [`Self::send`] but callable from any state; used internally
    /// for the STARTUP/AUTHENTICATE handshake.
    async fn raw_send(
        self: &Arc<Self>,
        request: Request,
        timeout: Duration,
        custom_payload: Option<&HashMap<String, Vec<u8>>>,
    ) -> Result<Response> {
        if self.state() == ConnectionState::Closed || self.state() == ConnectionState::Defunct {
            return Err(DriverError::socket(
                Some(self.host),
                std::io::Error::new(std::io::ErrorKind::NotConnected, "connection is closed"),
            ));
        }

        let stream = self
            .stream_alloc
            .allocate()
            .ok_or(DriverError::BusyConnection)?;

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.pending.insert(stream, PendingEntry { tx, deadline });
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        let mut flags = FrameFlags::empty();
        let mut body = BytesMut::new();
        if let Some(payload) = custom_payload {
            flags |= FrameFlags::CUSTOM_PAYLOAD;
            crate::protocol::primitives::write_bytes_map(&mut body, payload);
        }
        if let Err(e) = request.encode_body(self.version, &mut body) {
            self.complete(stream);
            return Err(e);
        }
        let frame = encode_frame(
            self.version,
            Direction::Request,
            flags,
            stream,
            request.opcode(),
            &body,
        );

        if self.writer_tx.send(frame).is_err() {
            self.complete(stream);
            return Err(DriverError::socket(
                Some(self.host),
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer task gone"),
            ));
        }
        self.touch_last_send();

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => {
                self.timeout_streak.store(0, Ordering::Release);
                result
            },
            Ok(Err(_canceled)) => Err(DriverError::socket(
                Some(self.host),
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection closed while pending"),
            )),
            Err(_elapsed) => {
                self.complete(stream);
                let streak = self.timeout_streak.fetch_add(1, Ordering::AcqRel) + 1;
                if streak >= self.config.defunct_read_timeout_threshold {
                    warn!(host = %self.host, streak, "defunct threshold reached, closing connection");
                    self.mark_defunct();
                }
                Err(DriverError::ClientTimeout { host: self.host })
            },
        }
    }

    fn complete(&self, stream: i16) {
        self.pending.remove(&stream);
        self.stream_alloc.release(stream);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn touch_last_send(&self) {
        self.last_send_millis.store(now_millis(), Ordering::Release);
    }

    fn fail_all_pending(&self, err: DriverError) {
        let ids: Vec<i16> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(err.shallow_clone()));
            }
            self.stream_alloc.release(id);
        }
        self.in_flight.store(0, Ordering::Release);
    }

    fn mark_defunct(&self) {
        self.state.store(ConnectionState::Defunct as u8, Ordering::Release);
        self.cancel.cancel();
        self.fail_all_pending(DriverError::socket(
            Some(self.host),
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connection defunct"),
        ));
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state(), ConnectionState::Closed | ConnectionState::Defunct)
    }

    /// Cancels pending requests and stops the background tasks; does
    /// not wait for in-flight frames (§5 "Client `shutdown`").
    pub fn close(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
        self.fail_all_pending(DriverError::ClientClosed);
    }

    async fn read_loop(self: &Arc<Self>, mut read_half: OwnedReadHalf) -> Result<()> {
        let mut decoder = FrameDecoder::new();
        let mut scratch = vec![0u8; 64 * 1024];
        let mut negotiated = self.version;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let n = read_half
                .read(&mut scratch)
                .await
                .map_err(|e| DriverError::socket(Some(self.host), e))?;
            if n == 0 {
                return Err(DriverError::socket(
                    Some(self.host),
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed connection"),
                ));
            }
            decoder.feed(&scratch[..n]);

            loop {
                match decoder.try_decode(negotiated) {
                    Ok(Some((header, body))) => {
                        negotiated = header.version;
                        self.dispatch_frame(header.stream, header.opcode, body);
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(host = %self.host, "protocol error, closing connection: {e}");
                        return Err(e);
                    },
                }
            }
        }
    }

    fn dispatch_frame(self: &Arc<Self>, stream: i16, opcode: Opcode, body: Bytes) {
        if stream == -1 {
            self.deliver_event(body);
            return;
        }

        let Some((_, entry)) = self.pending.remove(&stream) else {
            trace!(host = %self.host, stream, "response for unknown/expired stream id, discarding");
            return;
        };
        self.stream_alloc.release(stream);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let decoded = match Response::decode(opcode, self.version, body) {
            Ok(Response::Error(server_error)) => Err(DriverError::Response(Box::new(server_error))),
            Ok(response) => Ok(response),
            Err(e) => Err(e),
        };
        let _ = entry.tx.send(decoded);
    }

    fn deliver_event(&self, body: Bytes) {
        let mut buf = body;
        match crate::protocol::messages::event::EventBody::decode(&mut buf) {
            Ok(event) => {
                if let Some(tx) = self.event_tx.get() {
                    let _ = tx.send(event);
                }
            },
            Err(e) => warn!(host = %self.host, "failed to decode EVENT frame: {e}"),
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval / 2);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {},
            }
            if self.is_closed() {
                return;
            }
            if self.state() != ConnectionState::Ready {
                continue;
            }
            let idle_for = now_millis() - self.last_send_millis.load(Ordering::Acquire);
            if idle_for < self.config.heartbeat_interval.as_millis() as i64 {
                continue;
            }
            debug!(host = %self.host, "sending heartbeat OPTIONS frame");
            if let Err(e) = self.send(Request::Options(startup::Options)).await {
                warn!(host = %self.host, "heartbeat failed: {e}");
            }
        }
    }
}

fn now_millis() -> i64 {
    // `Instant` has no epoch; a monotonic millisecond counter since
    // process start is all the heartbeat idle check needs.
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(std::time::Instant::now);
    start.elapsed().as_millis() as i64
}

/// Write-coalescing task (§4.2 "The write path coalesces bytes until
/// either a configurable byte threshold is reached or the event loop
/// yields"). Drains as many already-queued frames as are immediately
/// available (bounded by `coalescing_threshold` bytes) before issuing
/// one `write_all`.
async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    coalescing_threshold: usize,
) {
    let mut batch = BytesMut::new();
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => return,
            },
        };
        batch.extend_from_slice(&first);

        // Keep batching while more frames are already queued, up to
        // the configured threshold (§6 `socketOptions.coalescingThreshold`);
        // `try_recv` never yields so this loop only drains what was
        // ready "for free".
        while batch.len() < coalescing_threshold {
            match rx.try_recv() {
                Ok(more) => batch.extend_from_slice(&more),
                Err(_) => break,
            }
        }

        if let Err(e) = write_half.write_all(&batch).await {
            warn!("connection write failed: {e}");
            return;
        }
        batch.clear();
    }
}
