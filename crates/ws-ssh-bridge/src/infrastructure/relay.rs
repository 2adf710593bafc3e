//! Per-session relay driver.
//!
//! [`run_relay`] owns one upgraded WebSocket and, once dialed, one backend TCP
//! stream.  Each session runs as a small group of Tokio tasks:
//!
//! - **Client reader**: pulls frames off the WebSocket.
//! - **Client writer**: sends the frames queued for the client.
//! - **Backend reader**: pulls byte chunks off the backend stream.
//! - **Backend writer**: writes the bytes queued for the backend, and
//!   half-closes it when asked.
//! - **Driver** (the task that called [`run_relay`]): owns the
//!   [`RelaySession`] state machine, the backend dial, the close-handshake
//!   deadline and the keepalive ticker.
//!
//! Readers report what they saw on one inbound channel.  The driver turns
//! each report into a [`SessionEvent`], and the [`SessionAction`]s it gets
//! back are queued to the writers without waiting on any socket.  A slow
//! endpoint only stalls the direction that writes to it; the other direction
//! keeps flowing.
//!
//! # Flow control
//!
//! Each direction has a window of [`FORWARD_WINDOW`] chunks.  A reader takes
//! one credit before each read, and the credit comes back once the chunk has
//! been written to the other endpoint or dropped by the state machine.  A
//! client that stops reading therefore stops backend reads after a bounded
//! amount of buffering, and TCP pushes back on the backend from there.
//!
//! Bytes within one direction keep their order: each direction has exactly
//! one reader, one FIFO queue and one writer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::application::{
    ClientClose, RelaySession, SessionAction, SessionEvent, SessionState, SessionStats,
};
use crate::domain::{BridgeConfig, BridgeError, SessionId};
use crate::infrastructure::backend_conn::{
    half_close, read_chunk, write_chunk, BackendConnection, READ_BUFFER_SIZE,
};

/// How long the client gets to answer our close frame before the session
/// treats the client endpoint as closed anyway.  The same bound applies to
/// draining the writers once the session is over.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Chunks in flight per direction between a reader and the opposite writer.
pub const FORWARD_WINDOW: usize = 32;

/// What a reader or writer task reports to the driver.
enum Inbound {
    /// One item from the client stream (`None` once it has ended).
    Client(Option<Result<WsMessage, WsError>>),
    BackendChunk(Vec<u8>),
    BackendEof,
    BackendReadFailed(std::io::Error),
    BackendWriteFailed(BridgeError),
    ClientSendFailed(BridgeError),
    CloseNotDelivered(WsError),
}

/// What woke the driver's select loop.
enum Wake {
    Dialed(Result<BackendConnection, BridgeError>),
    Inbound(Inbound),
    CloseTimeout,
    KeepaliveTick,
}

/// Work queued for the client writer.
enum ClientCommand {
    /// Backend bytes as one binary frame; returns a credit once sent.
    Data(Vec<u8>),
    /// A frame outside the forwarding window (handshake, ping).
    Control(WsMessage),
    Close(CloseFrame<'static>),
}

/// Work queued for the backend writer.
enum BackendCommand {
    Write(Vec<u8>),
    /// Write everything queued before this, then shut down the write side.
    Shutdown,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs one relay session to completion and returns its traffic counters.
///
/// `ws` must already have completed the WebSocket upgrade.  The backend dial
/// is issued immediately.  The function returns once both endpoints are
/// closed; it never returns an error because every failure is scoped to the
/// session and handled by the coupled-close path.
pub async fn run_relay<S>(ws: WebSocketStream<S>, id: SessionId, config: Arc<BridgeConfig>) -> SessionStats
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let backend_addr = config.backend_addr();

    // ── Step 1: Start the client tasks ────────────────────────────────────────
    //
    // Splitting the WebSocket lets the reader and the writer run in separate
    // tasks.  Both report to the driver on one unbounded channel; the credit
    // windows bound how many data chunks can sit in it.
    let (ws_tx, ws_rx) = ws.split();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let (client_tx, client_rx) = mpsc::unbounded_channel();

    // `Arc` because each window is shared by a reader task, a writer task
    // and the driver, which refunds credits for dropped chunks.
    let to_backend = Arc::new(Semaphore::new(FORWARD_WINDOW));
    let to_client = Arc::new(Semaphore::new(FORWARD_WINDOW));

    let client_reader = tokio::spawn(read_client(ws_rx, Arc::clone(&to_backend), inbound_tx.clone()));
    let client_writer = tokio::spawn(write_client(
        id,
        ws_tx,
        client_rx,
        Arc::clone(&to_client),
        inbound_tx.clone(),
    ));

    let mut session = RelaySession::new(id, config.handshake_message.clone());
    let mut io = RelayIo {
        id,
        inbound_tx,
        client_tx: Some(client_tx),
        client_reader,
        client_writer,
        close_deadline: None,
        backend: None,
        backend_flush: None,
        to_backend,
        to_client,
    };
    let mut keepalive = Keepalive::new(config.ping_interval, config.ping_timeout);

    // ── Step 2: Dial the backend ──────────────────────────────────────────────
    //
    // The dial is polled from the loop below instead of being awaited here,
    // so a client that goes away while the dial is pending ends the session
    // and drops the dial with it.
    debug!("session {id}: dialing backend at {backend_addr}");
    let dial = BackendConnection::connect(&backend_addr, config.dial_timeout);
    tokio::pin!(dial);

    // ── Step 3: Drive the state machine ───────────────────────────────────────
    while session.state() != SessionState::Closed {
        let connecting = session.state() == SessionState::Connecting;

        // `io` keeps a sender alive, so `recv()` never yields `None` here.
        let wake = tokio::select! {
            dialed = &mut dial, if connecting => Wake::Dialed(dialed),
            Some(inbound) = inbound_rx.recv() => Wake::Inbound(inbound),
            _ = sleep_until_deadline(io.close_deadline) => Wake::CloseTimeout,
            _ = keepalive.tick() => Wake::KeepaliveTick,
        };

        let event = match wake {
            Wake::Dialed(Ok(conn)) => {
                info!("session {id}: backend connection established ({backend_addr})");
                io.attach_backend(conn);
                Some(SessionEvent::BackendConnected)
            }
            Wake::Dialed(Err(e)) => {
                warn!("session {id}: {e}");
                Some(SessionEvent::BackendDialFailed(e.to_string()))
            }
            Wake::Inbound(inbound) => {
                if matches!(inbound, Inbound::Client(_)) {
                    keepalive.saw_traffic();
                }
                io.inbound_event(inbound)
            }
            Wake::CloseTimeout => {
                debug!("session {id}: client did not answer the close frame in time");
                io.close_deadline = None;
                io.client_reader.abort();
                Some(SessionEvent::ClientClosed)
            }
            Wake::KeepaliveTick => {
                let open = matches!(session.state(), SessionState::Connecting | SessionState::Active);
                if !open {
                    None
                } else if keepalive.expired() && io.client_reader_idle() {
                    warn!("session {id}: client keepalive timed out");
                    io.client_reader.abort();
                    Some(SessionEvent::ClientError("keepalive timeout".to_string()))
                } else {
                    io.queue_for_client(ClientCommand::Control(WsMessage::Ping(Vec::new())));
                    None
                }
            }
        };

        // Feed the event, and anything its actions cause, through the state
        // machine.  Chunks the session dropped never reach a writer, so their
        // credits are refunded here.
        let mut queue: VecDeque<SessionEvent> = event.into_iter().collect();
        while let Some(event) = queue.pop_front() {
            let before = session.stats();
            let actions = session.handle(event);
            io.refund_dropped(before, session.stats());

            for action in actions {
                if let Some(follow_up) = io.execute(action) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    // ── Step 4: Let the writers drain ─────────────────────────────────────────
    io.finish().await;

    let stats = session.stats();
    info!(
        "session {id}: closed: {} bytes to backend, {} bytes to client, {} frames dropped (client→backend), {} chunks dropped (backend→client)",
        stats.bytes_to_backend, stats.bytes_to_client, stats.dropped_to_backend, stats.dropped_to_client
    );
    stats
}

// ── Driver-side state ─────────────────────────────────────────────────────────

/// The backend tasks of a session that has dialed successfully.
struct BackendTasks {
    commands: mpsc::UnboundedSender<BackendCommand>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Handles to the session's tasks and queues, owned by the driver.
struct RelayIo {
    id: SessionId,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    /// `None` once the driver is done; the writer then drains and closes.
    client_tx: Option<mpsc::UnboundedSender<ClientCommand>>,
    client_reader: JoinHandle<()>,
    client_writer: JoinHandle<()>,
    /// Set after we queue a close frame and wait for the client's reply.
    close_deadline: Option<Instant>,
    backend: Option<BackendTasks>,
    /// Backend writer still flushing after a half-close.
    backend_flush: Option<JoinHandle<()>>,
    to_backend: Arc<Semaphore>,
    to_client: Arc<Semaphore>,
}

impl RelayIo {
    fn attach_backend(&mut self, conn: BackendConnection) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_backend(
            conn.read_half,
            Arc::clone(&self.to_client),
            self.inbound_tx.clone(),
        ));
        let writer = tokio::spawn(write_backend(
            self.id,
            conn.write_half,
            command_rx,
            Arc::clone(&self.to_backend),
            self.inbound_tx.clone(),
        ));
        self.backend = Some(BackendTasks {
            commands,
            reader,
            writer,
        });
    }

    /// Maps one report from a reader or writer task to a session event.
    fn inbound_event(&mut self, inbound: Inbound) -> Option<SessionEvent> {
        let id = self.id;
        match inbound {
            Inbound::Client(frame) => self.client_event(frame),
            Inbound::BackendChunk(bytes) => Some(SessionEvent::BackendData(bytes)),
            Inbound::BackendEof => {
                info!("session {id}: backend connection closed");
                self.release_backend();
                Some(SessionEvent::BackendClosed)
            }
            Inbound::BackendReadFailed(e) => {
                warn!("session {id}: backend read failed: {e}");
                self.release_backend();
                Some(SessionEvent::BackendError(e.to_string()))
            }
            Inbound::BackendWriteFailed(err) => {
                warn!("session {id}: {err}");
                self.release_backend();
                Some(SessionEvent::BackendError(err.to_string()))
            }
            Inbound::ClientSendFailed(err) => {
                warn!("session {id}: send to client failed: {err}");
                self.client_reader.abort();
                Some(SessionEvent::ClientError(err.to_string()))
            }
            Inbound::CloseNotDelivered(e) => {
                debug!("session {id}: close frame not delivered: {e}");
                self.close_deadline = None;
                self.client_reader.abort();
                Some(SessionEvent::ClientClosed)
            }
        }
    }

    /// Maps one item from the client stream to a session event.
    ///
    /// Text and binary frames are both forwarded as their raw bytes.  Every
    /// other item carries no payload for the backend, so its read credit is
    /// returned right away.
    fn client_event(&mut self, frame: Option<Result<WsMessage, WsError>>) -> Option<SessionEvent> {
        let id = self.id;
        match frame {
            Some(Ok(WsMessage::Binary(bytes))) => Some(SessionEvent::ClientData(bytes)),
            Some(Ok(WsMessage::Text(text))) => Some(SessionEvent::ClientData(text.into_bytes())),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                self.to_backend.add_permits(1);
                None
            }
            Some(Ok(WsMessage::Close(frame))) => {
                info!("session {id}: WebSocket connection closed by client ({frame:?})");
                self.close_deadline = None;
                Some(SessionEvent::ClientClosed)
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                info!("session {id}: WebSocket stream ended");
                self.close_deadline = None;
                Some(SessionEvent::ClientClosed)
            }
            Some(Err(e)) => {
                let err = BridgeError::ClientStream(e.to_string());
                warn!("session {id}: {err}");
                self.close_deadline = None;
                Some(SessionEvent::ClientError(err.to_string()))
            }
        }
    }

    /// Performs one action and reports any event it caused.
    ///
    /// Never waits on a socket: writes are only queued.
    fn execute(&mut self, action: SessionAction) -> Option<SessionEvent> {
        let id = self.id;
        match action {
            SessionAction::SendHandshake(handshake) => match handshake.to_json() {
                Ok(json) => {
                    self.queue_for_client(ClientCommand::Control(WsMessage::Text(json)));
                    None
                }
                Err(e) => {
                    warn!("session {id}: failed to encode handshake: {e}");
                    Some(SessionEvent::ClientError(e.to_string()))
                }
            },

            SessionAction::SendToClient(bytes) => {
                if !self.queue_for_client(ClientCommand::Data(bytes)) {
                    self.to_client.add_permits(1);
                }
                None
            }

            SessionAction::WriteToBackend(bytes) => {
                let queued = self
                    .backend
                    .as_ref()
                    .is_some_and(|backend| backend.commands.send(BackendCommand::Write(bytes)).is_ok());
                if !queued {
                    debug!("session {id}: backend already released; dropping client frame");
                    self.to_backend.add_permits(1);
                }
                None
            }

            SessionAction::CloseClient(close) => {
                debug!(
                    "session {id}: closing client with code {} {:?}",
                    close.code(),
                    close.reason()
                );
                if self.queue_for_client(ClientCommand::Close(close_frame(&close))) {
                    // Counted from queueing, not delivery.
                    self.close_deadline = Some(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                    None
                } else {
                    self.client_reader.abort();
                    Some(SessionEvent::ClientClosed)
                }
            }

            SessionAction::HalfCloseBackend => {
                if let Some(backend) = self.backend.take() {
                    backend.reader.abort();
                    // The writer sends whatever is still queued, then FIN.
                    if backend.commands.send(BackendCommand::Shutdown).is_ok() {
                        self.backend_flush = Some(backend.writer);
                    }
                }
                debug!("session {id}: backend half-closed and released");
                Some(SessionEvent::BackendClosed)
            }

            SessionAction::EndBackend => {
                self.release_backend();
                debug!("session {id}: backend released");
                Some(SessionEvent::BackendClosed)
            }
        }
    }

    /// Queues a command for the client writer.  Returns `false` when the
    /// writer is already gone.
    fn queue_for_client(&self, command: ClientCommand) -> bool {
        self.client_tx
            .as_ref()
            .is_some_and(|client_tx| client_tx.send(command).is_ok())
    }

    /// True unless the client reader is parked waiting for a credit.  A
    /// parked reader is stalled by the backend, not by a dead client.
    fn client_reader_idle(&self) -> bool {
        self.to_backend.available_permits() > 0
    }

    fn refund_dropped(&self, before: SessionStats, after: SessionStats) {
        let to_backend = after.dropped_to_backend - before.dropped_to_backend;
        let to_client = after.dropped_to_client - before.dropped_to_client;
        self.to_backend.add_permits(to_backend as usize);
        self.to_client.add_permits(to_client as usize);
    }

    fn release_backend(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.reader.abort();
            backend.writer.abort();
        }
    }

    /// Stops the readers and waits, bounded, for the writers to drain.
    async fn finish(mut self) {
        self.client_reader.abort();
        self.release_backend();

        // Dropping the sender lets the client writer send what is queued,
        // including any close reply tungstenite owes the client, and close.
        self.client_tx = None;

        let id = self.id;
        let backend_flush = self.backend_flush.take();
        tokio::join!(wait_or_abort(id, "client writer", self.client_writer), async {
            if let Some(flush) = backend_flush {
                wait_or_abort(id, "backend writer", flush).await;
            }
        });
    }
}

async fn wait_or_abort(id: SessionId, what: &str, mut task: JoinHandle<()>) {
    if timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut task).await.is_err() {
        debug!("session {id}: {what} still busy after {CLOSE_HANDSHAKE_TIMEOUT:?}; aborting");
        task.abort();
    }
}

// ── Forwarding tasks ──────────────────────────────────────────────────────────

/// Takes one credit per frame; the credit comes back once the frame has been
/// written to the backend or dropped.
async fn read_client<S>(
    mut ws_rx: SplitStream<WebSocketStream<S>>,
    credit: Arc<Semaphore>,
    inbound: mpsc::UnboundedSender<Inbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match credit.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }

        let frame = ws_rx.next().await;
        let last = !matches!(&frame, Some(Ok(message)) if !message.is_close());
        if inbound.send(Inbound::Client(frame)).is_err() || last {
            return;
        }
    }
}

async fn write_client<S>(
    id: SessionId,
    mut ws_tx: SplitSink<WebSocketStream<S>, WsMessage>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    credit: Arc<Semaphore>,
    inbound: mpsc::UnboundedSender<Inbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        let report = match command {
            ClientCommand::Data(bytes) => {
                let sent = ws_tx.send(WsMessage::Binary(bytes)).await;
                credit.add_permits(1);
                sent.err().map(|e| Inbound::ClientSendFailed(BridgeError::ClientStream(e.to_string())))
            }
            ClientCommand::Control(message) => ws_tx
                .send(message)
                .await
                .err()
                .map(|e| Inbound::ClientSendFailed(BridgeError::ClientStream(e.to_string()))),
            ClientCommand::Close(frame) => ws_tx
                .send(WsMessage::Close(Some(frame)))
                .await
                .err()
                .map(Inbound::CloseNotDelivered),
        };

        if let Some(report) = report {
            // The driver may already be gone; nothing else to do then.
            let _ = inbound.send(report);
            return;
        }
    }

    // Flush any close reply tungstenite still has queued for the client.
    if let Ok(Err(e)) = timeout(CLOSE_HANDSHAKE_TIMEOUT, ws_tx.close()).await {
        debug!("session {id}: closing client sink: {e}");
    }
}

/// Takes one credit per chunk; the credit comes back once the chunk has been
/// sent to the client or dropped.
async fn read_backend(
    mut read_half: OwnedReadHalf,
    credit: Arc<Semaphore>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match credit.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }

        let report = match read_chunk(&mut read_half, &mut buf).await {
            Ok(0) => Inbound::BackendEof,
            Ok(n) => Inbound::BackendChunk(buf[..n].to_vec()),
            Err(e) => Inbound::BackendReadFailed(e),
        };
        let last = !matches!(report, Inbound::BackendChunk(_));
        if inbound.send(report).is_err() || last {
            return;
        }
    }
}

async fn write_backend(
    id: SessionId,
    mut write_half: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<BackendCommand>,
    credit: Arc<Semaphore>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            BackendCommand::Write(bytes) => {
                let written = write_chunk(&mut write_half, &bytes).await;
                credit.add_permits(1);
                if let Err(e) = written {
                    let _ = inbound.send(Inbound::BackendWriteFailed(e));
                    return;
                }
            }
            BackendCommand::Shutdown => {
                half_close(write_half).await;
                debug!("session {id}: backend write side shut down");
                return;
            }
        }
    }
}

/// Builds the WebSocket close frame for a [`ClientClose`].
fn close_frame(close: &ClientClose) -> CloseFrame<'static> {
    let code = match close {
        ClientClose::Normal => CloseCode::Normal,
        ClientClose::Error { .. } => CloseCode::Error,
    };
    CloseFrame {
        code,
        reason: close.reason().to_owned().into(),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Client keepalive ──────────────────────────────────────────────────────────

/// Pings the client every `interval` and declares it dead after
/// `interval + timeout` without any inbound frame.
struct Keepalive {
    ticker: Option<Interval>,
    limit: Duration,
    last_seen: Instant,
}

impl Keepalive {
    fn new(interval: Option<Duration>, timeout: Duration) -> Self {
        let ticker = interval.filter(|period| !period.is_zero()).map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let limit = interval.unwrap_or_default() + timeout;
        Self {
            ticker,
            limit,
            last_seen: Instant::now(),
        }
    }

    async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    fn saw_traffic(&mut self) {
        self.last_seen = Instant::now();
    }

    fn expired(&self) -> bool {
        self.last_seen.elapsed() > self.limit
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BACKEND_FAILED_REASON;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpSocket, TcpStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Connects an in-memory WebSocket pair: (server side, client side).
    async fn ws_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    fn config_for(backend: std::net::SocketAddr) -> BridgeConfig {
        BridgeConfig {
            backend_host: backend.ip().to_string(),
            backend_port: backend.port(),
            ping_interval: None,
            ..BridgeConfig::default()
        }
    }

    /// A listener whose accept queue is full, so new dials to it hang until
    /// they time out.  The returned streams keep the queue full.
    async fn stalled_backend() -> (TcpListener, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        for _ in 0..16 {
            match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => return (listener, queued),
            }
        }
        panic!("accept queue never filled");
    }

    #[test]
    fn test_close_frame_codes_match_client_close() {
        let normal = close_frame(&ClientClose::Normal);
        assert_eq!(u16::from(normal.code), 1000);

        let error = close_frame(&ClientClose::Error {
            reason: "backend connection failed".into(),
        });
        assert_eq!(u16::from(error.code), 1011);
        assert_eq!(error.reason, "backend connection failed");
    }

    #[test]
    fn test_keepalive_disabled_with_zero_interval() {
        let keepalive = Keepalive::new(Some(Duration::ZERO), Duration::from_secs(1));
        assert!(keepalive.ticker.is_none());
    }

    #[tokio::test]
    async fn test_keepalive_not_expired_right_after_traffic() {
        let mut keepalive = Keepalive::new(Some(Duration::from_secs(30)), Duration::from_secs(10));
        keepalive.saw_traffic();
        assert!(!keepalive.expired());
    }

    #[tokio::test]
    async fn test_relay_sends_handshake_then_backend_bytes() {
        // Arrange: a backend that greets like an SSH server
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Arc::new(config_for(backend.local_addr().unwrap()));
        let (server_ws, mut client_ws) = ws_pair().await;
        let relay = tokio::spawn(run_relay(server_ws, SessionId(7), config));

        let (mut peer, _) = backend.accept().await.unwrap();
        peer.write_all(b"SSH-2.0-stub\r\n").await.unwrap();

        // Act
        let first = client_ws.next().await.unwrap().unwrap();
        let second = client_ws.next().await.unwrap().unwrap();

        // Assert
        match first {
            WsMessage::Text(json) => {
                let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                assert_eq!(value["type"], "handshake");
            }
            other => panic!("expected handshake text frame, got {other:?}"),
        }
        assert_eq!(second, WsMessage::Binary(b"SSH-2.0-stub\r\n".to_vec()));

        drop(peer);
        let _ = client_ws.next().await;
        drop(client_ws);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_half_closes_backend() {
        // Arrange
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Arc::new(config_for(backend.local_addr().unwrap()));
        let (server_ws, mut client_ws) = ws_pair().await;
        let relay = tokio::spawn(run_relay(server_ws, SessionId(8), config));
        let (mut peer, _) = backend.accept().await.unwrap();
        let _handshake = client_ws.next().await.unwrap().unwrap();

        // Act
        client_ws
            .send(WsMessage::Binary(b"bye".to_vec()))
            .await
            .unwrap();
        client_ws.close(None).await.unwrap();

        // Assert: the backend sees the last bytes, then end-of-stream
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");

        let stats = relay.await.unwrap();
        assert_eq!(stats.bytes_to_backend, 3);
    }

    #[tokio::test]
    async fn test_silent_client_is_dropped_by_keepalive_and_backend_released() {
        // Arrange: 50 ms pings, 50 ms grace, and a client that is never polled
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Arc::new(BridgeConfig {
            ping_interval: Some(Duration::from_millis(50)),
            ping_timeout: Duration::from_millis(50),
            ..config_for(backend.local_addr().unwrap())
        });
        let (server_ws, client_ws) = ws_pair().await;
        let relay = tokio::spawn(run_relay(server_ws, SessionId(9), config));
        let (mut peer, _) = backend.accept().await.unwrap();

        // Act: wait for the backend to be released
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .expect("backend must be released once the keepalive expires");

        // Assert: end-of-stream (or a reset), and the session is over
        assert!(matches!(read, Ok(0) | Err(_)), "unexpected backend read: {read:?}");
        let stats = timeout(Duration::from_secs(10), relay)
            .await
            .expect("relay must finish")
            .unwrap();
        assert_eq!(stats.bytes_to_backend, 0);

        drop(client_ws);
    }

    #[tokio::test]
    async fn test_dial_timeout_closes_client_with_1011_and_no_handshake() {
        // Arrange: a backend whose accept queue is full never completes a dial
        let (listener, _queued) = stalled_backend().await;
        let config = Arc::new(BridgeConfig {
            dial_timeout: Some(Duration::from_millis(200)),
            ..config_for(listener.local_addr().unwrap())
        });
        let (server_ws, mut client_ws) = ws_pair().await;
        let started = Instant::now();
        let relay = tokio::spawn(run_relay(server_ws, SessionId(10), config));

        // Act
        let first = timeout(Duration::from_secs(5), client_ws.next())
            .await
            .expect("client must be closed after the dial timeout")
            .unwrap()
            .unwrap();

        // Assert: the very first frame is the 1011 close, not a handshake
        match first {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1011);
                assert_eq!(frame.reason, BACKEND_FAILED_REASON);
            }
            other => panic!("expected a 1011 close frame, got {other:?}"),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "closed before the timeout: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "dial timeout ignored: {elapsed:?}");

        drop(client_ws);
        timeout(Duration::from_secs(10), relay)
            .await
            .expect("relay must finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_close_while_dialing_abandons_dial() {
        // Arrange: no dial timeout, so only the client close can end the session
        let (listener, _queued) = stalled_backend().await;
        let config = Arc::new(config_for(listener.local_addr().unwrap()));
        let (server_ws, mut client_ws) = ws_pair().await;
        let relay = tokio::spawn(run_relay(server_ws, SessionId(11), config));

        // Act: a frame that can only be queued, then a close
        client_ws
            .send(WsMessage::Binary(b"early".to_vec()))
            .await
            .unwrap();
        client_ws.close(None).await.unwrap();

        // Assert: the relay finishes without waiting for the dial
        let stats = timeout(Duration::from_secs(3), relay)
            .await
            .expect("the pending dial must be abandoned")
            .unwrap();
        assert_eq!(stats.bytes_to_backend, 0);
        assert_eq!(stats.dropped_to_backend, 1);

        // Assert: no handshake ever reached the client
        while let Ok(Some(Ok(message))) = timeout(Duration::from_secs(1), client_ws.next()).await {
            assert!(
                !matches!(message, WsMessage::Text(_)),
                "handshake sent for an abandoned dial: {message:?}"
            );
        }
    }
}
