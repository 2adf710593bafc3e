//! The relay session state machine.
//!
//! A [`RelaySession`] bridges one WebSocket client to one backend TCP stream.
//! It performs no I/O: the infrastructure driver turns socket activity into
//! [`SessionEvent`]s, calls [`RelaySession::handle`], and executes the
//! [`SessionAction`]s it gets back.  The coupled-close rules can therefore
//! be tested without a network.
//!
//! # States
//!
//! ```text
//!              BackendConnected
//!  Connecting ─────────────────▶ Active
//!      │                           │  any close / error on either side
//!      │ dial failed               ▼
//!      └─────────────────────▶ Closing ──▶ Closed
//!                  both endpoints reported closed
//! ```
//!
//! The session tracks each endpoint separately and derives [`SessionState`]
//! from the pair, so a close signal for an endpoint that is already closed
//! changes nothing and produces no action.
//!
//! # Dropped writes
//!
//! A frame from the client while the backend is no longer writable, or a
//! backend chunk while the client is no longer open, is dropped without
//! telling the sender.  This is the documented `WriteDroppedSilently`
//! behaviour; drops are counted in [`SessionStats`] and nothing is buffered
//! to hide them.  The one exception is the `Connecting` state: client frames
//! that arrive before the backend is up are queued and flushed, in order,
//! right after the handshake.

use crate::domain::{HandshakeMessage, SessionId, BACKEND_FAILED_REASON};

// ── Public types ──────────────────────────────────────────────────────────────

/// Lifecycle state of a session, derived from its two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend dial in flight, client connected.
    Connecting,
    /// Both endpoints open; bytes flow in both directions.
    Active,
    /// One side is gone and the other is being torn down.
    Closing,
    /// Both endpoints closed.  Terminal.
    Closed,
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The backend dial succeeded.
    BackendConnected,
    /// The backend dial failed (refused, unreachable, timed out).
    BackendDialFailed(String),
    /// A chunk of bytes arrived from the backend.
    BackendData(Vec<u8>),
    /// The backend stream ended cleanly, or was released by the session.
    BackendClosed,
    /// The backend stream failed mid-session.
    BackendError(String),
    /// A message frame arrived from the client.
    ClientData(Vec<u8>),
    /// The client endpoint closed.
    ClientClosed,
    /// The client endpoint failed.
    ClientError(String),
}

/// How the client endpoint should be closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientClose {
    /// Normal closure (1000): the backend ended cleanly.
    Normal,
    /// Internal error (1011) with a reason: the backend failed.
    Error { reason: String },
}

impl ClientClose {
    /// The WebSocket close code for this kind of close.
    pub fn code(&self) -> u16 {
        match self {
            ClientClose::Normal => 1000,
            ClientClose::Error { .. } => 1011,
        }
    }

    /// The close reason text (empty for a normal close).
    pub fn reason(&self) -> &str {
        match self {
            ClientClose::Normal => "",
            ClientClose::Error { reason } => reason,
        }
    }
}

/// Side effects the driver must perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send the handshake as a text frame.
    SendHandshake(HandshakeMessage),
    /// Send backend bytes to the client as one message frame.
    SendToClient(Vec<u8>),
    /// Write client bytes to the backend stream verbatim.
    WriteToBackend(Vec<u8>),
    /// Close the client endpoint.
    CloseClient(ClientClose),
    /// Client closed: signal end-of-writes to the backend, then release it.
    HalfCloseBackend,
    /// Client failed: release the backend stream.
    EndBackend,
}

/// Per-session traffic counters, logged when the session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes handed to the backend (including flushed queued frames).
    pub bytes_to_backend: u64,
    /// Bytes handed to the client as data frames.
    pub bytes_to_client: u64,
    /// Client frames dropped because the backend was not writable.
    pub dropped_to_backend: u64,
    /// Backend chunks dropped because the client was not open.
    pub dropped_to_client: u64,
}

// ── Endpoint status ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendStatus {
    Dialing,
    Open,
    Closing,
    Closed,
}

// ── RelaySession ──────────────────────────────────────────────────────────────

/// One client ↔ backend relay.
#[derive(Debug)]
pub struct RelaySession {
    id: SessionId,
    handshake_message: String,
    client: ClientStatus,
    backend: BackendStatus,
    state: SessionState,
    /// Client frames received while the backend was still dialing.
    pending: Vec<Vec<u8>>,
    stats: SessionStats,
}

impl RelaySession {
    /// Creates a session in `Connecting`: the client is already accepted and
    /// the backend dial is about to be issued.
    pub fn new(id: SessionId, handshake_message: impl Into<String>) -> Self {
        Self {
            id,
            handshake_message: handshake_message.into(),
            client: ClientStatus::Open,
            backend: BackendStatus::Dialing,
            state: SessionState::Connecting,
            pending: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Number of client frames waiting for the backend dial to finish.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Applies one event and returns the actions the driver must execute.
    ///
    /// Once the session is `Closed` every event is ignored.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        let mut actions = Vec::new();
        match event {
            SessionEvent::BackendConnected => self.on_backend_connected(&mut actions),
            SessionEvent::BackendDialFailed(_) | SessionEvent::BackendError(_) => {
                let close = ClientClose::Error {
                    reason: BACKEND_FAILED_REASON.to_string(),
                };
                self.on_backend_gone(close, &mut actions);
            }
            SessionEvent::BackendClosed => self.on_backend_gone(ClientClose::Normal, &mut actions),
            SessionEvent::BackendData(bytes) => self.on_backend_data(bytes, &mut actions),
            SessionEvent::ClientData(bytes) => self.on_client_data(bytes, &mut actions),
            SessionEvent::ClientClosed => {
                self.on_client_gone(SessionAction::HalfCloseBackend, &mut actions)
            }
            SessionEvent::ClientError(_) => {
                self.on_client_gone(SessionAction::EndBackend, &mut actions)
            }
        }

        self.state = self.derive_state();
        actions
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    fn on_backend_connected(&mut self, actions: &mut Vec<SessionAction>) {
        // Dialing implies the client is still open: a client close while
        // dialing abandons the dial (see `on_client_gone`).
        if self.backend != BackendStatus::Dialing {
            return;
        }
        self.backend = BackendStatus::Open;

        actions.push(SessionAction::SendHandshake(HandshakeMessage::now(
            self.handshake_message.clone(),
        )));
        for frame in self.pending.drain(..) {
            self.stats.bytes_to_backend += frame.len() as u64;
            actions.push(SessionAction::WriteToBackend(frame));
        }
    }

    fn on_backend_gone(&mut self, close: ClientClose, actions: &mut Vec<SessionAction>) {
        if self.backend == BackendStatus::Closed {
            return;
        }
        self.backend = BackendStatus::Closed;
        self.discard_pending();

        if self.client == ClientStatus::Open {
            self.client = ClientStatus::Closing;
            actions.push(SessionAction::CloseClient(close));
        }
    }

    fn on_backend_data(&mut self, bytes: Vec<u8>, actions: &mut Vec<SessionAction>) {
        if self.client == ClientStatus::Open && self.backend == BackendStatus::Open {
            self.stats.bytes_to_client += bytes.len() as u64;
            actions.push(SessionAction::SendToClient(bytes));
        } else {
            self.stats.dropped_to_client += 1;
        }
    }

    fn on_client_data(&mut self, bytes: Vec<u8>, actions: &mut Vec<SessionAction>) {
        match (self.client, self.backend) {
            (ClientStatus::Open, BackendStatus::Dialing) => self.pending.push(bytes),
            (ClientStatus::Open, BackendStatus::Open) => {
                self.stats.bytes_to_backend += bytes.len() as u64;
                actions.push(SessionAction::WriteToBackend(bytes));
            }
            _ => self.stats.dropped_to_backend += 1,
        }
    }

    fn on_client_gone(&mut self, release: SessionAction, actions: &mut Vec<SessionAction>) {
        if self.client == ClientStatus::Closed {
            return;
        }
        self.client = ClientStatus::Closed;

        match self.backend {
            BackendStatus::Open => {
                self.backend = BackendStatus::Closing;
                actions.push(release);
            }
            BackendStatus::Dialing => {
                // Nobody is left to relay for; the driver abandons the dial.
                self.backend = BackendStatus::Closed;
                self.discard_pending();
            }
            BackendStatus::Closing | BackendStatus::Closed => {}
        }
    }

    /// Queued frames that will never reach a backend count as dropped.
    fn discard_pending(&mut self) {
        self.stats.dropped_to_backend += self.pending.len() as u64;
        self.pending.clear();
    }

    fn derive_state(&self) -> SessionState {
        match (self.client, self.backend) {
            (ClientStatus::Closed, BackendStatus::Closed) => SessionState::Closed,
            (ClientStatus::Open, BackendStatus::Dialing) => SessionState::Connecting,
            (ClientStatus::Open, BackendStatus::Open) => SessionState::Active,
            _ => SessionState::Closing,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
