//! WebSocket server: bind, accept loop, and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections and numbering them with a
//!    [`SessionId`] in acceptance order.
//! 3. Spawning one Tokio task per connection that upgrades it to a WebSocket
//!    and runs the relay (see [`crate::infrastructure::relay`]).
//! 4. Stopping the accept loop on request without touching running sessions.
//!
//! # Scalability
//!
//! The accept loop never waits on a session: the WebSocket upgrade and the
//! backend dial both happen inside the spawned task, so one slow client or
//! one stuck backend dial cannot delay the next accept.
//!
//! # Upgrade policy
//!
//! Any request path is accepted, no sub-protocol is negotiated, and no
//! compression extension is offered (tungstenite does not implement
//! `permessage-deflate`, so frames always travel uncompressed).

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

use crate::domain::{BridgeConfig, BridgeError, SessionId, SessionIdCounter};
use crate::infrastructure::relay::run_relay;

/// How often the accept loop wakes up to check the running flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// A running WebSocket listener.
///
/// Created by [`BridgeServer::start`], shut down by [`BridgeServer::stop`].
pub struct BridgeServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    session_ids: Arc<SessionIdCounter>,
    accept_task: JoinHandle<()>,
}

impl BridgeServer {
    /// Binds `config.listen_addr` and starts accepting connections.
    ///
    /// Returns as soon as the listener is bound; accepting happens on a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bind`] if the address cannot be bound (already
    /// in use, permission denied).  This is fatal: there is no retry.
    pub async fn start(config: BridgeConfig) -> Result<Self, BridgeError> {
        let listen_addr = config.listen_addr;
        let bind_error = |source| BridgeError::Bind {
            addr: listen_addr,
            source,
        };

        // `TcpListener::bind` is the async equivalent of `bind()` + `listen()`.
        // Asking for the local address afterwards resolves port 0 to the port
        // the OS actually picked.
        let listener = TcpListener::bind(listen_addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(
            "WebSocket bridge listening on {local_addr}, relaying to {}",
            config.backend_addr()
        );

        // The running flag and the id counter are shared between this handle
        // and the accept task, hence the `Arc`s.  The config is wrapped once
        // here and cloned cheaply into every session task.
        let running = Arc::new(AtomicBool::new(true));
        let session_ids = Arc::new(SessionIdCounter::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::new(config),
            Arc::clone(&running),
            Arc::clone(&session_ids),
        ));

        Ok(Self {
            local_addr,
            running,
            session_ids,
            accept_task,
        })
    }

    /// The address the listener is actually bound to.
    ///
    /// Differs from the configured address when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections accepted so far.
    pub fn sessions_accepted(&self) -> u64 {
        self.session_ids.issued()
    }

    /// Stops accepting new connections.
    ///
    /// Resolves once the accept loop has exited and the listening socket has
    /// been closed.  Sessions that are already running are left alone and
    /// finish on their own close paths.
    pub async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if let Err(e) = self.accept_task.await {
            error!("accept loop terminated abnormally: {e}");
        }
        info!("WebSocket server on {} closed", self.local_addr);
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections until `running` is cleared, then drops the listener.
async fn accept_loop(
    listener: TcpListener,
    config: Arc<BridgeConfig>,
    running: Arc<AtomicBool>,
    session_ids: Arc<SessionIdCounter>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown requested; stopping accept loop");
            break;
        }

        // Short timeout so the loop notices the running flag even when no
        // client is connecting.
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                // Ids are issued at accept time, so a connection that later
                // fails the upgrade still consumes one.
                let id = session_ids.next();
                info!("session {id}: new WebSocket connection from {peer_addr}");
                let cfg = Arc::clone(&config);

                // `tokio::spawn` returns immediately; the upgrade, the dial
                // and the relay all run on the session's own task.
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, id, cfg).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection within the poll interval.
            }
        }
    }

    // Dropping the listener closes the socket and frees the port.
    drop(listener);
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Upgrades one accepted socket to a WebSocket and runs its relay session.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: SessionId,
    config: Arc<BridgeConfig>,
) {
    // Keystrokes are tiny writes; Nagle would hold them back.
    if let Err(e) = stream.set_nodelay(true) {
        debug!("session {id}: failed to set TCP_NODELAY: {e}");
    }

    // ── Step 1: Complete the WebSocket handshake ──────────────────────────────
    //
    // `accept_async` reads the HTTP Upgrade request and answers with
    // "101 Switching Protocols".  A client that fails here never gets a
    // relay, and no backend dial is made for it.
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("session {id}: WebSocket handshake with {peer_addr} failed: {e}");
            return;
        }
    };

    // ── Step 2: Relay until both endpoints are closed ─────────────────────────
    run_relay(ws_stream, id, config).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
