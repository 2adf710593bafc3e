//! ws-ssh-bridge library crate.
//!
//! A WebSocket endpoint that relays each client's traffic to a backend TCP
//! service (typically an SSH server) and streams the backend's bytes back
//! over the same WebSocket.
//!
//! # Architecture
//!
//! ```text
//! Client (WebSocket frames)
//!         ↕
//! [ws-ssh-bridge]
//!   ├── domain/           BridgeConfig, HandshakeMessage, SessionId, BridgeError
//!   ├── application/      RelaySession state machine (coupled close rules)
//!   └── infrastructure/
//!         ├── ws_server/    Listener: bind, accept loop, start/stop
//!         ├── relay/        Per-session driver (tokio-tungstenite + TCP)
//!         └── backend_conn/ Backend TCP dial, read, write, half-close
//!         ↕
//! Backend (raw TCP byte stream)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` only.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration, messages, identifiers, errors.
pub mod domain;

/// Application layer: the relay session state machine.
pub mod application;

/// Infrastructure layer: listener, relay driver, backend connection.
pub mod infrastructure;
