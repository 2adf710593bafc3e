//! Infrastructure layer for ws-ssh-bridge.
//!
//! Handles all I/O: accepting WebSocket connections, dialing the backend,
//! and driving each relay session's sockets.
//!
//! # Responsibilities
//!
//! - Binding the listener and running the accept loop (`ws_server`)
//! - Opening, reading, writing and half-closing backend TCP streams
//!   (`backend_conn`)
//! - Feeding socket activity into the relay state machine and executing its
//!   actions (`relay`)
//!
//! # What does NOT belong here?
//!
//! - Coupled-close decisions (that is the application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod backend_conn;
pub mod relay;
pub mod ws_server;

pub use relay::run_relay;
pub use ws_server::BridgeServer;
