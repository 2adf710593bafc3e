//! Domain layer for ws-ssh-bridge.
//!
//! Pure types with no I/O, networking, or async runtime dependencies:
//! configuration, the handshake message, session identity, and errors.
//! Reading CLI flags or environment variables happens in `main.rs`, never
//! here.

pub mod config;
pub mod errors;
pub mod messages;
pub mod session_id;

pub use config::BridgeConfig;
pub use errors::{BridgeError, BACKEND_FAILED_REASON};
pub use messages::HandshakeMessage;
pub use session_id::{SessionId, SessionIdCounter};
