//! Error taxonomy for the bridge.
//!
//! Only [`BridgeError::Bind`] ever leaves the library as a fatal error.  All
//! other variants are scoped to a single session: they are logged with the
//! session id and turned into the coupled-close path, never propagated to the
//! listener or to other sessions.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Close reason sent to the client whenever the backend side fails.
///
/// Fixed text so backend details never reach the client, and short enough for
/// the 123-byte limit on WebSocket close reasons.
pub const BACKEND_FAILED_REASON: &str = "backend connection failed";

/// Errors raised by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The WebSocket listener could not bind its port.  Fatal for the process.
    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused or could not be reached.
    #[error("failed to connect to backend at {addr}: {source}")]
    BackendDial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend dial did not finish within the configured timeout.
    #[error("connecting to backend at {addr} timed out after {timeout:?}")]
    BackendDialTimeout { addr: String, timeout: Duration },

    /// I/O failure on an established backend stream.
    #[error("backend stream error: {0}")]
    BackendStream(#[source] std::io::Error),

    /// Failure on the client WebSocket.
    #[error("client stream error: {0}")]
    ClientStream(String),
}
