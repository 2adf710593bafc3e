//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is populated once at startup by `main.rs` (CLI flags and environment
//! variables) and is never read from the environment inside the library.

use std::net::SocketAddr;
use std::time::Duration;

/// Default status text carried by the synthetic handshake message.
pub const DEFAULT_HANDSHAKE_MESSAGE: &str = "HTTP 101 Switching Protocols - KENYAN JOHN REESE PRIME";

/// All runtime configuration for the WebSocket bridge.
///
/// Build this struct once at startup and wrap it in an `Arc` so every
/// session task can share it.
///
/// # Example
///
/// ```rust
/// use ws_ssh_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.listen_addr.port(), 3000);
/// assert_eq!(cfg.backend_addr(), "127.0.0.1:2222");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    pub listen_addr: SocketAddr,

    /// Hostname or IP address of the backend (SSH) service.
    ///
    /// Kept as a string so DNS names are resolved at dial time, per session.
    pub backend_host: String,

    /// TCP port of the backend service.
    pub backend_port: u16,

    /// Human-readable status text placed in the handshake message.
    pub handshake_message: String,

    /// Upper bound on how long a backend dial may take.
    ///
    /// `None` keeps the historical behaviour: a dial that never completes
    /// leaves the session in `Connecting` until the client goes away.
    pub dial_timeout: Option<Duration>,

    /// How often the bridge pings each WebSocket client.
    ///
    /// `None` disables keepalive pings entirely.
    pub ping_interval: Option<Duration>,

    /// Extra silence tolerated after a ping before the client is considered
    /// dead.  Only meaningful when `ping_interval` is set.
    pub ping_timeout: Duration,
}

impl BridgeConfig {
    /// Returns the backend address as a `host:port` string.
    ///
    /// Used both for dialing (`TcpStream::connect` accepts it directly) and
    /// for log messages.
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }
}

impl Default for BridgeConfig {
    /// | Field             | Default                       |
    /// |-------------------|-------------------------------|
    /// | listen_addr       | `0.0.0.0:3000`                |
    /// | backend_host      | `127.0.0.1`                   |
    /// | backend_port      | `2222`                        |
    /// | handshake_message | [`DEFAULT_HANDSHAKE_MESSAGE`] |
    /// | dial_timeout      | none                          |
    /// | ping_interval     | 30 seconds                    |
    /// | ping_timeout      | 10 seconds                    |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 2222,
            handshake_message: DEFAULT_HANDSHAKE_MESSAGE.to_string(),
            dial_timeout: None,
            ping_interval: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
