//! ws-ssh-bridge: entry point.
//!
//! Accepts WebSocket connections and relays each one to a backend TCP
//! service (usually an SSH daemon), so browser-based terminals can reach SSH
//! without raw socket access.
//!
//! # Usage
//!
//! ```text
//! ws-ssh-bridge [OPTIONS]
//!
//! Options:
//!   --ws-port <PORT>              WebSocket listener port [default: 3000]
//!   --ws-bind <IP>                WebSocket bind address [default: 0.0.0.0]
//!   --ssh-host <HOST>             Backend hostname or IP [default: 127.0.0.1]
//!   --ssh-port <PORT>             Backend port [default: 2222]
//!   --handshake-message <TEXT>    Status text of the handshake message
//!   --dial-timeout <SECS>         Backend dial timeout, 0 = none [default: 0]
//!   --ping-interval <SECS>        Client keepalive interval, 0 = off [default: 30]
//!   --ping-timeout <SECS>         Keepalive grace period [default: 10]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                   | Default     |
//! |----------------------------|-------------|
//! | `WS_PORT`                  | `3000`      |
//! | `WS_BIND`                  | `0.0.0.0`   |
//! | `SSH_HOST`                 | `127.0.0.1` |
//! | `SSH_PORT`                 | `2222`      |
//! | `BRIDGE_HANDSHAKE_MESSAGE` | see below   |
//! | `BRIDGE_DIAL_TIMEOUT`      | `0`         |
//! | `BRIDGE_PING_INTERVAL`     | `30`        |
//! | `BRIDGE_PING_TIMEOUT`      | `10`        |
//!
//! The default handshake text is
//! `HTTP 101 Switching Protocols - KENYAN JOHN REESE PRIME`.
//!
//! CLI args take precedence when both are present.  Log verbosity follows
//! `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ws_ssh_bridge::domain::config::DEFAULT_HANDSHAKE_MESSAGE;
use ws_ssh_bridge::domain::BridgeConfig;
use ws_ssh_bridge::infrastructure::BridgeServer;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-SSH bridge.
///
/// Accepts WebSocket connections and relays each one to a backend TCP service.
#[derive(Debug, Parser)]
#[command(
    name = "ws-ssh-bridge",
    about = "WebSocket-to-TCP relay for browser SSH clients",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server to listen on.
    #[arg(long, default_value_t = 3000, env = "WS_PORT")]
    ws_port: u16,

    /// IP address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0", env = "WS_BIND")]
    ws_bind: String,

    /// Hostname or IP address of the backend (SSH) service.
    #[arg(long, default_value = "127.0.0.1", env = "SSH_HOST")]
    ssh_host: String,

    /// TCP port of the backend service.
    #[arg(long, default_value_t = 2222, env = "SSH_PORT")]
    ssh_port: u16,

    /// Status text carried by the handshake message sent on backend connect.
    #[arg(long, default_value = DEFAULT_HANDSHAKE_MESSAGE, env = "BRIDGE_HANDSHAKE_MESSAGE")]
    handshake_message: String,

    /// Backend dial timeout in seconds.  `0` waits as long as the OS does.
    #[arg(long, default_value_t = 0, env = "BRIDGE_DIAL_TIMEOUT")]
    dial_timeout: u64,

    /// Interval between WebSocket pings to each client, in seconds.  `0`
    /// disables keepalive.
    #[arg(long, default_value_t = 30, env = "BRIDGE_PING_INTERVAL")]
    ping_interval: u64,

    /// Seconds of extra silence tolerated after a ping before the client is
    /// considered gone.
    #[arg(long, default_value_t = 10, env = "BRIDGE_PING_TIMEOUT")]
    ping_timeout: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` is not a valid IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let listen_addr: SocketAddr = format!("{}:{}", self.ws_bind, self.ws_port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid WebSocket bind address: '{}:{}'",
                    self.ws_bind, self.ws_port
                )
            })?;

        let seconds = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

        Ok(BridgeConfig {
            listen_addr,
            backend_host: self.ssh_host,
            backend_port: self.ssh_port,
            handshake_message: self.handshake_message,
            dial_timeout: seconds(self.dial_timeout),
            ping_interval: seconds(self.ping_interval),
            ping_timeout: Duration::from_secs(self.ping_timeout),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Initialise `tracing_subscriber` (level from `RUST_LOG`, default `info`).
/// 2. Parse CLI arguments into a [`BridgeConfig`].
/// 3. Start the listener; a bind failure exits non-zero.
/// 4. Wait for Ctrl+C or SIGTERM, stop the listener, exit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "starting WebSocket to SSH bridge on {}, backend {}",
        config.listen_addr,
        config.backend_addr()
    );

    let server = BridgeServer::start(config)
        .await
        .context("WebSocket server failed to start")?;

    info!("ready to accept connections on {}", server.local_addr());

    shutdown_signal().await;
    info!("received shutdown signal, stopping listener");

    server.stop().await;
    Ok(())
}

/// Resolves on Ctrl+C, or on SIGTERM where that exists.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_match_original_deployment() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["ws-ssh-bridge"]);

        // Assert
        assert_eq!(cli.ws_port, 3000);
        assert_eq!(cli.ssh_host, "127.0.0.1");
        assert_eq!(cli.ssh_port, 2222);
    }

    #[test]
    fn test_cli_ws_port_override() {
        let cli = Cli::parse_from(["ws-ssh-bridge", "--ws-port", "4000"]);
        assert_eq!(cli.ws_port, 4000);
    }

    #[test]
    fn test_cli_backend_override() {
        let cli = Cli::parse_from([
            "ws-ssh-bridge",
            "--ssh-host",
            "ssh.internal",
            "--ssh-port",
            "22",
        ]);
        assert_eq!(cli.ssh_host, "ssh.internal");
        assert_eq!(cli.ssh_port, 22);
    }

    #[test]
    fn test_into_bridge_config_defaults() {
        // Arrange
        let cli = Cli::parse_from(["ws-ssh-bridge"]);

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.backend_addr(), "127.0.0.1:2222");
        assert_eq!(config.handshake_message, DEFAULT_HANDSHAKE_MESSAGE);
        assert_eq!(config.dial_timeout, None);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_into_bridge_config_zero_disables_timers() {
        let cli = Cli::parse_from([
            "ws-ssh-bridge",
            "--dial-timeout",
            "0",
            "--ping-interval",
            "0",
        ]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.dial_timeout, None);
        assert_eq!(config.ping_interval, None);
    }

    #[test]
    fn test_into_bridge_config_dial_timeout() {
        let cli = Cli::parse_from(["ws-ssh-bridge", "--dial-timeout", "5"]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_into_bridge_config_keeps_hostname_backend() {
        let cli = Cli::parse_from(["ws-ssh-bridge", "--ssh-host", "sshd"]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.backend_addr(), "sshd:2222");
    }

    #[test]
    fn test_into_bridge_config_invalid_ws_bind_returns_error() {
        // Arrange: an invalid IP address string
        let cli = Cli::parse_from(["ws-ssh-bridge", "--ws-bind", "not.an.ip"]);

        // Act
        let result = cli.into_bridge_config();

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }
}
