//! TCP connection management for the backend service.
//!
//! Each WebSocket session gets its own TCP connection to the backend.  The
//! payload is opaque: bytes are written exactly as the client sent them and
//! read back in whatever chunk sizes the kernel hands out.
//!
//! # Portability note
//!
//! This module uses only the `tokio::net::TcpStream` API, which works
//! identically on Windows, Linux, and macOS.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::BridgeError;

/// Size of the buffer used for each backend `read()` call.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A connected backend stream, split into independently owned halves.
///
/// The read half feeds backend→client forwarding; the write half receives
/// client→backend bytes.  Releasing the session means dropping both.
pub struct BackendConnection {
    /// Read half of the backend TCP stream.
    pub read_half: OwnedReadHalf,
    /// Write half of the backend TCP stream.
    pub write_half: OwnedWriteHalf,
}

impl BackendConnection {
    /// Opens a TCP connection to `addr` (`host:port`, DNS names allowed).
    ///
    /// With `dial_timeout` set, a dial that has not completed in time fails
    /// with [`BridgeError::BackendDialTimeout`].  Without it the dial waits as
    /// long as the OS does.
    ///
    /// # Errors
    ///
    /// [`BridgeError::BackendDial`] if the backend refuses or cannot be
    /// reached, [`BridgeError::BackendDialTimeout`] if the timeout elapses.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ws_ssh_bridge::infrastructure::backend_conn::BackendConnection;
    ///
    /// # async fn example() -> Result<(), ws_ssh_bridge::domain::BridgeError> {
    /// let conn = BackendConnection::connect("127.0.0.1:2222", None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(addr: &str, dial_timeout: Option<Duration>) -> Result<Self, BridgeError> {
        let dial = TcpStream::connect(addr);

        let result = match dial_timeout {
            Some(limit) => match tokio::time::timeout(limit, dial).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(BridgeError::BackendDialTimeout {
                        addr: addr.to_string(),
                        timeout: limit,
                    })
                }
            },
            None => dial.await,
        };

        let stream = result.map_err(|source| BridgeError::BackendDial {
            addr: addr.to_string(),
            source,
        })?;

        // SSH is interactive; keystrokes should not wait for Nagle.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY on backend stream: {e}");
        }

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            read_half,
            write_half,
        })
    }
}

/// Reads the next chunk from the backend.
///
/// Returns `Ok(0)` on end-of-stream.  Chunk boundaries are whatever the
/// kernel hands out; they carry no meaning for the byte stream.
pub async fn read_chunk(read_half: &mut OwnedReadHalf, buf: &mut [u8]) -> std::io::Result<usize> {
    read_half.read(buf).await
}

/// Writes all of `bytes` to the backend stream.
///
/// # Errors
///
/// Returns [`BridgeError::BackendStream`] if the write fails (e.g., the
/// backend reset the connection).
pub async fn write_chunk(write_half: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), BridgeError> {
    write_half
        .write_all(bytes)
        .await
        .map_err(BridgeError::BackendStream)
}

/// Signals end-of-writes to the backend, then releases the write half.
///
/// A failed shutdown is not an error worth surfacing: the stream is being
/// released either way.
pub async fn half_close(mut write_half: OwnedWriteHalf) {
    if let Err(e) = write_half.shutdown().await {
        debug!("backend shutdown(Write) failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
