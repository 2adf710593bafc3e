//! The synthetic handshake message sent to every client.
//!
//! Once the backend dial succeeds, the bridge sends exactly one JSON text
//! frame to the client before any backend bytes:
//!
//! ```json
//! {"type":"handshake","message":"HTTP 101 Switching Protocols - KENYAN JOHN REESE PRIME","timestamp":"2024-05-01T12:00:00.000Z"}
//! ```
//!
//! It is an application payload, not a transport-level reply.  It lets the
//! client tell "tunnel established" apart from "backend sent its first byte".
//! All backend bytes that follow travel as binary frames.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Client-bound notification that the backend connection is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "handshake")]
pub struct HandshakeMessage {
    /// Human-readable status string.
    pub message: String,
    /// ISO-8601 / RFC 3339 UTC timestamp with millisecond precision.
    pub timestamp: String,
}

impl HandshakeMessage {
    /// Builds a handshake stamped with the current time.
    pub fn now(message: impl Into<String>) -> Self {
        Self::at(message, Utc::now())
    }

    /// Builds a handshake stamped with `at`.
    pub fn at(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Only fails if `serde_json` cannot serialize a `String`, which does not
    /// happen in practice; the `Result` is kept so callers can use `?`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
