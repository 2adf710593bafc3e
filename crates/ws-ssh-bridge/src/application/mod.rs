//! Application layer for ws-ssh-bridge.
//!
//! Holds the relay session state machine: it decides *what* happens when
//! either side of a tunnel sends data, closes, or fails.  Performing the
//! resulting socket operations is left to the infrastructure layer.

pub mod relay_session;

pub use relay_session::{
    ClientClose, RelaySession, SessionAction, SessionEvent, SessionState, SessionStats,
};
