//! Session identifiers and the counter that hands them out.
//!
//! Every accepted connection gets a [`SessionId`] that is unique for the
//! lifetime of the process and strictly increasing in acceptance order.  The
//! ids exist only for log correlation.
//!
//! The counter is owned by the listener and shared with nothing else, so
//! there is no process-global state.  It uses an `AtomicU64`, which keeps
//! ids unique even if accepts ever happen from more than one task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread-safe, monotonically increasing source of [`SessionId`]s.
///
/// The first id handed out is 1, so log lines read `session 1`, `session 2`
/// and so on.
///
/// # Examples
///
/// ```rust
/// use ws_ssh_bridge::domain::{SessionId, SessionIdCounter};
///
/// let ids = SessionIdCounter::new();
/// assert_eq!(ids.next(), SessionId(1));
/// assert_eq!(ids.next(), SessionId(2));
/// ```
#[derive(Debug)]
pub struct SessionIdCounter {
    /// The id the next call to [`SessionIdCounter::next`] returns.
    next: AtomicU64,
}

impl SessionIdCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next id and atomically advances the counter.
    ///
    /// `Ordering::Relaxed` is enough: the counter only needs atomicity of the
    /// increment itself, it does not publish any other memory.
    pub fn next(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns how many ids have been issued so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for SessionIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_session_id_is_one() {
        // Arrange
        let ids = SessionIdCounter::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, SessionId(1));
    }

    #[test]
    fn test_session_ids_strictly_increase() {
        // Arrange
        let ids = SessionIdCounter::new();

        // Act
        let values: Vec<SessionId> = (0..100).map(|_| ids.next()).collect();

        // Assert
        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must strictly increase");
        }
    }

    #[test]
    fn test_issued_counts_handed_out_ids() {
        let ids = SessionIdCounter::default();
        assert_eq!(ids.issued(), 0);
        ids.next();
        ids.next();
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_session_ids_are_unique_across_threads() {
        // Arrange
        let ids = Arc::new(SessionIdCounter::new());
        let thread_count = 8;
        let per_thread = 1000;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..per_thread).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<SessionId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
    }

    #[test]
    fn test_session_id_displays_as_plain_number() {
        assert_eq!(SessionId(42).to_string(), "42");
    }
}
