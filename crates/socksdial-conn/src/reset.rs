//! Track whether the peer has reset a connection.

use std::sync::atomic::{AtomicU8, Ordering};

/// How far along a connection is toward being considered reset.
///
/// States only move forward: `NotReset`, then `ResetPending`, then
/// `Reset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[allow(clippy::exhaustive_enums)]
pub enum ResetState {
    /// No reset seen.
    NotReset,
    /// The platform reported a reset, but there may still be buffered
    /// data to read.
    ResetPending,
    /// The connection is reset; reads fail without touching the platform.
    Reset,
}

/// A monotonic, lock-free [`ResetState`].
#[derive(Debug)]
pub struct ResetTracker {
    /// The current state, as a `u8`.
    state: AtomicU8,
}

/// Encoding of [`ResetState::NotReset`].
const NOT_RESET: u8 = 0;
/// Encoding of [`ResetState::ResetPending`].
const PENDING: u8 = 1;
/// Encoding of [`ResetState::Reset`].
const RESET: u8 = 2;

impl ResetTracker {
    /// Return a tracker in the `NotReset` state.
    pub fn new() -> Self {
        ResetTracker {
            state: AtomicU8::new(NOT_RESET),
        }
    }

    /// Move to `ResetPending`, if we were in `NotReset`.
    pub fn mark_pending(&self) {
        let _ = self
            .state
            .compare_exchange(NOT_RESET, PENDING, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Move to `Reset`.
    pub fn mark_reset(&self) {
        self.state.store(RESET, Ordering::SeqCst);
    }

    /// Return true if we are in `Reset`.
    pub fn is_reset(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RESET
    }

    /// Return true if we are in `ResetPending`.
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::SeqCst) == PENDING
    }

    /// Return the current state.
    pub fn state(&self) -> ResetState {
        match self.state.load(Ordering::SeqCst) {
            NOT_RESET => ResetState::NotReset,
            PENDING => ResetState::ResetPending,
            _ => ResetState::Reset,
        }
    }
}

impl Default for ResetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monotonic() {
        let r = ResetTracker::new();
        assert_eq!(r.state(), ResetState::NotReset);
        r.mark_pending();
        r.mark_pending();
        assert!(r.is_pending());
        assert!(!r.is_reset());
        r.mark_reset();
        assert_eq!(r.state(), ResetState::Reset);
        r.mark_pending();
        assert_eq!(r.state(), ResetState::Reset);
        assert!(!r.is_pending());
    }

    #[test]
    fn straight_to_reset() {
        let r = ResetTracker::default();
        r.mark_reset();
        assert!(r.is_reset());
        r.mark_pending();
        assert!(r.is_reset());
    }
}
