//! Different implementations of a common async API for use in socksdial
//!
//! Currently only tokio is provided here; tests use the in-memory runtime
//! from `socksdial-rtmock`.

#[cfg(feature = "tokio")]
pub(crate) mod tokio;
