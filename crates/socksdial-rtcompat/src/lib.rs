//! Compatibility between different async runtimes for socksdial.
//!
//! We try to isolate the runtime and the operating system's socket layer
//! in a single place, so that the rest of socksdial depends only on a
//! minimal set of operations:
//!
//!   * [`SleepProvider`]: sleeping, and learning the current monotonic time.
//!   * [`PlatformSocket`]: opening TCP connections and listeners, returning
//!     [`SocketHandle`]s that support shared (`&self`) reads and writes,
//!     `available()`, and shutdown/close.
//!   * [`SpawnBlocking`]: driving a future to completion from synchronous
//!     code.
//!
//! A type implementing all of these is a [`Runtime`].  One real
//! implementation (tokio) lives here, behind the `tokio` feature; the
//! `socksdial-rtmock` crate provides an in-memory one for tests.  Which
//! one to use is decided once, at construction time, by calling a factory
//! such as [`create_runtime()`].

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![warn(clippy::needless_pass_by_value)]

pub(crate) mod impls;
mod timer;
mod traits;

#[cfg(all(test, feature = "tokio"))]
mod test;

pub use timer::{SleepProviderExt, Timeout, TimeoutError};
pub use traits::{
    PlatformSocket, Runtime, SleepProvider, SocketHandle, SocketListener, SpawnBlocking,
};

#[cfg(feature = "tokio")]
pub use impls::tokio::{
    create_runtime, current_runtime, test_with_runtime, TcpHandle, TcpListener, TokioRuntime,
    TokioRuntimeHandle,
};
