//! Support for mocking with runtimes.
//!
//! This crate should only be used for writing tests.
//!
//! We support mocking the passage of time ([`time::MockSleepProvider`]),
//! making connected handle pairs that can be shut down, reset, and
//! counted ([`io::MockHandle`]), and impersonating a small network of
//! hosts ([`net::MockNetwork`]).  [`MockRuntime`] bundles a clock and a
//! network view into something that implements
//! [`socksdial_rtcompat::Runtime`].

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod io;
pub mod net;
pub mod time;

mod runtime;
pub use runtime::MockRuntime;
