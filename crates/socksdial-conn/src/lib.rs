//! Dial TCP connections, directly or through SOCKS4 and SOCKS5 proxies.
//!
//! # Overview
//!
//! The entry point is [`ConnectionCoordinator`].  Given an [`Endpoint`],
//! it asks a [`ProxySelector`] which proxies to try, connects to each in
//! turn, and runs a SOCKS handshake with it using a [`SocksNegotiator`].
//! The first candidate that works wins; the rest never get tried.  A
//! single [`Deadline`] covers the whole process, across every candidate.
//!
//! The result is a [`Socket`], which can be shared by a reader, a writer
//! and a closer at the same time.  Each socket owns a [`HandleGuard`]
//! that decides when the underlying handle can really be released, and a
//! [`ResetTracker`] that remembers whether the peer has reset the
//! connection.
//!
//! Everything here is generic over a
//! [`Runtime`](socksdial_rtcompat::Runtime), so it can run over real
//! sockets or over the in-memory network in `socksdial-rtmock`.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![warn(clippy::needless_pass_by_value)]

mod auth;
mod config;
mod coordinator;
mod deadline;
mod endpoint;
mod err;
mod handle;
mod listener;
mod negotiate;
mod reset;
mod selector;
mod socket;

pub use auth::{Authenticator, Credentials, StaticAuthenticator};
pub use config::{ConnectConfig, ConnectConfigBuilder, ProxyConfig, ProxyConfigBuilder};
pub use coordinator::{ConnectionCoordinator, CoordinatorBuilder};
pub use deadline::Deadline;
pub use endpoint::{Endpoint, EndpointParseError, ProxyCandidate};
pub use err::{Error, ProxyFailures};
pub use handle::{HandleGuard, HandleLease};
pub use listener::BoundListener;
pub use negotiate::SocksNegotiator;
pub use reset::{ResetState, ResetTracker};
pub use selector::{ProxyChoice, ProxySelector, StaticSelector};
pub use socket::Socket;

pub use socksdial_proto::SocksVersion;

/// A Result type for the socksdial-conn crate.
pub type Result<T> = std::result::Result<T, Error>;
