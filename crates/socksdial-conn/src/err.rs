//! Declare error types for socksdial-conn

use crate::endpoint::{Endpoint, ProxyCandidate};

use socksdial_rtcompat::TimeoutError;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// An error returned while dialing, negotiating, or using a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The deadline for the whole operation passed.
    #[error("Connect timed out")]
    Timeout,

    /// The proxy sent fewer bytes than the reply needs.
    #[error("Malformed reply from SOCKS proxy: expected {expected_len} bytes, got {got_len}")]
    MalformedReply {
        /// How many bytes we needed.
        expected_len: usize,
        /// How many bytes we got before giving up.
        got_len: usize,
    },

    /// The proxy sent a reply with the right length but nonsensical
    /// contents.
    #[error("Malformed reply from SOCKS proxy: {0}")]
    BadReply(&'static str),

    /// The proxy refused the request, with a status code.
    #[error("SOCKS request failed: {reason} (code {code})")]
    ProtocolRejected {
        /// The status byte the proxy sent.
        code: u8,
        /// What the status byte means.
        reason: &'static str,
    },

    /// The proxy refused our credentials, or we had none to offer.
    #[error("SOCKS authentication failed")]
    AuthenticationFailed,

    /// The proxy accepted none of the authentication methods we offered.
    #[error("SOCKS proxy accepted no authentication method we offered")]
    NoAcceptableMethods,

    /// The address can't be expressed in the protocol we are speaking.
    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(&'static str),

    /// Every proxy candidate failed.
    #[error("{0}")]
    AllProxiesFailed(ProxyFailures),

    /// The socket was closed, or a close is pending.
    #[error("Socket is closed")]
    HandleClosed,

    /// The peer reset the connection.
    #[error("Connection reset")]
    ConnectionReset,

    /// We were asked to dial an endpoint that has no address, without a
    /// proxy to resolve it for us.
    #[error("Cannot connect directly to unresolved address {0}")]
    UnresolvedAddress(String),

    /// A SOCKS message couldn't be encoded or decoded.
    #[error("SOCKS protocol error: {0}")]
    Proto(#[from] socksdial_proto::Error),

    /// An error from the network.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value made no sense.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<TimeoutError> for Error {
    fn from(_: TimeoutError) -> Error {
        Error::Timeout
    }
}

impl Error {
    /// Return true if this error is (or ends in) a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::AllProxiesFailed(f) => f.last_error().map_or(false, Error::is_timeout),
            _ => false,
        }
    }
}

/// Every failure we saw while trying a list of proxies, in order.
///
/// Displayed like this:
///
/// ```text
/// Tried to connect to example.com:443 through 2 proxies, but all attempts failed.
/// Attempt 1 (socks5 proxy 192.0.2.1:1080): Connect timed out
/// Attempt 2 (socks4 proxy 192.0.2.2:1080): SOCKS request failed: request rejected (code 91)
/// ```
#[derive(Debug)]
pub struct ProxyFailures {
    /// The endpoint we were trying to reach.
    target: Endpoint,
    /// Each candidate we tried, and how it failed.
    errors: Vec<(ProxyCandidate, Error)>,
}

impl ProxyFailures {
    /// Start recording failures for an attempt to reach `target`.
    pub(crate) fn new(target: Endpoint) -> Self {
        ProxyFailures {
            target,
            errors: Vec::new(),
        }
    }

    /// Record that `candidate` failed with `err`.
    pub(crate) fn push(&mut self, candidate: ProxyCandidate, err: Error) {
        self.errors.push((candidate, err));
    }

    /// Return the most recent failure.
    pub fn last_error(&self) -> Option<&Error> {
        self.errors.last().map(|(_, e)| e)
    }

    /// Return every candidate we tried, along with its error.
    pub fn attempts(&self) -> impl Iterator<Item = (&ProxyCandidate, &Error)> {
        self.errors.iter().map(|(c, e)| (c, e))
    }

    /// Return the number of failed attempts.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Return true if nothing has failed yet.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Display for ProxyFailures {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "Unable to connect to {} (no proxies tried)", self.target),
            1 => write!(
                f,
                "Unable to connect to {} through {}: {}",
                self.target, self.errors[0].0, self.errors[0].1
            ),
            n => {
                write!(
                    f,
                    "Tried to connect to {} through {} proxies, but all attempts failed.",
                    self.target, n
                )?;
                for (idx, (candidate, e)) in self.errors.iter().enumerate() {
                    write!(f, "\nAttempt {} ({}): {}", idx + 1, candidate, e)?;
                }
                Ok(())
            }
        }
    }
}
