//! Declare an error type for socksdial_proto
use thiserror::Error;

/// An error that occurs while encoding or decoding a SOCKS message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Tried to decode a message that wasn't complete.
    #[error("SOCKS message truncated")]
    Truncated,

    /// A hostname doesn't fit in the one-byte length field SOCKS gives it.
    #[error("Hostname too long for SOCKS: {0} bytes")]
    HostnameTooLong(usize),

    /// A username or password doesn't fit in its one-byte length field.
    #[error("SOCKS credential field too long: {0} bytes")]
    CredentialTooLong(usize),

    /// The proxy used an address type that we don't know.
    #[error("Unrecognized SOCKS address type {0}")]
    UnsupportedAddressType(u8),

    /// A SOCKS version that we don't implement.
    #[error("Unsupported SOCKS version {0}")]
    BadVersion(u8),
}
