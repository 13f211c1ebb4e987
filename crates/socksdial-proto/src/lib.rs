//! The client side of the SOCKS4 and SOCKS5 protocols.
//!
//! SOCKS is an old and somewhat janky protocol for telling a TCP
//! proxy where to connect.  This crate knows how to write the requests a
//! SOCKS *client* sends, and how to parse the replies a proxy sends back.
//! It never does any I/O: the caller reads and writes the bytes, and
//! decides how many to read by asking the decoders here.
//!
//! For more information about SOCKS:
//!
//!   * SOCKS5 is specified in
//!     [RFC 1928](https://tools.ietf.org/html/rfc1928), and see also
//!     [RFC 1929](https://tools.ietf.org/html/rfc1929) for
//!     Username/Password authentication in SOCKS5.
//!   * [The wikipedia article](https://en.wikipedia.org/wiki/SOCKS)
//!     is the best surviving documentation for SOCKS4.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::exhaustive_structs)]

mod client;
mod err;
mod msg;

pub use client::{
    socks4_request, socks5_greeting, socks5_request, userpass_request, Socks4Reply,
    Socks5ReplyHeader, SOCKS4_REPLY_LEN, SOCKS5_REPLY_HEADER_LEN,
};
pub use err::Error;
pub use msg::{
    SocksAddr, SocksAddrType, SocksAuthMethod, SocksCmd, SocksHostname, SocksVersion,
    Socks4Status, Socks5Status,
};

/// A Result type for the socksdial_proto crate.
pub type Result<T> = std::result::Result<T, Error>;
