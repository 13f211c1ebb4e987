//! Values and addresses that appear in SOCKS messages.

use crate::{Error, Result};

use caret::caret_int;
use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;

/// A version of the SOCKS protocol that we can speak as a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksVersion {
    /// SOCKS4: IPv4 targets only, no authentication beyond a user id.
    V4,
    /// SOCKS5 (RFC 1928).
    V5,
}

impl SocksVersion {
    /// Return the version byte that starts requests in this version.
    pub fn as_u8(self) -> u8 {
        match self {
            SocksVersion::V4 => 4,
            SocksVersion::V5 => 5,
        }
    }
}

impl TryFrom<u8> for SocksVersion {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            4 => Ok(SocksVersion::V4),
            5 => Ok(SocksVersion::V5),
            other => Err(Error::BadVersion(other)),
        }
    }
}

impl fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socks{}", self.as_u8())
    }
}

/// The address part of a SOCKS request, or of a BIND reply.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksAddr {
    /// A DNS hostname, for the proxy to resolve.
    Hostname(SocksHostname),
    /// An IP address.
    Ip(IpAddr),
}

/// A hostname short enough to fit in a SOCKS5 DOMAIN address (255 bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksHostname(String);

caret_int! {
    /// The command byte of a SOCKS request.
    pub struct SocksCmd(u8) {
        /// Open an outbound stream to the target.
        CONNECT = 1,
        /// Accept one inbound stream from the target.
        BIND = 2,
    }
}

caret_int! {
    /// An authentication method offered by a SOCKS5 client, or chosen by
    /// the proxy.
    pub struct SocksAuthMethod(u8) {
        /// No authentication at all.
        NO_AUTH = 0x00,
        /// GSSAPI; never offered by us.
        GSSAPI = 0x01,
        /// A username/password subnegotiation follows.
        USERNAME_PASSWORD = 0x02,
        /// The proxy liked none of the methods we offered.
        NO_ACCEPTABLE = 0xFF,
    }
}

caret_int! {
    /// The address type byte in a SOCKS5 request or reply.
    pub struct SocksAddrType(u8) {
        /// Four bytes of IPv4 address.
        IPV4 = 0x01,
        /// A length byte, then that many bytes of hostname.
        DOMAIN = 0x03,
        /// Sixteen bytes of IPv6 address.
        IPV6 = 0x04,
    }
}

caret_int! {
    /// The status byte of a SOCKS4 reply.
    pub struct Socks4Status(u8) {
        /// Success.
        GRANTED = 90,
        /// Refused, for no stated reason.
        REJECTED = 91,
        /// Refused: the proxy couldn't reach our identd.
        UNREACHABLE = 92,
        /// Refused: identd disagreed about our user id.
        AUTH_FAILED = 93,
    }
}

caret_int! {
    /// The status byte of a SOCKS5 reply.  Values above 8 are unassigned.
    pub struct Socks5Status(u8) {
        /// Success.
        SUCCEEDED = 0x00,
        /// Something went wrong inside the proxy.
        GENERAL_FAILURE = 0x01,
        /// The proxy's rules forbid this connection.
        NOT_ALLOWED = 0x02,
        /// No route to the target's network.
        NETWORK_UNREACHABLE = 0x03,
        /// No route to the target host.
        HOST_UNREACHABLE = 0x04,
        /// The target refused the connection.
        CONNECTION_REFUSED = 0x05,
        /// The connection attempt expired in transit.
        TTL_EXPIRED = 0x06,
        /// The proxy doesn't do that command.
        COMMAND_NOT_SUPPORTED = 0x07,
        /// The proxy doesn't understand that address type.
        ADDRTYPE_NOT_SUPPORTED = 0x08,
    }
}

impl Socks4Status {
    /// Return a human-readable description of this status.
    ///
    /// Unknown values are described as malformed, since SOCKS4 defines
    /// no others.
    pub fn description(self) -> &'static str {
        match self {
            Socks4Status::GRANTED => "request granted",
            Socks4Status::REJECTED => "request rejected",
            Socks4Status::UNREACHABLE => "destination unreachable",
            Socks4Status::AUTH_FAILED => "authentication failed",
            _ => "malformed reply",
        }
    }
}

impl Socks5Status {
    /// Return a human-readable description of this status.
    pub fn description(self) -> &'static str {
        match self {
            Socks5Status::SUCCEEDED => "succeeded",
            Socks5Status::GENERAL_FAILURE => "general failure",
            Socks5Status::NOT_ALLOWED => "not allowed by ruleset",
            Socks5Status::NETWORK_UNREACHABLE => "network unreachable",
            Socks5Status::HOST_UNREACHABLE => "host unreachable",
            Socks5Status::CONNECTION_REFUSED => "connection refused",
            Socks5Status::TTL_EXPIRED => "TTL expired",
            Socks5Status::COMMAND_NOT_SUPPORTED => "command not supported",
            Socks5Status::ADDRTYPE_NOT_SUPPORTED => "address type not supported",
            _ => "unassigned",
        }
    }
}

impl SocksAddrType {
    /// Return the length of the address that follows this type byte, if it
    /// is fixed.
    ///
    /// Domain names have a variable length, given by the byte after the
    /// type; for them (and for unknown types) this returns None.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            SocksAddrType::IPV4 => Some(4),
            SocksAddrType::IPV6 => Some(16),
            _ => None,
        }
    }
}

impl SocksAddr {
    /// Return the SOCKS5 address type byte that this address is sent with.
    pub fn addr_type(&self) -> SocksAddrType {
        match self {
            SocksAddr::Ip(IpAddr::V4(_)) => SocksAddrType::IPV4,
            SocksAddr::Ip(IpAddr::V6(_)) => SocksAddrType::IPV6,
            SocksAddr::Hostname(_) => SocksAddrType::DOMAIN,
        }
    }
}

impl SocksHostname {
    /// The longest hostname a DOMAIN address can carry.
    pub const MAX_LEN: usize = 255;

    /// Build a hostname from the bytes a proxy sent us.
    ///
    /// Anything the proxy sends is accepted.  Bytes that aren't UTF-8 are
    /// taken one character per byte, as Latin-1.
    pub fn from_wire(bytes: &[u8]) -> Self {
        let name = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_owned(),
            Err(_) => bytes.iter().copied().map(char::from).collect(),
        };
        SocksHostname(name)
    }

    /// Return the hostname as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SocksHostname {
    type Error = Error;
    fn try_from(name: String) -> Result<SocksHostname> {
        match name.len() {
            n if n > Self::MAX_LEN => Err(Error::HostnameTooLong(n)),
            _ => Ok(SocksHostname(name)),
        }
    }
}

impl AsRef<str> for SocksHostname {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<SocksHostname> for String {
    fn from(name: SocksHostname) -> String {
        name.0
    }
}

impl From<IpAddr> for SocksAddr {
    fn from(ip: IpAddr) -> SocksAddr {
        SocksAddr::Ip(ip)
    }
}

impl fmt::Display for SocksAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAddr::Ip(ip) => ip.fmt(f),
            SocksAddr::Hostname(name) => f.write_str(name.as_str()),
        }
    }
}
