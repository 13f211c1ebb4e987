//! Endpoints, and the proxies we might reach them through.

use socksdial_proto::{SocksAddr, SocksHostname, SocksVersion};

use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// A place to connect to: a host name, an address, or both, plus a port.
///
/// An endpoint with no address is *unresolved*.  We never resolve names
/// ourselves: unresolved endpoints can only be reached through a SOCKS5
/// proxy, which resolves them for us.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// The host name, if we know one.
    host: Option<String>,
    /// The address, if we know one.
    address: Option<IpAddr>,
    /// The TCP port.
    port: u16,
}

/// An error from parsing an [`Endpoint`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EndpointParseError {
    /// There was no `:port` at the end.
    #[error("Missing port in {0:?}")]
    MissingPort(String),
    /// The port wasn't a number between 0 and 65535.
    #[error("Invalid port in {0:?}")]
    BadPort(String),
    /// There was nothing before the port.
    #[error("Missing host in {0:?}")]
    MissingHost(String),
}

impl Endpoint {
    /// Return an endpoint for a resolved socket address, with no name.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Endpoint {
            host: None,
            address: Some(addr.ip()),
            port: addr.port(),
        }
    }

    /// Return an unresolved endpoint for `host`:`port`.
    pub fn unresolved<S: Into<String>>(host: S, port: u16) -> Self {
        Endpoint {
            host: Some(host.into()),
            address: None,
            port,
        }
    }

    /// Return an endpoint that has both a name and an address.
    pub fn resolved<S: Into<String>>(host: S, address: IpAddr, port: u16) -> Self {
        Endpoint {
            host: Some(host.into()),
            address: Some(address),
            port,
        }
    }

    /// Return the host name, if there is one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Return the address, if there is one.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Return the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return true if this endpoint has no address.
    pub fn is_unresolved(&self) -> bool {
        self.address.is_none()
    }

    /// Return a socket address for this endpoint, if it is resolved.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address.map(|a| SocketAddr::new(a, self.port))
    }

    /// Return the host name if there is one, and the address otherwise.
    pub fn host_string(&self) -> String {
        match (&self.host, self.address) {
            (Some(h), _) => h.clone(),
            (None, Some(a)) => a.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Return the address to put in a SOCKS5 request for this endpoint.
    ///
    /// Resolved endpoints are sent by address; unresolved ones by name,
    /// for the proxy to resolve.
    pub(crate) fn socks_addr(&self) -> socksdial_proto::Result<SocksAddr> {
        match self.address {
            Some(a) => Ok(SocksAddr::Ip(a)),
            None => {
                let h = SocksHostname::try_from(self.host_string())?;
                Ok(SocksAddr::Hostname(h))
            }
        }
    }

    /// Build an endpoint from an address and port in a SOCKS reply.
    pub(crate) fn from_socks(addr: SocksAddr, port: u16) -> Self {
        match addr {
            SocksAddr::Ip(a) => Endpoint::from_socket_addr(SocketAddr::new(a, port)),
            SocksAddr::Hostname(h) => Endpoint::unresolved(String::from(h), port),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::from_socket_addr(addr)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.host, self.address) {
            (Some(h), _) => write!(f, "{}:{}", h, self.port),
            (None, Some(a)) => write!(f, "{}", SocketAddr::new(a, self.port)),
            (None, None) => write!(f, "?:{}", self.port),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parse `host:port`, `a.b.c.d:port`, or `[v6]:port`.
    ///
    /// Literal addresses produce resolved endpoints; anything else
    /// produces an unresolved one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(sa) = s.parse::<SocketAddr>() {
            return Ok(sa.into());
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointParseError::BadPort(s.to_string()))?;
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(s.to_string()));
        }
        match host.parse::<IpAddr>() {
            // Only IPv4 gets here: a bare IPv6 address followed by a port
            // is ambiguous, and fails to parse above.
            Ok(ip) => Ok(Endpoint::from_socket_addr(SocketAddr::new(ip, port))),
            Err(_) => Ok(Endpoint::unresolved(host, port)),
        }
    }
}

/// A SOCKS proxy that we might reach an endpoint through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyCandidate {
    /// Where the proxy is.
    address: Endpoint,
    /// Which version of SOCKS to speak to it.
    version: SocksVersion,
}

impl ProxyCandidate {
    /// Return a new candidate for a proxy at `address` speaking `version`.
    pub fn new(address: Endpoint, version: SocksVersion) -> Self {
        ProxyCandidate { address, version }
    }

    /// Return the proxy's address.
    pub fn address(&self) -> &Endpoint {
        &self.address
    }

    /// Return the SOCKS version to use with this proxy.
    pub fn version(&self) -> SocksVersion {
        self.version
    }
}

impl Display for ProxyCandidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} proxy {}", self.version, self.address)
    }
}
