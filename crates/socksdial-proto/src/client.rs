//! Encoders for the messages a SOCKS client sends, and decoders for the
//! replies it gets back.
//!
//! Every reply in SOCKS4 and SOCKS5 has either a fixed length or a length
//! that can be learned from a fixed-length prefix, so the decoders here
//! take exactly-sized inputs and tell the caller how much more to read.

use crate::msg::{
    SocksAddr, SocksAddrType, SocksAuthMethod, SocksCmd, SocksHostname, Socks4Status,
    Socks5Status,
};
use crate::{Error, Result};

use bytes::{Buf, BufMut};
use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Length of every SOCKS4 reply.
pub const SOCKS4_REPLY_LEN: usize = 8;

/// Length of the fixed part of a SOCKS5 request reply.
pub const SOCKS5_REPLY_HEADER_LEN: usize = 4;

/// Encode a SOCKS4 request.
///
/// The user id is sent as-is, followed by a NUL terminator.
pub fn socks4_request(cmd: SocksCmd, addr: Ipv4Addr, port: u16, user_id: &[u8]) -> Vec<u8> {
    let mut w = Vec::with_capacity(9 + user_id.len());
    w.put_u8(4);
    w.put_u8(cmd.into());
    w.put_u16(port);
    w.put_slice(&addr.octets());
    w.put_slice(user_id);
    w.put_u8(0);
    w
}

/// Encode the SOCKS5 greeting, offering `methods`.
pub fn socks5_greeting(methods: &[SocksAuthMethod]) -> Vec<u8> {
    let mut w = Vec::with_capacity(2 + methods.len());
    w.put_u8(5);
    // We never offer more than a handful of methods.
    w.put_u8(methods.len() as u8);
    for m in methods {
        w.put_u8((*m).into());
    }
    w
}

/// Encode an RFC 1929 username/password request.
///
/// Either field may be empty; neither may be longer than 255 bytes.
pub fn userpass_request(username: &[u8], password: &[u8]) -> Result<Vec<u8>> {
    let ulen = u8::try_from(username.len()).map_err(|_| Error::CredentialTooLong(username.len()))?;
    let plen = u8::try_from(password.len()).map_err(|_| Error::CredentialTooLong(password.len()))?;
    let mut w = Vec::with_capacity(3 + username.len() + password.len());
    w.put_u8(1);
    w.put_u8(ulen);
    w.put_slice(username);
    w.put_u8(plen);
    w.put_slice(password);
    Ok(w)
}

/// Encode a SOCKS5 request for `cmd` on `addr`:`port`.
pub fn socks5_request(cmd: SocksCmd, addr: &SocksAddr, port: u16) -> Vec<u8> {
    let mut w = Vec::new();
    w.put_u8(5);
    w.put_u8(cmd.into());
    w.put_u8(0); // reserved.
    w.put_u8(addr.addr_type().into());
    match addr {
        SocksAddr::Ip(IpAddr::V4(ip)) => w.put_slice(&ip.octets()),
        SocksAddr::Ip(IpAddr::V6(ip)) => w.put_slice(&ip.octets()),
        SocksAddr::Hostname(h) => {
            let h: &str = h.as_ref();
            // SocksHostname guarantees that this fits.
            w.put_u8(h.len() as u8);
            w.put_slice(h.as_bytes());
        }
    }
    w.put_u16(port);
    w
}

/// A decoded SOCKS4 reply.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Socks4Reply {
    /// The first byte of the reply.  Proxies send 0 or 4 here; we don't
    /// check it.
    pub version: u8,
    /// The status the proxy reported.
    pub status: Socks4Status,
    /// The port from the reply.  Only meaningful for BIND.
    pub port: u16,
    /// The address from the reply.  Only meaningful for BIND.
    pub addr: Ipv4Addr,
}

impl Socks4Reply {
    /// Decode a SOCKS4 reply from exactly [`SOCKS4_REPLY_LEN`] bytes.
    pub fn decode(mut input: &[u8]) -> Result<Self> {
        if input.len() < SOCKS4_REPLY_LEN {
            return Err(Error::Truncated);
        }
        let version = input.get_u8();
        let status = input.get_u8().into();
        let port = input.get_u16();
        let addr = Ipv4Addr::from(input.get_u32());
        Ok(Socks4Reply {
            version,
            status,
            port,
            addr,
        })
    }
}

/// The fixed-length prefix of a SOCKS5 request reply.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Socks5ReplyHeader {
    /// The version byte; should be 5.
    pub version: u8,
    /// The status the proxy reported.
    pub status: Socks5Status,
    /// The type of the bound address that follows.
    pub addr_type: SocksAddrType,
}

impl Socks5ReplyHeader {
    /// Decode the header from exactly [`SOCKS5_REPLY_HEADER_LEN`] bytes.
    pub fn decode(mut input: &[u8]) -> Result<Self> {
        if input.len() < SOCKS5_REPLY_HEADER_LEN {
            return Err(Error::Truncated);
        }
        let version = input.get_u8();
        let status = input.get_u8().into();
        let _reserved = input.get_u8();
        let addr_type = input.get_u8().into();
        Ok(Socks5ReplyHeader {
            version,
            status,
            addr_type,
        })
    }

    /// Return the number of bytes of address and port that follow this
    /// header, if it doesn't depend on a length byte.
    ///
    /// For a domain address, read one more byte and pass it to
    /// [`domain_remainder_len`](Self::domain_remainder_len).  Unknown
    /// address types are an error.
    pub fn remainder_len(&self) -> Result<Option<usize>> {
        match self.addr_type {
            SocksAddrType::DOMAIN => Ok(None),
            t => match t.fixed_len() {
                Some(n) => Ok(Some(n + 2)),
                None => Err(Error::UnsupportedAddressType(t.into())),
            },
        }
    }

    /// Given the length byte of a domain address, return the number of
    /// bytes of hostname and port that follow it.
    pub fn domain_remainder_len(len_byte: u8) -> usize {
        usize::from(len_byte) + 2
    }

    /// Decode the bound address and port that follow this header.
    ///
    /// For a domain address, `input` must start with the length byte.
    pub fn decode_addr(&self, mut input: &[u8]) -> Result<(SocksAddr, u16)> {
        let addr = match self.addr_type {
            SocksAddrType::IPV4 => {
                if input.len() < 4 + 2 {
                    return Err(Error::Truncated);
                }
                SocksAddr::Ip(Ipv4Addr::from(input.get_u32()).into())
            }
            SocksAddrType::IPV6 => {
                if input.len() < 16 + 2 {
                    return Err(Error::Truncated);
                }
                SocksAddr::Ip(Ipv6Addr::from(input.get_u128()).into())
            }
            SocksAddrType::DOMAIN => {
                if input.is_empty() {
                    return Err(Error::Truncated);
                }
                let hlen = usize::from(input.get_u8());
                if input.len() < hlen + 2 {
                    return Err(Error::Truncated);
                }
                let hostname = SocksHostname::from_wire(&input[..hlen]);
                input.advance(hlen);
                SocksAddr::Hostname(hostname)
            }
            other => return Err(Error::UnsupportedAddressType(other.into())),
        };
        let port = input.get_u16();
        Ok((addr, port))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;
    use std::convert::TryInto;

    #[test]
    fn v4_request() {
        let r = socks4_request(SocksCmd::CONNECT, Ipv4Addr::new(10, 0, 0, 1), 443, b"");
        assert_eq!(r, hex!("04 01 01bb 0a000001 00"));

        let r = socks4_request(SocksCmd::BIND, Ipv4Addr::new(192, 0, 2, 7), 80, b"joe");
        assert_eq!(r, hex!("04 02 0050 c0000207 6a6f65 00"));
    }

    #[test]
    fn v5_greeting_and_auth() {
        let g = socks5_greeting(&[SocksAuthMethod::NO_AUTH, SocksAuthMethod::USERNAME_PASSWORD]);
        assert_eq!(g, hex!("05 02 00 02"));

        let a = userpass_request(b"user", b"").unwrap();
        assert_eq!(a, hex!("01 04 75736572 00"));

        let long = vec![b'x'; 256];
        assert_eq!(
            userpass_request(&long, b"pw"),
            Err(Error::CredentialTooLong(256))
        );
    }

    #[test]
    fn v5_requests() {
        let ip4 = SocksAddr::Ip("198.51.100.3".parse().unwrap());
        assert_eq!(
            socks5_request(SocksCmd::CONNECT, &ip4, 8080),
            hex!("05 01 00 01 c6336403 1f90")
        );

        let ip6 = SocksAddr::Ip("2001:db8::1".parse().unwrap());
        assert_eq!(
            socks5_request(SocksCmd::CONNECT, &ip6, 22),
            hex!("05 01 00 04 20010db8000000000000000000000001 0016")
        );

        let host = SocksAddr::Hostname("example.com".to_string().try_into().unwrap());
        assert_eq!(
            socks5_request(SocksCmd::BIND, &host, 443),
            hex!("05 02 00 03 0b 6578616d706c652e636f6d 01bb")
        );
    }

    #[test]
    fn v4_reply() {
        let r = Socks4Reply::decode(&hex!("00 5a 0000 00000000")).unwrap();
        assert_eq!(r.status, Socks4Status::GRANTED);

        let r = Socks4Reply::decode(&hex!("00 5a 1f90 c0000201")).unwrap();
        assert_eq!(r.port, 8080);
        assert_eq!(r.addr, Ipv4Addr::new(192, 0, 2, 1));

        let r = Socks4Reply::decode(&hex!("04 5b 0000 00000000")).unwrap();
        assert_eq!(r.version, 4);
        assert_eq!(r.status, Socks4Status::REJECTED);

        assert_eq!(Socks4Reply::decode(&hex!("00 5a 00")), Err(Error::Truncated));
    }

    #[test]
    fn v5_reply() {
        let h = Socks5ReplyHeader::decode(&hex!("05 00 00 01")).unwrap();
        assert_eq!(h.status, Socks5Status::SUCCEEDED);
        assert_eq!(h.remainder_len().unwrap(), Some(6));
        let (addr, port) = h.decode_addr(&hex!("c0000209 0438")).unwrap();
        assert_eq!(addr, SocksAddr::Ip("192.0.2.9".parse().unwrap()));
        assert_eq!(port, 1080);

        let h = Socks5ReplyHeader::decode(&hex!("05 00 00 03")).unwrap();
        assert_eq!(h.remainder_len().unwrap(), None);
        assert_eq!(Socks5ReplyHeader::domain_remainder_len(7), 9);
        let (addr, port) = h.decode_addr(&hex!("07 70726f78792e78 0050")).unwrap();
        assert_eq!(addr.to_string(), "proxy.x");
        assert_eq!(port, 80);

        let h = Socks5ReplyHeader::decode(&hex!("05 00 00 04")).unwrap();
        assert_eq!(h.remainder_len().unwrap(), Some(18));

        let h = Socks5ReplyHeader::decode(&hex!("05 05 00 01")).unwrap();
        assert_eq!(h.status, Socks5Status::CONNECTION_REFUSED);

        let h = Socks5ReplyHeader::decode(&hex!("05 00 00 09")).unwrap();
        assert_eq!(h.remainder_len(), Err(Error::UnsupportedAddressType(9)));
        assert!(h.decode_addr(&hex!("0000")).is_err());
    }

    #[test]
    fn non_utf8_domain_reply() {
        let h = Socks5ReplyHeader::decode(&hex!("05 00 00 03")).unwrap();
        let mut body = vec![200_u8];
        body.extend(std::iter::repeat(0xff).take(200));
        body.extend(&hex!("1f90"));
        let (addr, port) = h.decode_addr(&body[..]).unwrap();
        match addr {
            SocksAddr::Hostname(name) => assert_eq!(name.as_str().chars().count(), 200),
            other => panic!("{:?}", other),
        }
        assert_eq!(port, 8080);
    }
}
