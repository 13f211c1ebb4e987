//! The client side of a SOCKS4 or SOCKS5 handshake, over an already
//! connected control socket.
//!
//! Every read and write here is bounded by the one [`Deadline`] that the
//! whole connect shares.  Whenever a handshake fails, the control socket is
//! closed before the error is returned: a half-negotiated proxy connection
//! is never handed back to anybody.

use crate::auth::{os_user_name, Authenticator, Credentials};
use crate::deadline::Deadline;
use crate::endpoint::Endpoint;
use crate::socket::Socket;
use crate::{Error, Result};

use futures::Future;
use socksdial_proto::{
    socks4_request, socks5_greeting, socks5_request, userpass_request, SocksAddr,
    SocksAuthMethod, SocksCmd, SocksVersion, Socks4Reply, Socks4Status, Socks5ReplyHeader,
    Socks5Status, SOCKS4_REPLY_LEN, SOCKS5_REPLY_HEADER_LEN,
};
use socksdial_rtcompat::{Runtime, SocketHandle};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, trace};

/// How many reads we make while waiting for one reply, before deciding
/// that the proxy is misbehaving.
const READ_ATTEMPTS: usize = 3;

/// The authentication methods we offer to SOCKS5 proxies, in order.
const OFFERED_METHODS: [SocksAuthMethod; 2] =
    [SocksAuthMethod::NO_AUTH, SocksAuthMethod::USERNAME_PASSWORD];

/// Drives one SOCKS handshake with one proxy.
pub struct SocksNegotiator<'a, R: Runtime> {
    /// Clock for the deadline.
    runtime: &'a R,
    /// The proxy we're talking to.
    proxy: &'a Endpoint,
    /// When the whole operation has to be done by.
    deadline: Deadline,
    /// Where to get SOCKS5 credentials.
    authenticator: Option<&'a dyn Authenticator>,
    /// The SOCKS4 user id to send, if configured.
    user_id: Option<&'a str>,
}

impl<'a, R: Runtime> SocksNegotiator<'a, R> {
    /// Return a negotiator for the proxy at `proxy`, bounded by `deadline`.
    pub fn new(runtime: &'a R, proxy: &'a Endpoint, deadline: Deadline) -> Self {
        SocksNegotiator {
            runtime,
            proxy,
            deadline,
            authenticator: None,
            user_id: None,
        }
    }

    /// Use `authenticator` for SOCKS5 username/password authentication.
    pub fn with_authenticator(mut self, authenticator: Option<&'a dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Send `user_id` in SOCKS4 requests, instead of the OS user name.
    pub fn with_user_id(mut self, user_id: Option<&'a str>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Ask the proxy to connect to `target`, speaking `version`.
    ///
    /// On success, returns the endpoint the proxy connected us to.
    pub async fn connect(
        &self,
        sock: &Socket<R::Handle>,
        target: &Endpoint,
        version: SocksVersion,
    ) -> Result<Endpoint> {
        match version {
            SocksVersion::V4 => self.connect_v4(sock, target).await,
            SocksVersion::V5 => self.connect_v5(sock, target).await,
        }
    }

    /// Ask a SOCKS4 proxy to connect to `target`.
    ///
    /// SOCKS4 can only express IPv4 addresses.
    pub async fn connect_v4(&self, sock: &Socket<R::Handle>, target: &Endpoint) -> Result<Endpoint> {
        closing_on_error(sock, async {
            self.request_v4(sock, SocksCmd::CONNECT, target).await?;
            Result::Ok(target.clone())
        })
        .await
    }

    /// Ask a SOCKS5 proxy to connect to `target`.
    ///
    /// If the proxy answers our greeting with something other than SOCKS5,
    /// we assume it only speaks SOCKS4, and continue in SOCKS4.
    pub async fn connect_v5(&self, sock: &Socket<R::Handle>, target: &Endpoint) -> Result<Endpoint> {
        closing_on_error(sock, async {
            if !self.greet_v5(sock).await? {
                self.request_v4(sock, SocksCmd::CONNECT, target).await?;
                return Ok(target.clone());
            }
            // The bound address of a CONNECT reply is read and ignored.
            self.request_v5(sock, SocksCmd::CONNECT, target).await?;
            Result::Ok(target.clone())
        })
        .await
    }

    /// Ask the proxy to listen for one incoming connection from `target`.
    ///
    /// Returns the endpoint where the proxy is listening, along with the
    /// version actually spoken (which can be SOCKS4 even if we asked for
    /// SOCKS5).  Once the peer arrives, call
    /// [`accept_reply`](Self::accept_reply).
    pub async fn socks_bind(
        &self,
        sock: &Socket<R::Handle>,
        target: &Endpoint,
        version: SocksVersion,
    ) -> Result<(Endpoint, SocksVersion)> {
        closing_on_error(sock, async {
            if version == SocksVersion::V5 && self.greet_v5(sock).await? {
                let (hdr, body) = self.request_v5(sock, SocksCmd::BIND, target).await?;
                let (addr, port) = hdr.decode_addr(&body[..])?;
                return Ok((self.bound_endpoint(addr, port), SocksVersion::V5));
            }
            let reply = self.request_v4(sock, SocksCmd::BIND, target).await?;
            let addr = SocksAddr::Ip(reply.addr.into());
            Result::Ok((self.bound_endpoint(addr, reply.port), SocksVersion::V4))
        })
        .await
    }

    /// Wait for the second reply to a BIND request, and return the
    /// endpoint of the peer that connected.
    pub async fn accept_reply(
        &self,
        sock: &Socket<R::Handle>,
        version: SocksVersion,
    ) -> Result<Endpoint> {
        closing_on_error(sock, async {
            match version {
                SocksVersion::V4 => {
                    let reply = self.read_reply_v4(sock).await?;
                    let addr = SocksAddr::Ip(reply.addr.into());
                    Result::Ok(self.bound_endpoint(addr, reply.port))
                }
                SocksVersion::V5 => {
                    let (hdr, body) = self.read_reply_v5(sock).await?;
                    let (addr, port) = hdr.decode_addr(&body[..])?;
                    Result::Ok(self.bound_endpoint(addr, port))
                }
            }
        })
        .await
    }

    /// Run the authentication sub-protocol for `method`.
    ///
    /// Returns false if we couldn't authenticate.  When the proxy rejects
    /// our credentials, the socket is closed, since the protocol forbids
    /// reusing it.
    pub async fn authenticate(
        &self,
        sock: &Socket<R::Handle>,
        method: SocksAuthMethod,
    ) -> Result<bool> {
        match method {
            SocksAuthMethod::NO_AUTH => Ok(true),
            SocksAuthMethod::USERNAME_PASSWORD => {
                let creds = match self.credentials() {
                    Some(c) => c,
                    None => {
                        debug!("No username available for {}", self.proxy);
                        return Ok(false);
                    }
                };
                let msg = match userpass_request(
                    creds.username.as_bytes(),
                    creds.password.as_deref().unwrap_or("").as_bytes(),
                ) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("Can't send credentials to {}: {}", self.proxy, e);
                        return Ok(false);
                    }
                };
                self.send(sock, &msg).await?;

                let mut reply = [0_u8; 2];
                self.read_exact_reply(sock, &mut reply[..]).await?;
                if reply[1] != 0 {
                    debug!("{} rejected our credentials", self.proxy);
                    sock.close();
                    return Ok(false);
                }
                Ok(true)
            }
            other => {
                debug!("{} chose unsupported auth method {}", self.proxy, other);
                Ok(false)
            }
        }
    }

    /// Read a reply into `buf`, making up to three read attempts.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()`
    /// only if the proxy sent its reply in too many pieces.  Fails if the
    /// stream ends first, or if the deadline passes.
    pub async fn read_reply(&self, sock: &Socket<R::Handle>, buf: &mut [u8]) -> Result<usize> {
        let mut got = 0;
        for _ in 0..READ_ATTEMPTS {
            if got == buf.len() {
                break;
            }
            let n = self
                .deadline
                .run(self.runtime, sock.read(&mut buf[got..]))
                .await??;
            if n == 0 {
                return Err(Error::MalformedReply {
                    expected_len: buf.len(),
                    got_len: got,
                });
            }
            got += n;
        }
        Ok(got)
    }

    /// Like `read_reply`, but treat a short reply as an error.
    async fn read_exact_reply(&self, sock: &Socket<R::Handle>, buf: &mut [u8]) -> Result<()> {
        let got = self.read_reply(sock, buf).await?;
        if got < buf.len() {
            return Err(Error::MalformedReply {
                expected_len: buf.len(),
                got_len: got,
            });
        }
        Ok(())
    }

    /// Write all of `msg` before the deadline.
    async fn send(&self, sock: &Socket<R::Handle>, msg: &[u8]) -> Result<()> {
        self.deadline.run(self.runtime, sock.write_all(msg)).await?
    }

    /// Send the SOCKS5 greeting and authenticate.
    ///
    /// Returns false if the proxy didn't answer in SOCKS5.
    async fn greet_v5(&self, sock: &Socket<R::Handle>) -> Result<bool> {
        self.send(sock, &socks5_greeting(&OFFERED_METHODS[..]))
            .await?;
        let mut reply = [0_u8; 2];
        self.read_exact_reply(sock, &mut reply[..]).await?;
        if reply[0] != SocksVersion::V5.as_u8() {
            debug!(
                "{} answered with version {}; falling back to SOCKS4",
                self.proxy, reply[0]
            );
            return Ok(false);
        }
        let method = SocksAuthMethod::from(reply[1]);
        if method == SocksAuthMethod::NO_ACCEPTABLE {
            return Err(Error::NoAcceptableMethods);
        }
        trace!("{} chose auth method {}", self.proxy, method);
        if !self.authenticate(sock, method).await? {
            return Err(Error::AuthenticationFailed);
        }
        Ok(true)
    }

    /// Send a SOCKS5 request, and return the header of the proxy's
    /// successful reply along with the undecoded address and port.
    async fn request_v5(
        &self,
        sock: &Socket<R::Handle>,
        cmd: SocksCmd,
        target: &Endpoint,
    ) -> Result<(Socks5ReplyHeader, Vec<u8>)> {
        let addr = target.socks_addr()?;
        self.send(sock, &socks5_request(cmd, &addr, target.port()))
            .await?;
        self.read_reply_v5(sock).await
    }

    /// Read one SOCKS5 reply, and return its header and the raw bytes of
    /// its address and port.
    async fn read_reply_v5(
        &self,
        sock: &Socket<R::Handle>,
    ) -> Result<(Socks5ReplyHeader, Vec<u8>)> {
        let mut hdr = [0_u8; SOCKS5_REPLY_HEADER_LEN];
        self.read_exact_reply(sock, &mut hdr[..]).await?;
        let hdr = Socks5ReplyHeader::decode(&hdr[..])?;
        if hdr.status != Socks5Status::SUCCEEDED {
            return Err(Error::ProtocolRejected {
                code: hdr.status.into(),
                reason: hdr.status.description(),
            });
        }

        let body = match hdr.remainder_len() {
            Ok(Some(n)) => {
                let mut body = vec![0_u8; n];
                self.read_exact_reply(sock, &mut body[..]).await?;
                body
            }
            Ok(None) => {
                let mut len = [0_u8; 1];
                self.read_exact_reply(sock, &mut len[..]).await?;
                let mut body = vec![0_u8; 1 + Socks5ReplyHeader::domain_remainder_len(len[0])];
                body[0] = len[0];
                self.read_exact_reply(sock, &mut body[1..]).await?;
                body
            }
            Err(_) => {
                return Err(Error::UnsupportedAddressType(
                    "unknown address type in SOCKS5 reply",
                ))
            }
        };
        Ok((hdr, body))
    }

    /// Send a SOCKS4 request, and return the proxy's (successful) reply.
    async fn request_v4(
        &self,
        sock: &Socket<R::Handle>,
        cmd: SocksCmd,
        target: &Endpoint,
    ) -> Result<Socks4Reply> {
        let ip = match target.address() {
            Some(IpAddr::V4(ip)) => ip,
            _ => {
                return Err(Error::UnsupportedAddressType(
                    "SOCKS4 requires an IPv4 address",
                ))
            }
        };
        let user_id = self
            .user_id
            .map(str::to_string)
            .or_else(os_user_name)
            .unwrap_or_default();
        self.send(sock, &socks4_request(cmd, ip, target.port(), user_id.as_bytes()))
            .await?;
        self.read_reply_v4(sock).await
    }

    /// Read one SOCKS4 reply, and fail unless it grants our request.
    async fn read_reply_v4(&self, sock: &Socket<R::Handle>) -> Result<Socks4Reply> {
        let mut buf = [0_u8; SOCKS4_REPLY_LEN];
        self.read_exact_reply(sock, &mut buf[..]).await?;
        let reply = Socks4Reply::decode(&buf[..])?;
        if reply.version != 0 && reply.version != SocksVersion::V4.as_u8() {
            return Err(Error::BadReply("unrecognized SOCKS4 reply version"));
        }
        match reply.status {
            Socks4Status::GRANTED => Ok(reply),
            s @ Socks4Status::REJECTED
            | s @ Socks4Status::UNREACHABLE
            | s @ Socks4Status::AUTH_FAILED => Err(Error::ProtocolRejected {
                code: s.into(),
                reason: s.description(),
            }),
            _ => Err(Error::BadReply("unrecognized SOCKS4 status")),
        }
    }

    /// Return the credentials to send to our proxy, if we have any.
    fn credentials(&self) -> Option<Credentials> {
        self.authenticator
            .and_then(|a| {
                a.request_credentials(&self.proxy.host_string(), self.proxy.port(), "SOCKS5")
            })
            .or_else(|| os_user_name().map(|u| Credentials::new(u, None::<String>)))
    }

    /// Turn an address from a reply into an endpoint.
    ///
    /// Proxies report an unspecified address to mean "my own address".
    fn bound_endpoint(&self, addr: SocksAddr, port: u16) -> Endpoint {
        match (&addr, self.proxy.address()) {
            (SocksAddr::Ip(ip), Some(proxy_ip)) if ip.is_unspecified() => {
                Endpoint::from_socket_addr(SocketAddr::new(proxy_ip, port))
            }
            _ => Endpoint::from_socks(addr, port),
        }
    }
}

/// Run `fut`, and close `sock` if it fails.
async fn closing_on_error<H, T, F>(sock: &Socket<H>, fut: F) -> Result<T>
where
    H: SocketHandle,
    F: Future<Output = Result<T>>,
{
    let r = fut.await;
    if r.is_err() {
        sock.close();
    }
    r
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use futures::executor::block_on;
    use hex_literal::hex;
    use socksdial_rtmock::io::{handle_pair, MockHandle};
    use socksdial_rtmock::net::MockNetwork;
    use socksdial_rtmock::MockRuntime;
    use socksdial_rtcompat::SleepProvider;
    use std::time::Duration;

    /// Return a runtime, a client socket, and the proxy's end of it.
    fn setup() -> (MockRuntime, Socket<MockHandle>, MockHandle, Endpoint) {
        let rt = MockNetwork::new()
            .builder()
            .add_address("192.0.2.1".parse().unwrap())
            .runtime();
        let proxy: SocketAddr = "192.0.2.50:1080".parse().unwrap();
        let (a, b) = handle_pair("192.0.2.1:4000".parse().unwrap(), proxy);
        (rt, Socket::new(a), b, proxy.into())
    }

    fn target() -> Endpoint {
        "192.0.2.9:80".parse().unwrap()
    }

    #[test]
    fn v4_granted() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("00 5a 0000 00000000")).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some("me"));
            let ep = n.connect_v4(&s, &target()).await?;
            assert_eq!(ep, target());
            assert!(!s.is_closed());

            let mut sent = [0_u8; 11];
            proxy.read_exact(&mut sent[..]).await?;
            assert_eq!(sent, hex!("04 01 0050 c0000209 6d65 00"));
            Ok(())
        })
    }

    #[test]
    fn v4_rejections() -> Result<()> {
        block_on(async {
            for (code, reason) in &[
                (91_u8, "request rejected"),
                (92, "destination unreachable"),
                (93, "authentication failed"),
            ] {
                let (rt, s, proxy, pep) = setup();
                proxy.write_all(&[0, *code, 0, 0, 0, 0, 0, 0]).await?;
                let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
                match n.connect_v4(&s, &target()).await {
                    Err(Error::ProtocolRejected { code: c, reason: r }) => {
                        assert_eq!(c, *code);
                        assert_eq!(r, *reason);
                    }
                    other => panic!("{:?}", other),
                }
                assert!(s.is_closed());
            }

            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&[0, 17, 0, 0, 0, 0, 0, 0]).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let r = n.connect_v4(&s, &target()).await;
            assert!(matches!(r, Err(Error::BadReply(_))));
            assert!(s.is_closed());
            Ok(())
        })
    }

    #[test]
    fn v4_reply_version() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("04 5a 0000 00000000")).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            assert_eq!(n.connect_v4(&s, &target()).await?, target());

            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("07 5a 0000 00000000")).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let r = n.connect_v4(&s, &target()).await;
            assert!(matches!(r, Err(Error::BadReply(_))));
            assert!(s.is_closed());
            Ok(())
        })
    }

    #[test]
    fn v4_needs_ipv4() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let r = n.connect_v4(&s, &Endpoint::unresolved("example.com", 80)).await;
            assert!(matches!(r, Err(Error::UnsupportedAddressType(_))));
            let r = n.connect_v4(&s, &"[2001:db8::1]:80".parse().unwrap()).await;
            assert!(matches!(r, Err(Error::UnsupportedAddressType(_))));
            // Nothing went on the wire.
            assert_eq!(proxy.read_to_end().await.unwrap(), Vec::<u8>::new());
        });
    }

    #[test]
    fn v5_domain_no_auth() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 00")).await?;
            proxy.write_all(&hex!("05 00 00 01 c0000232 1f90")).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let target = Endpoint::unresolved("example.com", 443);
            let ep = n.connect_v5(&s, &target).await?;
            assert_eq!(ep, target);

            let mut sent = [0_u8; 4 + 18];
            proxy.read_exact(&mut sent[..]).await?;
            assert_eq!(
                sent,
                hex!("05 02 00 02  05 01 00 03 0b 6578616d706c652e636f6d 01bb")
            );
            Ok(())
        })
    }

    #[test]
    fn v5_connect_ignores_bound_domain() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            let mut reply = hex!("05 00  05 00 00 03 64").to_vec();
            reply.extend(std::iter::repeat(0xff).take(100));
            reply.extend(&hex!("1f90"));
            proxy.write_all(&reply[..]).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            assert_eq!(n.connect_v5(&s, &target()).await?, target());
            assert!(!s.is_closed());
            assert_eq!(s.available()?, 0);
            Ok(())
        })
    }

    #[test]
    fn v5_no_acceptable_methods() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 ff")).await.unwrap();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let r = n.connect_v5(&s, &target()).await;
            assert!(matches!(r, Err(Error::NoAcceptableMethods)));
            assert!(s.is_closed());
            // Only the greeting was sent.
            assert_eq!(proxy.read_to_end().await.unwrap(), hex!("05 02 00 02").to_vec());
        });
    }

    #[test]
    fn v5_auth_rejected() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 02  01 01")).await.unwrap();
            let mut auth = StaticAuthenticator::new();
            auth.insert("192.0.2.50", 1080, Credentials::new("u", Some("pw")));
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded())
                .with_authenticator(Some(&auth));
            let r = n.connect_v5(&s, &target()).await;
            assert!(matches!(r, Err(Error::AuthenticationFailed)));
            assert!(s.is_closed());
            // Greeting and credentials, but no CONNECT.
            assert_eq!(
                proxy.read_to_end().await.unwrap(),
                hex!("05 02 00 02  01 01 75 02 7077").to_vec()
            );
        });
    }

    #[test]
    fn v5_overlong_credentials() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 02")).await.unwrap();
            let mut auth = StaticAuthenticator::new();
            auth.insert("192.0.2.50", 1080, Credentials::new("u".repeat(256), Some("pw")));
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded())
                .with_authenticator(Some(&auth));
            assert!(!n.authenticate(&s, SocksAuthMethod::USERNAME_PASSWORD).await.unwrap());
            let r = n.connect_v5(&s, &target()).await;
            assert!(matches!(r, Err(Error::AuthenticationFailed)));
            assert!(s.is_closed());
            // Only the greeting went out.
            assert_eq!(proxy.read_to_end().await.unwrap(), hex!("05 02 00 02").to_vec());
        });
    }

    #[test]
    fn v5_auth_accepted() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 02  01 00  05 00 00 01 00000000 0000")).await?;
            let mut auth = StaticAuthenticator::new();
            auth.insert("192.0.2.50", 1080, Credentials::new("u", None::<String>));
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded())
                .with_authenticator(Some(&auth));
            n.connect_v5(&s, &target()).await?;

            let mut sent = [0_u8; 4 + 4 + 10];
            proxy.read_exact(&mut sent[..]).await?;
            assert_eq!(
                sent,
                hex!("05 02 00 02  01 01 75 00  05 01 00 01 c0000209 0050")
            );
            Ok(())
        })
    }

    #[test]
    fn v5_failure_codes() -> Result<()> {
        block_on(async {
            for (code, reason) in &[
                (1_u8, "general failure"),
                (5, "connection refused"),
                (6, "TTL expired"),
                (8, "address type not supported"),
                (0x2a, "unassigned"),
            ] {
                let (rt, s, proxy, pep) = setup();
                proxy.write_all(&[5, 0, 5, *code, 0, 1]).await?;
                let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
                match n.connect_v5(&s, &target()).await {
                    Err(Error::ProtocolRejected { code: c, reason: r }) => {
                        assert_eq!(c, *code);
                        assert_eq!(r, *reason);
                    }
                    other => panic!("{:?}", other),
                }
                assert!(s.is_closed());
            }
            Ok(())
        })
    }

    #[test]
    fn v5_unknown_address_type() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("05 00  05 00 00 07")).await.unwrap();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let r = n.connect_v5(&s, &target()).await;
            assert!(matches!(r, Err(Error::UnsupportedAddressType(_))));
            assert!(s.is_closed());
        });
    }

    #[test]
    fn v5_falls_back_to_v4() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            // A SOCKS4-only proxy answers the greeting with a v4-ish reply.
            proxy.write_all(&hex!("00 5b")).await?;
            proxy.write_all(&hex!("00 5a 0000 00000000")).await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let ep = n.connect_v5(&s, &target()).await?;
            assert_eq!(ep, target());

            let mut sent = [0_u8; 4 + 9];
            proxy.read_exact(&mut sent[..]).await?;
            assert_eq!(sent, hex!("05 02 00 02  04 01 0050 c0000209 00"));
            Ok(())
        })
    }

    #[test]
    fn reply_in_pieces() -> Result<()> {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let dest = target();
            let (r, ()) = futures::join!(n.connect_v4(&s, &dest), async {
                proxy.write_all(&hex!("00 5a")).await.unwrap();
                futures::pending!();
                proxy.write_all(&hex!("0000 00000000")).await.unwrap();
            });
            assert_eq!(r?, target());
            Ok(())
        })
    }

    #[test]
    fn reply_in_too_many_pieces() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let dest = target();
            let (r, ()) = futures::join!(n.connect_v4(&s, &dest), async {
                for i in 0..4 {
                    if i > 0 {
                        futures::pending!();
                    }
                    // The last write fails once the client gives up.
                    let _ = proxy.write_all(&hex!("0000")).await;
                }
            });
            match r {
                Err(Error::MalformedReply {
                    expected_len,
                    got_len,
                }) => {
                    assert_eq!(expected_len, 8);
                    assert_eq!(got_len, 6);
                }
                other => panic!("{:?}", other),
            }
            assert!(s.is_closed());
        });
    }

    #[test]
    fn reply_truncated() {
        block_on(async {
            let (rt, s, proxy, pep) = setup();
            proxy.write_all(&hex!("00 5a 00")).await.unwrap();
            proxy.shutdown(std::net::Shutdown::Write).unwrap();
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let r = n.connect_v4(&s, &target()).await;
            assert!(matches!(
                r,
                Err(Error::MalformedReply {
                    expected_len: 8,
                    got_len: 3
                })
            ));
        });
    }

    #[test]
    fn silent_proxy_times_out() {
        let (rt, s, _proxy, pep) = setup();
        let deadline = Deadline::start(rt.now(), Duration::from_secs(5));
        let n = SocksNegotiator::new(&rt, &pep, deadline).with_user_id(Some(""));
        let r = block_on(rt.wait_for(n.connect_v4(&s, &target())));
        assert!(matches!(r, Err(Error::Timeout)));
        assert!(s.is_closed());
        assert!(deadline.remaining(rt.now()).is_err());
    }

    #[test]
    fn bind_v4_and_v5() -> Result<()> {
        block_on(async {
            // SOCKS4: the proxy binds on its own address (reported as 0.0.0.0).
            let (rt, s, proxy, pep) = setup();
            proxy
                .write_all(&hex!("00 5a 1388 00000000  00 5a 3039 c6336401"))
                .await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded()).with_user_id(Some(""));
            let (bound, v) = n.socks_bind(&s, &target(), SocksVersion::V4).await?;
            assert_eq!(v, SocksVersion::V4);
            assert_eq!(bound, "192.0.2.50:5000".parse().unwrap());
            let peer = n.accept_reply(&s, v).await?;
            assert_eq!(peer, "198.51.100.1:12345".parse().unwrap());

            // SOCKS5, with a domain name in the second reply.
            let (rt, s, proxy, pep) = setup();
            proxy
                .write_all(&hex!(
                    "05 00
                     05 00 00 01 cb007107 1388
                     05 00 00 03 04 70656572 3039"
                ))
                .await?;
            let n = SocksNegotiator::new(&rt, &pep, Deadline::unbounded());
            let (bound, v) = n.socks_bind(&s, &target(), SocksVersion::V5).await?;
            assert_eq!(v, SocksVersion::V5);
            assert_eq!(bound, "203.0.113.7:5000".parse().unwrap());
            let peer = n.accept_reply(&s, v).await?;
            assert_eq!(peer, Endpoint::unresolved("peer", 12345));

            let mut sent = [0_u8; 4 + 10];
            proxy.read_exact(&mut sent[..]).await?;
            assert_eq!(sent, hex!("05 02 00 02  05 02 00 01 c0000209 0050"));
            Ok(())
        })
    }
}
