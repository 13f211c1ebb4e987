//! An in-memory network of hosts, proxies and targets.
//!
//! A [`MockNetwork`] is shared by any number of [`MockNetProvider`]s.
//! Each provider is one host: it owns some IP addresses, can listen on
//! them, and can connect to anything another host is listening on.
//! Connections are [`MockHandle`] pairs.
//!
//! This is only meant to be good enough for unit tests.  There is no DNS,
//! no UDP and no packet loss.  A connect to an address that nobody
//! listens on is refused at once; use [`MockNetwork::add_blackhole`] for
//! an address that never answers.

use crate::io::{handle_pair, MockHandle};
use socksdial_rtcompat::{PlatformSocket, SocketListener};

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::lock::Mutex as AsyncMutex;
use futures::stream::StreamExt;
use std::collections::{HashMap, HashSet};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// The first port a host hands out when it needs one of its own.
const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// A new connection, as it sits in a listener's backlog.
type Incoming = (MockHandle, SocketAddr);

/// Everything a [`MockNetwork`] knows, behind one lock.
#[derive(Default)]
struct NetState {
    /// Listening addresses, and the backlog for each.
    listeners: HashMap<SocketAddr, UnboundedSender<Incoming>>,
    /// Addresses whose connect attempts never finish.
    blackholes: HashSet<SocketAddr>,
    /// Every address anybody has tried to connect to, in order.
    attempts: Vec<SocketAddr>,
}

/// A simulated network, for testing.
#[derive(Default)]
pub struct MockNetwork {
    /// The state of the network.
    state: Mutex<NetState>,
}

/// One host on a [`MockNetwork`].
///
/// Implements [`PlatformSocket`], so it can stand in for the real
/// network anywhere a runtime is expected.
#[derive(Clone)]
pub struct MockNetProvider {
    /// The host itself, shared among clones.
    host: Arc<Host>,
}

/// The shared part of a [`MockNetProvider`].
struct Host {
    /// The addresses that belong to this host.
    addrs: Vec<IpAddr>,
    /// The network the host lives on.
    net: Arc<MockNetwork>,
    /// The next ephemeral port to hand out.
    next_port: AtomicU16,
}

/// A listener on a [`MockNetProvider`].
pub struct MockNetListener {
    /// Where we're listening.
    addr: SocketAddr,
    /// Connections that have arrived and not been accepted yet.
    backlog: AsyncMutex<UnboundedReceiver<Incoming>>,
}

/// Configures a new host for a [`MockNetwork`].
///
/// Returned by [`MockNetwork::builder()`].
pub struct ProviderBuilder {
    /// Addresses for the new host.
    addrs: Vec<IpAddr>,
    /// The network to put it on.
    net: Arc<MockNetwork>,
}

/// Something a host asked of the network that the network won't do.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MockNetError {
    /// Nobody is listening at the address.
    #[error("Nothing is listening at {0}")]
    NoListener(SocketAddr),
    /// Somebody is already listening at the address.
    #[error("Somebody is already listening at {0}")]
    AddressInUse(SocketAddr),
    /// A host tried to use an address that isn't its own.
    #[error("{0} does not belong to this host")]
    NotLocal(IpAddr),
    /// A host has no address in the family it needed.
    #[error("This host has no {0} address")]
    NoAddressInFamily(&'static str),
    /// The host ran out of ephemeral ports.
    #[error("This host has no more ports to hand out")]
    OutOfPorts,
    /// A listener's backlog was closed.
    #[error("Listener is no longer reachable")]
    ListenerGone,
}

impl MockNetError {
    /// Return the [`ErrorKind`] a real network would report for this.
    fn kind(&self) -> ErrorKind {
        match self {
            MockNetError::NoListener(_) => ErrorKind::ConnectionRefused,
            MockNetError::AddressInUse(_) => ErrorKind::AddrInUse,
            MockNetError::NotLocal(_)
            | MockNetError::NoAddressInFamily(_)
            | MockNetError::OutOfPorts => ErrorKind::AddrNotAvailable,
            MockNetError::ListenerGone => ErrorKind::BrokenPipe,
        }
    }
}

impl From<MockNetError> for IoError {
    fn from(e: MockNetError) -> IoError {
        IoError::new(e.kind(), e)
    }
}

impl MockNetwork {
    /// Make a new network with nobody on it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start configuring a new host on this network.
    ///
    /// ```
    /// # use socksdial_rtmock::net::MockNetwork;
    /// let net = MockNetwork::new();
    /// let client = net
    ///     .builder()
    ///     .add_address("192.0.2.1".parse().unwrap())
    ///     .provider();
    /// ```
    pub fn builder(self: &Arc<Self>) -> ProviderBuilder {
        ProviderBuilder {
            addrs: Vec::new(),
            net: Arc::clone(self),
        }
    }

    /// Make every later connect attempt to `addr` hang forever.
    pub fn add_blackhole(&self, addr: SocketAddr) {
        self.lock().blackholes.insert(addr);
    }

    /// Return every address that any host has tried to connect to, in
    /// the order they tried.
    pub fn attempts(&self) -> Vec<SocketAddr> {
        self.lock().attempts.clone()
    }

    /// Lock and return our state.
    fn lock(&self) -> std::sync::MutexGuard<'_, NetState> {
        self.state.lock().expect("poisoned lock")
    }

    /// Deliver the far end of a new connection from `from` to whoever is
    /// listening at `to`.
    async fn deliver(&self, from: SocketAddr, to: SocketAddr, theirs: MockHandle) -> IoResult<()> {
        let backlog = {
            let mut state = self.lock();
            state.attempts.push(to);
            if state.blackholes.contains(&to) {
                None
            } else {
                Some(state.listeners.get(&to).cloned())
            }
        };
        match backlog {
            None => futures::future::pending().await,
            Some(None) => Err(MockNetError::NoListener(to).into()),
            Some(Some(tx)) => tx
                .unbounded_send((theirs, from))
                .map_err(|_| MockNetError::NoListener(to).into()),
        }
    }

    /// Start listening at `addr`, and return the backlog for it.
    fn open_backlog(&self, addr: SocketAddr) -> IoResult<UnboundedReceiver<Incoming>> {
        let mut state = self.lock();
        match state.listeners.get(&addr) {
            Some(tx) if !tx.is_closed() => Err(MockNetError::AddressInUse(addr).into()),
            _ => {
                let (tx, rx) = mpsc::unbounded();
                state.listeners.insert(addr, tx);
                Ok(rx)
            }
        }
    }
}

impl ProviderBuilder {
    /// Give the new host `addr`.
    pub fn add_address(&mut self, addr: IpAddr) -> &mut Self {
        self.addrs.push(addr);
        self
    }

    /// Return the new host, wrapped in a [`MockRuntime`](crate::MockRuntime)
    /// with a clock of its own.
    pub fn runtime(&self) -> crate::MockRuntime {
        crate::MockRuntime::new(self.provider())
    }

    /// Return the new host.
    pub fn provider(&self) -> MockNetProvider {
        MockNetProvider {
            host: Arc::new(Host {
                addrs: self.addrs.clone(),
                net: Arc::clone(&self.net),
                next_port: AtomicU16::new(FIRST_EPHEMERAL_PORT),
            }),
        }
    }
}

impl MockNetProvider {
    /// Return the network this host is on.
    pub fn network(&self) -> &Arc<MockNetwork> {
        &self.host.net
    }

    /// Return one of our addresses in the same family as `like`.
    fn own_addr_like(&self, like: IpAddr) -> Result<IpAddr, MockNetError> {
        self.host
            .addrs
            .iter()
            .copied()
            .find(|a| a.is_ipv4() == like.is_ipv4())
            .ok_or(MockNetError::NoAddressInFamily(if like.is_ipv4() {
                "IPv4"
            } else {
                "IPv6"
            }))
    }

    /// Return a port we haven't handed out before.
    fn ephemeral_port(&self) -> Result<u16, MockNetError> {
        let port = self.host.next_port.fetch_add(1, Ordering::Relaxed);
        if port == 0 || port < FIRST_EPHEMERAL_PORT {
            Err(MockNetError::OutOfPorts)
        } else {
            Ok(port)
        }
    }

    /// Work out the concrete address to listen on when asked for `want`.
    ///
    /// An unspecified IP means any of ours in that family; port 0 means
    /// a fresh ephemeral port.
    fn resolve_listen_addr(&self, want: &SocketAddr) -> Result<SocketAddr, MockNetError> {
        let ip = if want.ip().is_unspecified() {
            self.own_addr_like(want.ip())?
        } else if self.host.addrs.contains(&want.ip()) {
            want.ip()
        } else {
            return Err(MockNetError::NotLocal(want.ip()));
        };
        let port = match want.port() {
            0 => self.ephemeral_port()?,
            p => p,
        };
        Ok(SocketAddr::new(ip, port))
    }
}

#[async_trait]
impl PlatformSocket for MockNetProvider {
    type Handle = MockHandle;
    type Listener = MockNetListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<MockHandle> {
        let local = SocketAddr::new(self.own_addr_like(addr.ip())?, self.ephemeral_port()?);
        let (ours, theirs) = handle_pair(local, *addr);
        self.host.net.deliver(local, *addr, theirs).await?;
        Ok(ours)
    }

    async fn listen(&self, addr: &SocketAddr) -> IoResult<MockNetListener> {
        let addr = self.resolve_listen_addr(addr)?;
        let backlog = self.host.net.open_backlog(addr)?;
        Ok(MockNetListener {
            addr,
            backlog: AsyncMutex::new(backlog),
        })
    }
}

#[async_trait]
impl SocketListener for MockNetListener {
    type Handle = MockHandle;

    async fn accept(&self) -> IoResult<(MockHandle, SocketAddr)> {
        self.backlog
            .lock()
            .await
            .next()
            .await
            .ok_or_else(|| MockNetError::ListenerGone.into())
    }

    fn local_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;
    use socksdial_rtcompat::SocketHandle;

    fn hosts() -> (MockNetProvider, MockNetProvider) {
        let net = MockNetwork::new();
        let client = net
            .builder()
            .add_address("192.0.2.1".parse().unwrap())
            .provider();
        let proxy = net
            .builder()
            .add_address("192.0.2.50".parse().unwrap())
            .add_address("2001:db8::50".parse().unwrap())
            .provider();
        (client, proxy)
    }

    #[test]
    fn connect_and_talk() -> IoResult<()> {
        let (client, proxy) = hosts();
        block_on(async {
            let lis = proxy.listen(&"0.0.0.0:1080".parse().unwrap()).await?;
            let addr = lis.local_addr()?;
            assert_eq!(addr, "192.0.2.50:1080".parse().unwrap());

            let (c, s) = futures::join!(
                async {
                    let c = client.connect(&addr).await?;
                    let local = c.local_addr()?;
                    c.write_all(b"\x05\x01\x00").await?;
                    c.close()?;
                    IoResult::Ok(local)
                },
                async {
                    let (h, from) = lis.accept().await?;
                    assert_eq!(h.local_addr()?, addr);
                    IoResult::Ok((h.read_to_end().await?, from))
                }
            );
            let (got, from) = s?;
            assert_eq!(got, b"\x05\x01\x00".to_vec());
            assert_eq!(from, c?);
            assert_eq!(from.ip(), "192.0.2.1".parse::<IpAddr>().unwrap());
            assert!(from.port() >= FIRST_EPHEMERAL_PORT);
            Ok(())
        })
    }

    #[test]
    fn refused_and_recorded() {
        let (client, _) = hosts();
        let a: SocketAddr = "192.0.2.50:1080".parse().unwrap();
        let b: SocketAddr = "192.0.2.99:80".parse().unwrap();
        for addr in &[a, b] {
            let e = block_on(client.connect(addr)).err().map(|e| e.kind());
            assert_eq!(e, Some(ErrorKind::ConnectionRefused));
        }
        assert_eq!(client.network().attempts(), vec![a, b]);

        // No IPv6 address on the client.
        let e = block_on(client.connect(&"[2001:db8::50]:1080".parse().unwrap()));
        assert_eq!(e.err().map(|e| e.kind()), Some(ErrorKind::AddrNotAvailable));
    }

    #[test]
    fn blackhole_hangs() {
        let (client, _) = hosts();
        let target: SocketAddr = "192.0.2.50:1080".parse().unwrap();
        client.network().add_blackhole(target);
        assert!(client.connect(&target).now_or_never().is_none());
        assert_eq!(client.network().attempts(), vec![target]);
    }

    #[test]
    fn address_in_use() -> IoResult<()> {
        let (_, proxy) = hosts();
        block_on(async {
            let addr = "192.0.2.50:1080".parse().unwrap();
            let lis = proxy.listen(&addr).await?;
            let again = proxy.listen(&addr).await;
            assert_eq!(again.err().map(|e| e.kind()), Some(ErrorKind::AddrInUse));
            drop(lis);
            let _lis = proxy.listen(&addr).await?;
            Ok(())
        })
    }

    #[test]
    fn listen_addresses() {
        let (_, proxy) = hosts();
        let a = proxy
            .resolve_listen_addr(&"[::]:1080".parse().unwrap())
            .unwrap();
        assert_eq!(a, "[2001:db8::50]:1080".parse().unwrap());
        let a = proxy
            .resolve_listen_addr(&"192.0.2.50:0".parse().unwrap())
            .unwrap();
        assert_eq!(a.port(), FIRST_EPHEMERAL_PORT);
        assert_eq!(
            proxy.resolve_listen_addr(&"192.0.2.51:0".parse().unwrap()),
            Err(MockNetError::NotLocal("192.0.2.51".parse().unwrap()))
        );
    }
}
