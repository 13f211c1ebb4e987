//! Decide how to reach an endpoint, and try each way in turn.

use crate::auth::Authenticator;
use crate::config::ConnectConfig;
use crate::deadline::Deadline;
use crate::endpoint::{Endpoint, ProxyCandidate};
use crate::err::ProxyFailures;
use crate::listener::BoundListener;
use crate::negotiate::SocksNegotiator;
use crate::selector::{ProxyChoice, ProxySelector, StaticSelector};
use crate::socket::Socket;
use crate::{Error, Result};

use socksdial_rtcompat::Runtime;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Makes connections, directly or through SOCKS proxies.
///
/// A coordinator either uses one fixed proxy for everything, or asks a
/// [`ProxySelector`] which proxies to try for each endpoint.  Either way,
/// one deadline covers the whole attempt: connecting to each candidate in
/// turn, and every handshake step with each of them.
pub struct ConnectionCoordinator<R: Runtime> {
    /// The runtime we use for sockets and timers.
    runtime: R,
    /// A proxy to use for every connection, ignoring the selector.
    fixed_proxy: Option<ProxyCandidate>,
    /// Where to get the candidates for each connection.
    selector: Option<Arc<dyn ProxySelector>>,
    /// Where to get SOCKS5 credentials.
    authenticator: Option<Arc<dyn Authenticator>>,
    /// The user id to send to SOCKS4 proxies.
    socks4_user_id: Option<String>,
    /// The timeout to use when the caller has no opinion.
    connect_timeout: Duration,
}

/// A builder for a [`ConnectionCoordinator`].
pub struct CoordinatorBuilder<R: Runtime> {
    /// The coordinator we're building.
    inner: ConnectionCoordinator<R>,
}

impl<R: Runtime> CoordinatorBuilder<R> {
    /// Send every connection through `proxy`.
    pub fn fixed_proxy(mut self, proxy: ProxyCandidate) -> Self {
        self.inner.fixed_proxy = Some(proxy);
        self
    }

    /// Ask `selector` which proxies to use.
    pub fn selector(mut self, selector: Arc<dyn ProxySelector>) -> Self {
        self.inner.selector = Some(selector);
        self
    }

    /// Use `authenticator` for SOCKS5 username/password authentication.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.inner.authenticator = Some(authenticator);
        self
    }

    /// Send `user_id` to SOCKS4 proxies.
    pub fn socks4_user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.inner.socks4_user_id = Some(user_id.into());
        self
    }

    /// Use `timeout` when the caller doesn't give one.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    /// Return the finished coordinator.
    pub fn build(self) -> ConnectionCoordinator<R> {
        self.inner
    }
}

impl<R: Runtime> ConnectionCoordinator<R> {
    /// Return a builder for a coordinator that uses `runtime`.
    ///
    /// With no further configuration, the coordinator connects directly.
    pub fn builder(runtime: R) -> CoordinatorBuilder<R> {
        CoordinatorBuilder {
            inner: ConnectionCoordinator {
                runtime,
                fixed_proxy: None,
                selector: None,
                authenticator: None,
                socks4_user_id: None,
                connect_timeout: ConnectConfig::default().connect_timeout(),
            },
        }
    }

    /// Return a coordinator that tries the proxies in `config`.
    pub fn from_config(runtime: R, config: &ConnectConfig) -> Result<Self> {
        let mut b = Self::builder(runtime).connect_timeout(config.connect_timeout());
        let candidates = config.candidates()?;
        if !candidates.is_empty() {
            b = b.selector(Arc::new(StaticSelector::from_candidates(candidates)));
        }
        let auth = config.authenticator()?;
        if !auth.is_empty() {
            b = b.authenticator(Arc::new(auth));
        }
        if let Some(id) = config.socks4_user_id() {
            b = b.socks4_user_id(id);
        }
        Ok(b.build())
    }

    /// Return the timeout to use when the caller doesn't have one.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a connection to `target`, giving up after `timeout` (zero
    /// means never).
    ///
    /// If every proxy fails, the error lists what went wrong with each.
    pub async fn connect(&self, target: &Endpoint, timeout: Duration) -> Result<Socket<R::Handle>> {
        let deadline = Deadline::start(self.runtime.now(), timeout);

        if let Some(proxy) = &self.fixed_proxy {
            return self.connect_via(proxy, target, deadline).await;
        }

        let mut failures = ProxyFailures::new(target.clone());
        for choice in self.choices(target) {
            let candidate = match choice {
                ProxyChoice::Direct => return self.connect_direct(target, deadline).await,
                ProxyChoice::Socks(c) => c,
            };
            match self.connect_via(&candidate, target, deadline).await {
                Ok(sock) => {
                    info!("Connected to {} through {}", target, candidate);
                    return Ok(sock);
                }
                Err(e) => self.note_failure(&mut failures, target, candidate, e),
            }
        }

        if failures.is_empty() {
            self.connect_direct(target, deadline).await
        } else {
            Err(Error::AllProxiesFailed(failures))
        }
    }

    /// Listen for one connection from `target`, giving up on the setup
    /// after `timeout` (zero means never).
    ///
    /// Through a proxy, this issues a SOCKS BIND; otherwise it opens a
    /// listener on `local`.
    pub async fn bind(
        &self,
        target: &Endpoint,
        local: SocketAddr,
        timeout: Duration,
    ) -> Result<BoundListener<R>> {
        let deadline = Deadline::start(self.runtime.now(), timeout);

        if let Some(proxy) = &self.fixed_proxy {
            return self.bind_via(proxy, target, deadline).await;
        }

        let mut failures = ProxyFailures::new(target.clone());
        for choice in self.choices(target) {
            let candidate = match choice {
                ProxyChoice::Direct => return self.bind_direct(local).await,
                ProxyChoice::Socks(c) => c,
            };
            match self.bind_via(&candidate, target, deadline).await {
                Ok(l) => return Ok(l),
                Err(e) => self.note_failure(&mut failures, target, candidate, e),
            }
        }

        if failures.is_empty() {
            self.bind_direct(local).await
        } else {
            Err(Error::AllProxiesFailed(failures))
        }
    }

    /// Return the ways to try reaching `target`.
    fn choices(&self, target: &Endpoint) -> Vec<ProxyChoice> {
        match &self.selector {
            Some(s) => s.select(target),
            None => Vec::new(),
        }
    }

    /// Record that `candidate` failed, and tell the selector.
    fn note_failure(
        &self,
        failures: &mut ProxyFailures,
        target: &Endpoint,
        candidate: ProxyCandidate,
        err: Error,
    ) {
        debug!("Failed to reach {} through {}: {}", target, candidate, err);
        if let Some(s) = &self.selector {
            s.notify_failure(target, &candidate, &err);
        }
        failures.push(candidate, err);
    }

    /// Open a TCP connection to `addr` before `deadline`.
    async fn open(&self, addr: &SocketAddr, deadline: Deadline) -> Result<Socket<R::Handle>> {
        let handle = deadline.run(&self.runtime, self.runtime.connect(addr)).await??;
        Ok(Socket::new(handle))
    }

    /// Connect straight to `target`.
    async fn connect_direct(&self, target: &Endpoint, deadline: Deadline) -> Result<Socket<R::Handle>> {
        let addr = target
            .socket_addr()
            .ok_or_else(|| Error::UnresolvedAddress(target.to_string()))?;
        debug!("Connecting directly to {}", target);
        let sock = self.open(&addr, deadline).await?;
        Ok(sock.with_external(target.clone()))
    }

    /// Connect to `target` through `proxy`.
    async fn connect_via(
        &self,
        proxy: &ProxyCandidate,
        target: &Endpoint,
        deadline: Deadline,
    ) -> Result<Socket<R::Handle>> {
        let sock = self.open_proxy(proxy, deadline).await?;
        let external = self
            .negotiator(proxy.address(), deadline)
            .connect(&sock, target, proxy.version())
            .await?;
        Ok(sock.with_external(external))
    }

    /// Listen on `local`.
    async fn bind_direct(&self, local: SocketAddr) -> Result<BoundListener<R>> {
        let listener = self.runtime.listen(&local).await?;
        Ok(BoundListener::direct(self.runtime.clone(), listener))
    }

    /// Ask `proxy` to listen for `target`.
    async fn bind_via(
        &self,
        proxy: &ProxyCandidate,
        target: &Endpoint,
        deadline: Deadline,
    ) -> Result<BoundListener<R>> {
        let sock = self.open_proxy(proxy, deadline).await?;
        let (bound, version) = self
            .negotiator(proxy.address(), deadline)
            .socks_bind(&sock, target, proxy.version())
            .await?;
        debug!("{} is listening for us at {}", proxy, bound);
        Ok(BoundListener::socks(
            self.runtime.clone(),
            proxy.address().clone(),
            sock,
            bound,
            version,
        ))
    }

    /// Open a control connection to `proxy`.
    async fn open_proxy(&self, proxy: &ProxyCandidate, deadline: Deadline) -> Result<Socket<R::Handle>> {
        let addr = proxy
            .address()
            .socket_addr()
            .ok_or_else(|| Error::UnresolvedAddress(proxy.address().to_string()))?;
        debug!("Connecting to {}", proxy);
        self.open(&addr, deadline).await
    }

    /// Return a negotiator for talking to the proxy at `proxy`.
    fn negotiator<'a>(&'a self, proxy: &'a Endpoint, deadline: Deadline) -> SocksNegotiator<'a, R> {
        SocksNegotiator::new(&self.runtime, proxy, deadline)
            .with_authenticator(self.authenticator.as_deref())
            .with_user_id(self.socks4_user_id.as_deref())
    }
}
