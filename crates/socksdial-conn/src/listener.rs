//! Listening for one incoming connection, directly or through a SOCKS
//! proxy's BIND command.

use crate::deadline::Deadline;
use crate::endpoint::Endpoint;
use crate::negotiate::SocksNegotiator;
use crate::socket::Socket;
use crate::Result;

use socksdial_proto::SocksVersion;
use socksdial_rtcompat::{Runtime, SocketListener};
use std::time::Duration;
use tracing::debug;

/// A place where a peer can connect to us.
///
/// Returned by [`ConnectionCoordinator::bind`](crate::ConnectionCoordinator::bind).
pub struct BoundListener<R: Runtime> {
    /// Used for timeouts.
    runtime: R,
    /// What we're listening with.
    inner: Inner<R>,
}

/// The two ways of listening.
enum Inner<R: Runtime> {
    /// An ordinary listening socket.
    Direct(R::Listener),
    /// A BIND request on a SOCKS proxy.
    Socks {
        /// The proxy's address.
        proxy: Endpoint,
        /// The control connection, which becomes the data connection.
        control: Socket<R::Handle>,
        /// Where the proxy is listening for our peer.
        bound: Endpoint,
        /// The version spoken on `control`.
        version: SocksVersion,
    },
}

impl<R: Runtime> BoundListener<R> {
    /// Wrap a local listener.
    pub(crate) fn direct(runtime: R, listener: R::Listener) -> Self {
        BoundListener {
            runtime,
            inner: Inner::Direct(listener),
        }
    }

    /// Wrap a control connection on which a BIND has succeeded.
    pub(crate) fn socks(
        runtime: R,
        proxy: Endpoint,
        control: Socket<R::Handle>,
        bound: Endpoint,
        version: SocksVersion,
    ) -> Self {
        BoundListener {
            runtime,
            inner: Inner::Socks {
                proxy,
                control,
                bound,
                version,
            },
        }
    }

    /// Return the endpoint our peer should connect to.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            Inner::Direct(l) => Ok(l.local_addr()?.into()),
            Inner::Socks { bound, .. } => Ok(bound.clone()),
        }
    }

    /// Return true if this listener goes through a proxy.
    pub fn is_proxied(&self) -> bool {
        matches!(self.inner, Inner::Socks { .. })
    }

    /// Wait for a peer to connect, for at most `timeout` (zero means
    /// forever), and return the connection.
    ///
    /// A proxied listener only ever accepts one connection.
    pub async fn accept(self, timeout: Duration) -> Result<Socket<R::Handle>> {
        let deadline = Deadline::start(self.runtime.now(), timeout);
        match self.inner {
            Inner::Direct(listener) => {
                let (handle, peer) = deadline.run(&self.runtime, listener.accept()).await??;
                debug!("Accepted connection from {}", peer);
                Ok(Socket::new(handle))
            }
            Inner::Socks {
                proxy,
                control,
                version,
                ..
            } => {
                let peer = SocksNegotiator::new(&self.runtime, &proxy, deadline)
                    .accept_reply(&control, version)
                    .await?;
                debug!("Accepted connection from {} through {}", peer, proxy);
                Ok(control.with_external(peer))
            }
        }
    }
}
