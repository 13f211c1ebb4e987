//! Declarations for traits that we need our runtimes to implement.

use async_trait::async_trait;
use futures::Future;
use std::io::Result as IoResult;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

/// A runtime that we can use to dial connections, directly or through
/// a proxy.
///
/// Every runtime must be able to sleep, tell the time, run futures to
/// completion, and talk to the network.  Cloning a runtime gives another
/// reference to the same underlying runtime.
pub trait Runtime:
    Send + Sync + Clone + 'static + SleepProvider + SpawnBlocking + PlatformSocket
{
}

impl<T> Runtime for T where
    T: Send + Sync + Clone + 'static + SleepProvider + SpawnBlocking + PlatformSocket
{
}

/// Trait for a runtime that can wait until a timer has expired.
pub trait SleepProvider {
    /// A future returned by [`SleepProvider::sleep()`]
    type SleepFuture: Future<Output = ()> + Send + 'static;

    /// Return a future that will be ready after `duration` has
    /// elapsed.
    fn sleep(&self, duration: Duration) -> Self::SleepFuture;

    /// Return this runtime's view of the current monotonic time.
    ///
    /// Deadlines are computed against this clock, so that a mocked runtime
    /// can make time pass without anybody actually waiting.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Trait for a runtime that can block on a future.
pub trait SpawnBlocking {
    /// Run `future` until it is ready, and return its output.
    fn block_on<F: Future>(&self, future: F) -> F::Output;
}

/// The operating system's view of TCP sockets, as far as socksdial
/// cares.
///
/// `connect` covers socket creation plus connect; `listen` covers
/// creation, bind, and listen.  Everything else is done through the
/// returned handles.
#[async_trait]
pub trait PlatformSocket: Send + Sync {
    /// The type of a connected socket.
    type Handle: SocketHandle;
    /// The type of a listening socket.
    type Listener: SocketListener<Handle = Self::Handle>;

    /// Launch a TCP connection to a given socket address.
    async fn connect(&self, addr: &SocketAddr) -> IoResult<Self::Handle>;

    /// Open a TCP listener on a given socket address.
    async fn listen(&self, addr: &SocketAddr) -> IoResult<Self::Listener>;
}

/// A connected socket that can be shared between tasks.
///
/// Every I/O method takes `&self`, so that one reader, one writer and one
/// closer can use the same handle at once.  Implementations must make a
/// blocked `read` or `write` return once the handle has been shut down.
#[async_trait]
pub trait SocketHandle: Send + Sync + 'static {
    /// Read some bytes into `buf`, returning how many were read.
    ///
    /// A return value of zero means end-of-stream.  A peer reset is
    /// reported as an error of kind [`std::io::ErrorKind::ConnectionReset`].
    async fn read(&self, buf: &mut [u8]) -> IoResult<usize>;

    /// Write some bytes from `buf`, returning how many were written.
    async fn write(&self, buf: &[u8]) -> IoResult<usize>;

    /// Return the number of bytes that can be read without blocking.
    fn available(&self) -> IoResult<usize>;

    /// Shut down one or both directions of this socket.
    ///
    /// This never releases the underlying descriptor.
    fn shutdown(&self, how: Shutdown) -> IoResult<()>;

    /// Return the local address of this socket.
    fn local_addr(&self) -> IoResult<SocketAddr>;

    /// Return the address of this socket's peer.
    fn peer_addr(&self) -> IoResult<SocketAddr>;

    /// Release the underlying descriptor.
    fn close(self) -> IoResult<()>
    where
        Self: Sized;
}

/// A listening socket.
#[async_trait]
pub trait SocketListener: Send + Sync + 'static {
    /// The type of the connections that this listener accepts.
    type Handle: SocketHandle;

    /// Wait for an incoming connection, and return it along with the
    /// address it came from.
    async fn accept(&self) -> IoResult<(Self::Handle, SocketAddr)>;

    /// Return the address this listener is bound to.
    fn local_addr(&self) -> IoResult<SocketAddr>;
}
