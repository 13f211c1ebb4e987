//! Implementations of the runtime traits on top of tokio.
//!
//! Sockets are tokio's own [`TcpStream`](tokio_crate::net::TcpStream)s.
//! Since socksdial shares one handle between a reader, a writer and a
//! closer, we never split the stream: reads and writes go through
//! tokio's readiness API (`readable()` + `try_read()`), which only needs
//! `&self`.  Shutdown goes through `socket2`, so that it works on a
//! shared reference too and wakes any task blocked on the handle.

use crate::traits::*;

use async_trait::async_trait;
use futures::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use tokio_crate::net::{TcpListener as TokioTcpListener, TcpStream as TokioTcpStream};
use tokio_crate::runtime::{Builder, Handle, Runtime as TokioRt};

/// A connected TCP socket, as returned by [`TokioRuntimeHandle`].
#[derive(Debug)]
pub struct TcpHandle {
    /// The underlying tokio stream.
    stream: TokioTcpStream,
}

/// A listening TCP socket, as returned by [`TokioRuntimeHandle`].
#[derive(Debug)]
pub struct TcpListener {
    /// The underlying tokio listener.
    listener: TokioTcpListener,
}

impl From<TokioTcpStream> for TcpHandle {
    fn from(stream: TokioTcpStream) -> TcpHandle {
        TcpHandle { stream }
    }
}

#[async_trait]
impl SocketHandle for TcpHandle {
    async fn read(&self, buf: &mut [u8]) -> IoResult<usize> {
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                other => return other,
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> IoResult<usize> {
        loop {
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                other => return other,
            }
        }
    }

    #[cfg(unix)]
    fn available(&self) -> IoResult<usize> {
        use std::os::unix::io::AsRawFd;

        let mut n: libc::c_int = 0;
        // SAFETY: FIONREAD stores a single c_int through the pointer we
        // pass, and `n` lives for the whole call.
        let rv = unsafe {
            libc::ioctl(
                self.stream.as_raw_fd(),
                libc::FIONREAD,
                &mut n as *mut libc::c_int,
            )
        };
        if rv < 0 {
            return Err(IoError::last_os_error());
        }
        Ok(n.max(0) as usize)
    }

    #[cfg(not(unix))]
    fn available(&self) -> IoResult<usize> {
        // TODO: use ioctlsocket(FIONREAD) once we have a windows-sys dependency.
        Ok(0)
    }

    fn shutdown(&self, how: Shutdown) -> IoResult<()> {
        match socket2::SockRef::from(&self.stream).shutdown(how) {
            // Shutting down an already-disconnected socket isn't a problem
            // for anybody.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn local_addr(&self) -> IoResult<SocketAddr> {
        self.stream.local_addr()
    }

    fn peer_addr(&self) -> IoResult<SocketAddr> {
        self.stream.peer_addr()
    }

    fn close(self) -> IoResult<()> {
        // Dropping the stream deregisters it from the reactor and closes
        // the descriptor.
        drop(self.stream);
        Ok(())
    }
}

#[async_trait]
impl SocketListener for TcpListener {
    type Handle = TcpHandle;

    async fn accept(&self) -> IoResult<(TcpHandle, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((stream.into(), addr))
    }

    fn local_addr(&self) -> IoResult<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A [`Runtime`] built on a handle to a tokio runtime.
///
/// Cloning this object is cheap: it only clones the tokio [`Handle`].
#[derive(Clone, Debug)]
pub struct TokioRuntimeHandle {
    /// The handle we use to reach the tokio runtime.
    handle: Handle,
}

impl TokioRuntimeHandle {
    /// Wrap an existing tokio runtime handle.
    pub fn new(handle: Handle) -> Self {
        TokioRuntimeHandle { handle }
    }
}

impl SleepProvider for TokioRuntimeHandle {
    type SleepFuture = tokio_crate::time::Sleep;
    fn sleep(&self, duration: Duration) -> Self::SleepFuture {
        // Entering the runtime lets us build timers from outside of it.
        let _guard = self.handle.enter();
        tokio_crate::time::sleep(duration)
    }
}

impl SpawnBlocking for TokioRuntimeHandle {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

#[async_trait]
impl PlatformSocket for TokioRuntimeHandle {
    type Handle = TcpHandle;
    type Listener = TcpListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<TcpHandle> {
        let stream = TokioTcpStream::connect(addr).await?;
        Ok(stream.into())
    }

    async fn listen(&self, addr: &SocketAddr) -> IoResult<TcpListener> {
        let listener = TokioTcpListener::bind(addr).await?;
        Ok(TcpListener { listener })
    }
}

/// An owned tokio runtime.
///
/// This type is not itself a [`Runtime`]: use [`TokioRuntime::handle()`]
/// to get one.  Keeping ownership separate from the handles means the
/// tokio runtime is always dropped from synchronous code, never from
/// inside one of its own tasks.
#[derive(Debug)]
pub struct TokioRuntime {
    /// The runtime we own.
    runtime: TokioRt,
}

impl TokioRuntime {
    /// Return a new [`Runtime`] handle for this runtime.
    pub fn handle(&self) -> TokioRuntimeHandle {
        TokioRuntimeHandle::new(self.runtime.handle().clone())
    }

    /// Run `future` to completion on this runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Create a new tokio-based runtime.
///
/// Generally you should call this function only once, and then use
/// [`TokioRuntime::handle()`] to get as many [`Runtime`]s as you need.
pub fn create_runtime() -> IoResult<TokioRuntime> {
    let runtime = Builder::new_multi_thread().enable_all().build()?;
    Ok(TokioRuntime { runtime })
}

/// Try to return an instance of the currently running tokio [`Runtime`].
///
/// This is for users who already have a tokio runtime and want to use
/// socksdial from inside it.
pub fn current_runtime() -> IoResult<TokioRuntimeHandle> {
    let handle = Handle::try_current().map_err(|e| IoError::new(ErrorKind::Other, e))?;
    Ok(TokioRuntimeHandle::new(handle))
}

/// Run a test function using a freshly created tokio runtime.
///
/// # Panics
///
/// Panics if the runtime can't be created.
pub fn test_with_runtime<P, F, O>(func: P) -> O
where
    P: FnOnce(TokioRuntimeHandle) -> F,
    F: Future<Output = O>,
{
    let runtime = create_runtime().expect("Couldn't create a tokio runtime");
    let handle = runtime.handle();
    runtime.block_on(func(handle))
}
