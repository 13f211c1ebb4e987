//! In-memory connected socket handles.
//!
//! A [`MockHandle`] pair behaves like the two ends of a TCP connection,
//! with a few extra knobs for tests: the peer can be made to reset the
//! connection, and every handle counts how often it was shut down and
//! closed.

use async_trait::async_trait;
use futures::future::poll_fn;
use socksdial_rtcompat::SocketHandle;
use std::collections::VecDeque;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

/// Whether a reset has been injected into a pipe, and whether its
/// reader has noticed yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ResetMark {
    /// No reset.
    None,
    /// Reset injected; the next read reports it.
    Unreported,
    /// Reset already reported once; reads fail again once the buffer is
    /// drained.
    Reported,
}

/// One direction of a mock connection.
#[derive(Debug)]
struct Pipe {
    /// Bytes written but not yet read.
    data: VecDeque<u8>,
    /// True once the writing side has shut down or gone away.
    eof: bool,
    /// True once the reading side has shut down or gone away.
    reader_gone: bool,
    /// Reset state, as seen by the reading side.
    reset: ResetMark,
    /// The reader blocked on this pipe, if any.
    waker: Option<Waker>,
}

impl Pipe {
    /// Return a new empty pipe.
    fn new() -> Self {
        Pipe {
            data: VecDeque::new(),
            eof: false,
            reader_gone: false,
            reset: ResetMark::None,
            waker: None,
        }
    }

    /// Wake the reader blocked on this pipe, if any.
    fn wake(&mut self) {
        if let Some(w) = self.waker.take() {
            w.wake();
        }
    }

    /// Try to read from this pipe into `buf`.
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<IoResult<usize>> {
        if self.reset == ResetMark::Unreported {
            self.reset = ResetMark::Reported;
            return Poll::Ready(Err(reset_error()));
        }
        if self.reader_gone {
            return Poll::Ready(Ok(0));
        }
        if !self.data.is_empty() {
            let n = std::cmp::min(buf.len(), self.data.len());
            for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
                *dst = src;
            }
            return Poll::Ready(Ok(n));
        }
        if self.reset == ResetMark::Reported {
            return Poll::Ready(Err(reset_error()));
        }
        if self.eof {
            return Poll::Ready(Ok(0));
        }
        self.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Append `buf` to this pipe.
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        if self.eof || self.reader_gone {
            return Err(IoError::new(ErrorKind::BrokenPipe, "mock pipe is closed"));
        }
        self.data.extend(buf.iter().copied());
        self.wake();
        Ok(buf.len())
    }
}

/// Return the error a reader sees after its peer reset the connection.
fn reset_error() -> IoError {
    IoError::new(ErrorKind::ConnectionReset, "connection reset by peer")
}

/// Counters describing what has been done to a [`MockHandle`].
///
/// Tests keep an `Arc` to these (see [`MockHandle::stats`]) so that they
/// can inspect a handle after it has been moved or closed.
#[derive(Debug, Default)]
pub struct HandleStats {
    /// Number of calls to `shutdown()`.
    shutdowns: AtomicUsize,
    /// Number of calls to `close()`.
    closes: AtomicUsize,
}

impl HandleStats {
    /// Return how many times `shutdown()` was called on the handle.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Return how many times `close()` was called on the handle.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// One end of an in-memory connection.
///
/// Writes never block: the buffer in each direction is unbounded.
/// Dropping a handle shuts down both directions, like closing a socket.
#[derive(Debug)]
pub struct MockHandle {
    /// The pipe we read from.
    inbound: Arc<Mutex<Pipe>>,
    /// The pipe we write to.
    outbound: Arc<Mutex<Pipe>>,
    /// Our own address.
    local: SocketAddr,
    /// The address of the other end.
    peer: SocketAddr,
    /// What has been done to this handle.
    stats: Arc<HandleStats>,
}

/// Lock one of our pipes.
fn lock(pipe: &Mutex<Pipe>) -> MutexGuard<'_, Pipe> {
    pipe.lock().expect("poisoned lock")
}

/// Create a connected pair of handles, with addresses `a` and `b`.
///
/// The first handle returned is the one at `a`.
pub fn handle_pair(a: SocketAddr, b: SocketAddr) -> (MockHandle, MockHandle) {
    let ab = Arc::new(Mutex::new(Pipe::new()));
    let ba = Arc::new(Mutex::new(Pipe::new()));
    let h1 = MockHandle {
        inbound: Arc::clone(&ba),
        outbound: Arc::clone(&ab),
        local: a,
        peer: b,
        stats: Arc::new(HandleStats::default()),
    };
    let h2 = MockHandle {
        inbound: ab,
        outbound: ba,
        local: b,
        peer: a,
        stats: Arc::new(HandleStats::default()),
    };
    (h1, h2)
}

impl MockHandle {
    /// Return a reference to the counters for this handle.
    pub fn stats(&self) -> Arc<HandleStats> {
        Arc::clone(&self.stats)
    }

    /// Simulate an abortive close from this end.
    ///
    /// The peer's next read fails with `ConnectionReset`; after that it
    /// can still drain whatever we wrote before aborting, and then fails
    /// with `ConnectionReset` again.
    pub fn abort(&self) {
        {
            let mut out = lock(&self.outbound);
            out.reset = ResetMark::Unreported;
            out.eof = true;
            out.wake();
        }
        let mut inb = lock(&self.inbound);
        inb.reader_gone = true;
        inb.wake();
    }

    /// Write all of `buf`.
    pub async fn write_all(&self, buf: &[u8]) -> IoResult<()> {
        let n = self.write(buf).await?;
        debug_assert_eq!(n, buf.len());
        Ok(())
    }

    /// Read exactly enough bytes to fill `buf`.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    pub async fn read_exact(&self, buf: &mut [u8]) -> IoResult<()> {
        let mut got = 0;
        while got < buf.len() {
            let n = self.read(&mut buf[got..]).await?;
            if n == 0 {
                return Err(IoError::new(ErrorKind::UnexpectedEof, "mock stream ended"));
            }
            got += n;
        }
        Ok(())
    }

    /// Read until end-of-stream, and return everything that was read.
    pub async fn read_to_end(&self) -> IoResult<Vec<u8>> {
        let mut result = Vec::new();
        let mut buf = [0_u8; 256];
        loop {
            let n = self.read(&mut buf[..]).await?;
            if n == 0 {
                return Ok(result);
            }
            result.extend_from_slice(&buf[..n]);
        }
    }

    /// Shut down the directions named by `how`, without counting it.
    fn shutdown_inner(&self, how: Shutdown) {
        if matches!(how, Shutdown::Read | Shutdown::Both) {
            let mut inb = lock(&self.inbound);
            inb.reader_gone = true;
            inb.wake();
        }
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            let mut out = lock(&self.outbound);
            out.eof = true;
            out.wake();
        }
    }
}

#[async_trait]
impl SocketHandle for MockHandle {
    async fn read(&self, buf: &mut [u8]) -> IoResult<usize> {
        poll_fn(|cx| lock(&self.inbound).poll_read(cx, &mut buf[..])).await
    }

    async fn write(&self, buf: &[u8]) -> IoResult<usize> {
        lock(&self.outbound).write(buf)
    }

    fn available(&self) -> IoResult<usize> {
        let inb = lock(&self.inbound);
        if inb.reader_gone {
            Ok(0)
        } else {
            Ok(inb.data.len())
        }
    }

    fn shutdown(&self, how: Shutdown) -> IoResult<()> {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.shutdown_inner(how);
        Ok(())
    }

    fn local_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.local)
    }

    fn peer_addr(&self) -> IoResult<SocketAddr> {
        Ok(self.peer)
    }

    fn close(self) -> IoResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        // The rest happens in Drop.
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shutdown_inner(Shutdown::Both);
    }
}
