//! A connected socket, shared safely between a reader, a writer, and a
//! closer.

use crate::endpoint::Endpoint;
use crate::handle::HandleGuard;
use crate::reset::{ResetState, ResetTracker};
use crate::{Error, Result};

use socksdial_rtcompat::SocketHandle;
use std::io::{Error as IoError, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A connected TCP socket, possibly tunneled through a SOCKS proxy.
///
/// All methods take `&self`: one task may read while another writes and
/// a third closes.  The handle is only released once every in-flight
/// operation has finished.
///
/// When the socket was made through a proxy, [`remote_endpoint`]
/// (Self::remote_endpoint) reports where the proxy connected us, not the
/// proxy itself.
#[derive(Debug)]
pub struct Socket<H: SocketHandle> {
    /// The handle and its use count.
    guard: HandleGuard<H>,
    /// Whether the peer has reset the connection.
    reset: ResetTracker,
    /// True once `shutdown_input` has been called.
    input_shut: AtomicBool,
    /// True once `shutdown_output` has been called.
    output_shut: AtomicBool,
    /// The endpoint the proxy reported, if we went through one.
    external: Option<Endpoint>,
}

/// Return true if `e` is the platform telling us about a reset.
fn is_reset(e: &IoError) -> bool {
    e.kind() == ErrorKind::ConnectionReset
}

impl<H: SocketHandle> Socket<H> {
    /// Wrap a freshly connected handle.
    pub fn new(handle: H) -> Self {
        Socket {
            guard: HandleGuard::new(handle),
            reset: ResetTracker::new(),
            input_shut: AtomicBool::new(false),
            output_shut: AtomicBool::new(false),
            external: None,
        }
    }

    /// Record the endpoint a proxy reported for this connection.
    pub(crate) fn with_external(mut self, endpoint: Endpoint) -> Self {
        self.external = Some(endpoint);
        self
    }

    /// Read some bytes into `buf`.
    ///
    /// Returns 0 at end of stream, or after `shutdown_input`.  If the
    /// platform reports a reset, we try once more in case it still holds
    /// data from before the reset; after that every read fails with
    /// [`Error::ConnectionReset`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reset.is_reset() {
            return Err(Error::ConnectionReset);
        }
        if self.input_shut.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let lease = self.guard.lease();
        let h = match lease.handle() {
            Some(h) if !self.guard.is_closed_or_pending() => h,
            _ => return Err(Error::HandleClosed),
        };

        let mut got_reset = false;
        match h.read(buf).await {
            Ok(n) if n > 0 => return Ok(n),
            Ok(_) => {}
            Err(e) if is_reset(&e) => got_reset = true,
            Err(e) => return Err(e.into()),
        }

        if got_reset {
            self.reset.mark_pending();
            match h.read(buf).await {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if is_reset(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        drop(lease);

        // End of stream, closed, or reset.
        if self.guard.is_closed_or_pending() {
            return Err(Error::HandleClosed);
        }
        if self.reset.is_pending() {
            debug!("Connection reset after draining buffered data");
            self.reset.mark_reset();
        }
        if self.reset.is_reset() {
            return Err(Error::ConnectionReset);
        }
        Ok(0)
    }

    /// Write some bytes from `buf`, returning how many were written.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.output_shut.load(Ordering::SeqCst) {
            return Err(IoError::new(ErrorKind::BrokenPipe, "Socket output is shutdown").into());
        }
        let lease = self.guard.lease();
        let h = match lease.handle() {
            Some(h) if !self.guard.is_closed_or_pending() => h,
            _ => return Err(Error::HandleClosed),
        };
        match h.write(buf).await {
            Ok(n) => Ok(n),
            Err(_) if self.guard.is_closed_or_pending() => Err(Error::HandleClosed),
            Err(e) => Err(e.into()),
        }
    }

    /// Write all of `buf`.
    pub async fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(IoError::new(ErrorKind::WriteZero, "failed to write whole buffer").into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Return the number of bytes that can be read without blocking.
    ///
    /// Once the connection is reset, or input is shut down, this is always 0.
    /// If the platform reports nothing to read while a reset is pending,
    /// the connection becomes reset.
    pub fn available(&self) -> Result<usize> {
        if self.guard.is_closed_or_pending() {
            return Err(Error::HandleClosed);
        }
        if self.reset.is_reset() || self.input_shut.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let lease = self.guard.lease();
        let h = lease.handle().ok_or(Error::HandleClosed)?;
        match h.available() {
            Ok(n) => {
                if n == 0 && self.reset.is_pending() {
                    self.reset.mark_reset();
                }
                Ok(n)
            }
            Err(e) if is_reset(&e) => {
                self.reset.mark_pending();
                match h.available() {
                    Ok(0) | Err(_) => {
                        self.reset.mark_reset();
                        Ok(0)
                    }
                    Ok(n) => Ok(n),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop reading: later reads return end-of-stream.
    pub fn shutdown_input(&self) -> Result<()> {
        self.shutdown(Shutdown::Read, &self.input_shut)
    }

    /// Stop writing: the peer sees end-of-stream.
    pub fn shutdown_output(&self) -> Result<()> {
        self.shutdown(Shutdown::Write, &self.output_shut)
    }

    /// Shut down one direction, and set `flag`.
    fn shutdown(&self, how: Shutdown, flag: &AtomicBool) -> Result<()> {
        let lease = self.guard.lease();
        match lease.handle() {
            Some(h) if !self.guard.is_closed_or_pending() => {
                h.shutdown(how)?;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(Error::HandleClosed),
        }
    }

    /// Close this socket.
    ///
    /// Blocked reads and writes wake up at once; the handle is released
    /// when the last of them is done.  Closing twice is harmless.
    pub fn close(&self) {
        self.guard.close();
    }

    /// Return true if this socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.guard.is_closed_or_pending()
    }

    /// Return the current reset state.
    pub fn reset_state(&self) -> ResetState {
        self.reset.state()
    }

    /// Return the local address of the underlying connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let lease = self.guard.lease();
        let h = lease.handle().ok_or(Error::HandleClosed)?;
        Ok(h.local_addr()?)
    }

    /// Return the address we are actually connected to: the proxy, if we
    /// went through one.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let lease = self.guard.lease();
        let h = lease.handle().ok_or(Error::HandleClosed)?;
        Ok(h.peer_addr()?)
    }

    /// Return the endpoint the proxy reported, if we went through one.
    pub fn external_endpoint(&self) -> Option<&Endpoint> {
        self.external.as_ref()
    }

    /// Return the logical remote endpoint of this socket.
    ///
    /// This is the proxy-reported endpoint if there is one, and the peer
    /// address otherwise.
    pub fn remote_endpoint(&self) -> Result<Endpoint> {
        match &self.external {
            Some(e) => Ok(e.clone()),
            None => Ok(self.peer_addr()?.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::executor::block_on;
    use socksdial_rtmock::io::{handle_pair, MockHandle};

    fn pair() -> (Socket<MockHandle>, MockHandle) {
        let (a, b) = handle_pair(
            "192.0.2.1:1000".parse().unwrap(),
            "192.0.2.2:2000".parse().unwrap(),
        );
        (Socket::new(a), b)
    }

    #[test]
    fn read_write() -> Result<()> {
        block_on(async {
            let (s, peer) = pair();
            s.write_all(b"ping").await?;
            let mut buf = [0_u8; 4];
            peer.read_exact(&mut buf[..]).await?;
            assert_eq!(&buf, b"ping");

            peer.write_all(b"pong").await?;
            assert_eq!(s.available()?, 4);
            let n = s.read(&mut buf[..]).await?;
            assert_eq!(&buf[..n], b"pong");

            assert_eq!(s.local_addr()?, "192.0.2.1:1000".parse().unwrap());
            assert_eq!(s.remote_endpoint()?, "192.0.2.2:2000".parse().unwrap());
            assert!(s.external_endpoint().is_none());
            Ok(())
        })
    }

    #[test]
    fn reset_after_data() -> Result<()> {
        block_on(async {
            let (s, peer) = pair();
            peer.write_all(b"leftover").await?;
            peer.abort();

            // The first read sees the reset, retries, and gets the data.
            let mut buf = [0_u8; 16];
            let n = s.read(&mut buf[..]).await?;
            assert_eq!(&buf[..n], b"leftover");
            assert_eq!(s.reset_state(), ResetState::ResetPending);

            // Nothing else is coming.
            assert!(matches!(s.read(&mut buf[..]).await, Err(Error::ConnectionReset)));
            assert_eq!(s.reset_state(), ResetState::Reset);
            assert!(matches!(s.read(&mut buf[..]).await, Err(Error::ConnectionReset)));
            assert_eq!(s.available()?, 0);
            Ok(())
        })
    }

    #[test]
    fn reset_without_data() {
        block_on(async {
            let (s, peer) = pair();
            peer.abort();
            let mut buf = [0_u8; 16];
            assert!(matches!(s.read(&mut buf[..]).await, Err(Error::ConnectionReset)));
            assert_eq!(s.reset_state(), ResetState::Reset);
        });
    }

    #[test]
    fn available_escalates_pending_reset() -> Result<()> {
        block_on(async {
            let (s, peer) = pair();
            peer.write_all(b"ab").await?;
            peer.abort();
            let mut buf = [0_u8; 1];
            // Reset seen; retry drains one byte.
            assert_eq!(s.read(&mut buf[..]).await?, 1);
            assert_eq!(s.reset_state(), ResetState::ResetPending);
            assert_eq!(s.available()?, 1);
            assert_eq!(s.reset_state(), ResetState::ResetPending);
            assert_eq!(s.read(&mut buf[..]).await?, 1);
            assert_eq!(s.available()?, 0);
            assert_eq!(s.reset_state(), ResetState::Reset);
            Ok(())
        })
    }

    #[test]
    fn shutdown_directions() -> Result<()> {
        block_on(async {
            let (s, peer) = pair();
            peer.write_all(b"ignored").await?;
            s.shutdown_input()?;
            let mut buf = [0_u8; 8];
            assert_eq!(s.read(&mut buf[..]).await?, 0);
            assert_eq!(s.available()?, 0);

            s.shutdown_output()?;
            assert!(matches!(s.write(b"x").await, Err(Error::Io(_))));
            assert_eq!(peer.read_to_end().await?, Vec::<u8>::new());
            Ok(())
        })
    }

    #[test]
    fn close_wakes_reader() {
        block_on(async {
            let (s, _peer) = pair();
            let (r, ()) = futures::join!(
                async {
                    let mut buf = [0_u8; 8];
                    s.read(&mut buf[..]).await
                },
                async { s.close() }
            );
            assert!(matches!(r, Err(Error::HandleClosed)));
            assert!(s.is_closed());
            assert!(matches!(s.write(b"x").await, Err(Error::HandleClosed)));
            assert!(matches!(s.available(), Err(Error::HandleClosed)));
        });
    }

    #[test]
    fn close_releases_handle_once() {
        let (a, _b) = handle_pair(
            "192.0.2.1:1000".parse().unwrap(),
            "192.0.2.2:2000".parse().unwrap(),
        );
        let stats = a.stats();
        let s = Socket::new(a);
        s.close();
        s.close();
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.shutdowns(), 1);
    }
}
