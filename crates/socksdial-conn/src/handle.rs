//! Reference-counted ownership of a socket handle.
//!
//! A connected socket may be used by a reader task, a writer task, and a
//! closer task at the same time.  The [`HandleGuard`] decides when the
//! underlying handle may really be closed: users bracket their I/O with
//! [`acquire`](HandleGuard::acquire) and [`release`](HandleGuard::release)
//! (or hold a [`HandleLease`]), and [`close`](HandleGuard::close) shuts
//! the handle down at once but only releases it after the last user is
//! done.
//!
//! The guard's `use_count` starts at 0 and counts active users.  A close
//! while users are active takes one away from the count on the closer's
//! behalf, so the count reaches -1 exactly when the last user releases;
//! that user then closes the handle.

use socksdial_rtcompat::SocketHandle;

use std::net::Shutdown;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

/// Owner of a socket handle that may be shared by several tasks.
#[derive(Debug)]
pub struct HandleGuard<H> {
    /// The state we protect.  Never held across an await point.
    state: Mutex<GuardState<H>>,
}

/// The mutable part of a [`HandleGuard`].
#[derive(Debug)]
struct GuardState<H> {
    /// The handle, until it has been closed.
    handle: Option<Arc<H>>,
    /// Number of active users, or -1 once the deferred close has happened.
    use_count: i32,
    /// True once `close()` has been called.  Never cleared.
    close_pending: bool,
}

impl<H: SocketHandle> HandleGuard<H> {
    /// Take ownership of `handle`.
    pub fn new(handle: H) -> Self {
        HandleGuard {
            state: Mutex::new(GuardState {
                handle: Some(Arc::new(handle)),
                use_count: 0,
                close_pending: false,
            }),
        }
    }

    /// Lock the state.
    fn lock(&self) -> MutexGuard<'_, GuardState<H>> {
        self.state.lock().expect("poisoned lock")
    }

    /// Register a new user of the handle, and return the handle.
    ///
    /// Returns None if the handle has already been closed; callers must
    /// still call [`release`](Self::release) in that case.
    pub fn acquire(&self) -> Option<Arc<H>> {
        let mut st = self.lock();
        st.use_count += 1;
        st.handle.clone()
    }

    /// Unregister a user of the handle.
    ///
    /// If a close is pending and this was the last user, closes the handle.
    /// The caller must have dropped the `Arc` it got from `acquire` first.
    pub fn release(&self) {
        let mut st = self.lock();
        st.use_count -= 1;
        if st.use_count == -1 {
            if let Some(h) = st.handle.take() {
                trace!("Last user released handle; closing it");
                real_close(h);
            }
        }
    }

    /// Close the handle.
    ///
    /// If nobody is using the handle, it is shut down and closed
    /// immediately.  Otherwise it is only shut down, so that blocked I/O
    /// wakes up, and the last user to release it closes it.  Errors are
    /// logged and swallowed.  Calling this more than once does nothing.
    pub fn close(&self) {
        let mut st = self.lock();
        let h = match &st.handle {
            Some(h) => Arc::clone(h),
            None => return,
        };
        if st.use_count == 0 {
            if st.close_pending {
                return;
            }
            st.close_pending = true;
            pre_close(&*h);
            drop(h);
            if let Some(h) = st.handle.take() {
                real_close(h);
            }
        } else if !st.close_pending {
            st.close_pending = true;
            st.use_count -= 1;
            debug!("Handle in use; deferring close");
            pre_close(&*h);
        }
    }

    /// Return true if the handle has been closed, or a close is pending.
    pub fn is_closed_or_pending(&self) -> bool {
        let st = self.lock();
        st.close_pending || st.handle.is_none()
    }

    /// Acquire the handle, and release it when the returned lease is
    /// dropped.
    pub fn lease(&self) -> HandleLease<'_, H> {
        let handle = self.acquire();
        HandleLease {
            guard: self,
            handle,
        }
    }

    /// Return the current use count.
    #[cfg(test)]
    fn use_count(&self) -> i32 {
        self.lock().use_count
    }
}

/// Shut down both directions of `h`, without releasing it.
fn pre_close<H: SocketHandle>(h: &H) {
    if let Err(e) = h.shutdown(Shutdown::Both) {
        debug!("Ignoring error while shutting down handle: {}", e);
    }
}

/// Release `h`.
fn real_close<H: SocketHandle>(h: Arc<H>) {
    match Arc::try_unwrap(h) {
        Ok(h) => {
            if let Err(e) = h.close() {
                debug!("Ignoring error while closing handle: {}", e);
            }
        }
        Err(_) => {
            // Somebody kept a reference past release(); the handle is
            // closed when that reference goes away.
            warn!("Handle still referenced at close; deferring to drop");
        }
    }
}

/// A registered use of a [`HandleGuard`]'s handle.
///
/// Dropping the lease drops its reference to the handle, then releases
/// the guard.
#[derive(Debug)]
pub struct HandleLease<'a, H: SocketHandle> {
    /// The guard to release when we're done.
    guard: &'a HandleGuard<H>,
    /// The handle, if it wasn't closed when we acquired it.
    handle: Option<Arc<H>>,
}

impl<'a, H: SocketHandle> HandleLease<'a, H> {
    /// Return the handle, if it was still open when this lease began.
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_deref()
    }
}

impl<'a, H: SocketHandle> Drop for HandleLease<'a, H> {
    fn drop(&mut self) {
        drop(self.handle.take());
        self.guard.release();
    }
}
