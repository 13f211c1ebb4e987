//! A single deadline shared by every step of a connect.

use crate::{Error, Result};

use futures::Future;
use socksdial_rtcompat::{SleepProvider, SleepProviderExt};
use std::convert::TryFrom;
use std::time::{Duration, Instant};

/// The time by which a whole connect attempt must finish.
///
/// A deadline is computed once, when a connect starts, and then every
/// sub-operation (connecting to each proxy candidate, each handshake read
/// and write) asks it how much time is left.  It is never restarted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    /// When we run out of time, or None for no limit.
    expires: Option<Instant>,
}

impl Deadline {
    /// Return a deadline `timeout` after `now`.
    ///
    /// A zero timeout means no deadline at all, and so does a timeout so
    /// large that it overflows.
    pub fn start(now: Instant, timeout: Duration) -> Self {
        let expires = if timeout == Duration::from_secs(0) {
            None
        } else {
            now.checked_add(timeout)
        };
        Deadline { expires }
    }

    /// Return a deadline that never expires.
    pub fn unbounded() -> Self {
        Deadline { expires: None }
    }

    /// Return true if this deadline never expires.
    pub fn is_unbounded(&self) -> bool {
        self.expires.is_none()
    }

    /// Return how much time is left at `now`, or None if there is no limit.
    ///
    /// Fails with [`Error::Timeout`] once no time is left.
    pub fn remaining(&self, now: Instant) -> Result<Option<Duration>> {
        match self.expires {
            None => Ok(None),
            Some(t) if t > now => Ok(Some(t - now)),
            Some(_) => Err(Error::Timeout),
        }
    }

    /// Return how many milliseconds are left at `now`, where 0 means
    /// "no limit".
    ///
    /// Fails with [`Error::Timeout`] once no time is left.  A deadline
    /// with less than a millisecond left reports 1, never 0.
    pub fn remaining_ms(&self, now: Instant) -> Result<u64> {
        Ok(match self.remaining(now)? {
            None => 0,
            Some(d) => {
                let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
                ms.max(1)
            }
        })
    }

    /// Run `fut` with whatever time is left, according to `clock`.
    ///
    /// Fails with [`Error::Timeout`] if there's no time left to start, or
    /// if the time runs out first.
    pub async fn run<S, F>(&self, clock: &S, fut: F) -> Result<F::Output>
    where
        S: SleepProvider,
        F: Future,
    {
        let remaining = self.remaining(clock.now())?;
        Ok(clock.timeout_opt(remaining, fut).await?)
    }
}
