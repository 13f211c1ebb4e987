//! Bounding a future by a time limit.

use crate::traits::SleepProvider;
use futures::Future;
use pin_project::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;

/// A future did not finish within its time limit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("Timed out after {limit:?}")]
pub struct TimeoutError {
    /// The limit that ran out.
    limit: Duration,
}

impl TimeoutError {
    /// Return the limit that ran out.
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

/// Time limits for any [`SleepProvider`].
pub trait SleepProviderExt: SleepProvider {
    /// Run `future`, giving up with a [`TimeoutError`] if it hasn't
    /// finished after `limit`.
    fn timeout<F: Future>(&self, limit: Duration, future: F) -> Timeout<F, Self::SleepFuture> {
        self.timeout_opt(Some(limit), future)
    }

    /// As [`timeout`](SleepProviderExt::timeout), but `None` means the
    /// future may take as long as it likes.
    fn timeout_opt<F: Future>(
        &self,
        limit: Option<Duration>,
        future: F,
    ) -> Timeout<F, Self::SleepFuture> {
        Timeout {
            inner: future,
            limit: limit.unwrap_or_default(),
            alarm: limit.map(|d| self.sleep(d)),
        }
    }
}

impl<T: SleepProvider> SleepProviderExt for T {}

/// A future with a time limit, returned by [`SleepProviderExt::timeout`].
///
/// The inner future gets polled first, so one that is ready at the same
/// moment the limit runs out still succeeds.
#[pin_project]
pub struct Timeout<F, S> {
    /// The future doing the real work.
    #[pin]
    inner: F,
    /// The time limit, for error reporting.
    limit: Duration,
    /// Becomes ready when time is up; absent when there's no limit.
    #[pin]
    alarm: Option<S>,
}

impl<F, S> Future for Timeout<F, S>
where
    F: Future,
    S: Future<Output = ()>,
{
    type Output = Result<F::Output, TimeoutError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(v) = this.inner.poll(cx) {
            return Poll::Ready(Ok(v));
        }
        match this.alarm.as_pin_mut().map(|alarm| alarm.poll(cx)) {
            Some(Poll::Ready(())) => Poll::Ready(Err(TimeoutError { limit: *this.limit })),
            _ => Poll::Pending,
        }
    }
}
