//! A virtual monotonic clock for unit tests.
//!
//! [`MockSleepProvider`] lets tests exercise connect timeouts and
//! handshake deadlines without anybody waiting for the real clock.

use futures::future::poll_fn;
use futures::Future;
use socksdial_rtcompat::SleepProvider;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// A [`SleepProvider`] whose time only moves when told to.
///
/// The clock starts at the real time of its creation.  [`jump`](Self::jump)
/// and [`advance`](Self::advance) move it forward and wake every sleeper
/// whose time has come.  Clones share the same clock.
#[derive(Clone)]
pub struct MockSleepProvider {
    /// The clock, shared with every [`Sleeping`] future.
    clock: Arc<Mutex<Clock>>,
}

/// The state behind a [`MockSleepProvider`].
struct Clock {
    /// What time we pretend it is.
    now: Instant,
    /// Used to tell apart sleepers that wake at the same instant.
    next_id: u64,
    /// Registered sleepers, by wake time.
    sleepers: BTreeMap<(Instant, u64), Waker>,
}

/// A future returned by [`MockSleepProvider::sleep()`].
///
/// Dropping it before it fires takes it off the schedule.
pub struct Sleeping {
    /// When we become ready.
    wake_at: Instant,
    /// Our key in the schedule, once we've registered.
    key: Option<(Instant, u64)>,
    /// The clock we're waiting on.
    clock: Weak<Mutex<Clock>>,
}

impl MockSleepProvider {
    /// Create a new clock, set to the current real time.
    pub fn new() -> Self {
        MockSleepProvider {
            clock: Arc::new(Mutex::new(Clock {
                now: Instant::now(),
                next_id: 0,
                sleepers: BTreeMap::new(),
            })),
        }
    }

    /// Lock the clock.
    fn lock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().expect("poisoned lock")
    }

    /// Move the clock forward by `dur` and wake whoever is due, without
    /// giving them a chance to run.
    pub fn jump(&self, dur: Duration) {
        let due = {
            let mut clock = self.lock();
            clock.now += dur;
            let now = clock.now;
            let later = clock.sleepers.split_off(&(now, u64::MAX));
            std::mem::replace(&mut clock.sleepers, later)
        };
        for (_, waker) in due {
            waker.wake();
        }
    }

    /// Move the clock forward by `dur`, then yield once so that whoever
    /// woke up gets to run.
    pub async fn advance(&self, dur: Duration) {
        self.jump(dur);
        let mut yielded = false;
        poll_fn(|cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await;
    }

    /// Return how long until the next sleeper is due, or None if nobody is
    /// sleeping.
    pub fn next_wake(&self) -> Option<Duration> {
        let clock = self.lock();
        clock
            .sleepers
            .keys()
            .next()
            .map(|(when, _)| when.saturating_duration_since(clock.now))
    }

    /// Return the number of sleepers waiting to be woken.
    pub fn sleepers(&self) -> usize {
        self.lock().sleepers.len()
    }
}

impl Default for MockSleepProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepProvider for MockSleepProvider {
    type SleepFuture = Sleeping;

    fn sleep(&self, duration: Duration) -> Sleeping {
        Sleeping {
            wake_at: self.now() + duration,
            key: None,
            clock: Arc::downgrade(&self.clock),
        }
    }

    fn now(&self) -> Instant {
        self.lock().now
    }
}

impl Future for Sleeping {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let shared = match self.clock.upgrade() {
            Some(c) => c,
            // Nobody can ever move the clock again.
            None => return Poll::Pending,
        };
        let mut clock = shared.lock().expect("poisoned lock");
        if clock.now >= self.wake_at {
            if let Some(key) = self.key.take() {
                clock.sleepers.remove(&key);
            }
            return Poll::Ready(());
        }
        let key = match self.key {
            Some(key) => key,
            None => {
                let key = (self.wake_at, clock.next_id);
                clock.next_id += 1;
                key
            }
        };
        clock.sleepers.insert(key, cx.waker().clone());
        drop(clock);
        self.key = Some(key);
        Poll::Pending
    }
}

impl Drop for Sleeping {
    fn drop(&mut self) {
        if let (Some(key), Some(clock)) = (self.key.take(), self.clock.upgrade()) {
            clock.lock().expect("poisoned lock").sleepers.remove(&key);
        }
    }
}
