//! A runtime made of a mock clock and a mock network.

use crate::io::MockHandle;
use crate::net::{MockNetListener, MockNetProvider};
use crate::time::{MockSleepProvider, Sleeping};
use socksdial_rtcompat::{PlatformSocket, SleepProvider, SpawnBlocking};

use async_trait::async_trait;
use futures::future::poll_fn;
use futures::Future;
use std::io::Result as IoResult;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::{Duration, Instant};

/// How far [`MockRuntime::wait_for`] moves the clock when nobody is
/// asleep yet.
const IDLE_STEP: Duration = Duration::from_millis(1);

/// A [`Runtime`](socksdial_rtcompat::Runtime) for tests: one host on a
/// [`MockNetwork`](crate::net::MockNetwork), with a virtual clock.
///
/// `block_on` uses [`futures::executor::block_on`].
#[derive(Clone)]
pub struct MockRuntime {
    /// The host we connect and listen as.
    net: MockNetProvider,
    /// Our clock.
    clock: MockSleepProvider,
}

impl MockRuntime {
    /// Return a runtime for the host `net`, with a fresh clock.
    pub fn new(net: MockNetProvider) -> Self {
        MockRuntime {
            net,
            clock: MockSleepProvider::new(),
        }
    }

    /// Return our clock.
    pub fn mock_sleep(&self) -> &MockSleepProvider {
        &self.clock
    }

    /// Return our host.
    pub fn mock_net(&self) -> &MockNetProvider {
        &self.net
    }

    /// Move the clock forward by `dur`; see [`MockSleepProvider::advance`].
    pub async fn advance(&self, dur: Duration) {
        self.clock.advance(dur).await;
    }

    /// Run `fut` to completion, moving the clock forward whenever it
    /// can't make progress.
    ///
    /// Each time `fut` is stuck, the clock jumps to the next sleeper's
    /// wake time, so a future that is only waiting on timeouts finishes
    /// at exactly the virtual time those timeouts fire.
    pub async fn wait_for<F: Future>(&self, fut: F) -> F::Output {
        futures::pin_mut!(fut);
        loop {
            if let Poll::Ready(v) = poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx))).await {
                return v;
            }
            let step = self.clock.next_wake().unwrap_or(IDLE_STEP);
            self.clock.advance(step).await;
        }
    }
}

impl SpawnBlocking for MockRuntime {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        futures::executor::block_on(future)
    }
}

#[async_trait]
impl PlatformSocket for MockRuntime {
    type Handle = MockHandle;
    type Listener = MockNetListener;

    async fn connect(&self, addr: &SocketAddr) -> IoResult<MockHandle> {
        self.net.connect(addr).await
    }

    async fn listen(&self, addr: &SocketAddr) -> IoResult<MockNetListener> {
        self.net.listen(addr).await
    }
}

impl SleepProvider for MockRuntime {
    type SleepFuture = Sleeping;

    fn sleep(&self, dur: Duration) -> Sleeping {
        self.clock.sleep(dur)
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
