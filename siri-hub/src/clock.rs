//! Process-wide clock seam with a deterministic fake for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// All time-dependent code reads the wall clock and waits through this trait.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Completes once `duration` has elapsed on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

struct FakeClockState {
    now: DateTime<Utc>,
    waiters: Vec<FakeWaiter>,
}

struct FakeWaiter {
    deadline: DateTime<Utc>,
    wake: oneshot::Sender<()>,
}

/// Deterministic clock: time only moves through [`FakeClock::advance`].
///
/// `block_until(n)` parks the caller until `n` sleepers are registered, so a
/// test can line up a guardian or broadcaster loop before advancing time.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<Mutex<FakeClockState>>,
    waiters_changed: Arc<Notify>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(DateTime::parse_from_rfc3339("2017-01-01T12:00:00Z")
            .expect("constant timestamp parses")
            .with_timezone(&Utc))
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeClockState {
                now,
                waiters: Vec::new(),
            })),
            waiters_changed: Arc::new(Notify::new()),
        }
    }

    /// Moves the clock forward and wakes every sleeper whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.now += chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let now = state.now;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|waiter| waiter.deadline <= now);
            state.waiters = pending;
            due
        };
        for waiter in due {
            let _ = waiter.wake.send(());
        }
        self.waiters_changed.notify_waiters();
    }

    /// Waits until at least `count` tasks are parked in [`Clock::sleep`].
    pub async fn block_until(&self, count: usize) {
        loop {
            let notified = self.waiters_changed.notified();
            if self.state.lock().waiters.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let (wake, waked) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let deadline = state.now
                + chrono::Duration::from_std(duration)
                    .unwrap_or_else(|_| chrono::Duration::zero());
            if deadline <= state.now {
                return;
            }
            state.waiters.push(FakeWaiter { deadline, wake });
        }
        self.waiters_changed.notify_waiters();
        let _ = waked.await;
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FakeClock};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn advance_moves_now() {
        let clock = FakeClock::new();
        let before = clock.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clock.now() - before, chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn sleep_completes_once_advanced_past_deadline() {
        let clock = Arc::new(FakeClock::new());
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_secs(30)).await;
        });

        clock.block_until(1).await;
        clock.advance(Duration::from_secs(31));

        handle.await.expect("sleeper completes");
    }

    #[tokio::test]
    async fn sleep_is_not_woken_early() {
        let clock = Arc::new(FakeClock::new());
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_secs(30)).await;
        });

        clock.block_until(1).await;
        clock.advance(Duration::from_secs(10));

        assert!(!handle.is_finished());
        clock.advance(Duration::from_secs(25));
        handle.await.expect("sleeper completes");
    }
}
