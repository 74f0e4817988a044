//! Injectable time source for the poll loop and credential reload

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// Time source used by every waiting point in the attestor.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    /// Suspends for `duration`. Dropping the future abandons the wait.
    async fn sleep(&self, duration: Duration);
}

/// Monotonic clock backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

struct Timer {
    deadline: Instant,
    wake: oneshot::Sender<()>,
}

struct ManualState {
    now: Instant,
    timers: Vec<Timer>,
}

/// Clock that only moves when told to.
///
/// Sleepers park until [`ManualClock::advance`] carries the clock past their
/// deadline. Tests use [`ManualClock::wait_for_sleepers`] to know when the
/// code under test has reached a waiting point.
pub struct ManualClock {
    state: Mutex<ManualState>,
    sleepers: watch::Sender<usize>,
}

impl ManualClock {
    pub fn new() -> Self {
        let (sleepers, _) = watch::channel(0);
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                timers: Vec::new(),
            }),
            sleepers,
        }
    }

    /// Moves the clock forward and wakes every sleeper whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.now += duration;
            let now = state.now;
            let (due, pending): (Vec<_>, Vec<_>) = state
                .timers
                .drain(..)
                .partition(|timer| timer.deadline <= now);
            state.timers = pending;
            self.publish(&mut state);
            due
        };
        for timer in due {
            let _ = timer.wake.send(());
        }
    }

    /// Number of live sleepers still waiting on the clock
    pub fn pending_sleepers(&self) -> usize {
        let mut state = self.state.lock();
        self.publish(&mut state)
    }

    /// Resolves once at least `count` sleepers are parked on the clock.
    pub async fn wait_for_sleepers(&self, count: usize) {
        let mut changes = self.sleepers.subscribe();
        while self.pending_sleepers() < count {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    fn publish(&self, state: &mut ManualState) -> usize {
        state.timers.retain(|timer| !timer.wake.is_closed());
        let count = state.timers.len();
        self.sleepers.send_if_modified(|published| {
            let changed = *published != count;
            *published = count;
            changed
        });
        count
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .finish()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let wake = {
            let mut state = self.state.lock();
            let (wake, woken) = oneshot::channel();
            let deadline = state.now + duration;
            state.timers.push(Timer { deadline, wake });
            self.publish(&mut state);
            woken
        };
        let _ = wake.await;
    }
}
