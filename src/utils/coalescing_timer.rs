//! Debounced job runner.
//!
//! A [`CoalescingTimer`] wraps one idempotent action. Any number of
//! `reschedule`/`schedule` calls inside a delay window collapse into a single
//! invocation, and a request that arrives while the action is running is
//! replayed once right after it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::trace;

/// Job body. Returning `true` asks for a follow-up run after the default delay.
pub type JobAction = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Pending,
    Running,
    PendingWhileRunning,
}

struct TimerInner {
    state: TimerState,
    /// Bumped on every arm, so stale sleepers know they were superseded
    generation: u64,
    /// Delay for the run requested while the action was executing
    follow_up: Duration,
}

#[derive(Clone)]
pub struct CoalescingTimer {
    name: &'static str,
    default_delay: Duration,
    action: JobAction,
    inner: Arc<Mutex<TimerInner>>,
}

impl fmt::Debug for CoalescingTimer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CoalescingTimer")
            .field("name", &self.name)
            .field("default_delay", &self.default_delay)
            .field("state", &self.state())
            .finish()
    }
}

impl CoalescingTimer {
    pub fn new<F>(
        name: &'static str,
        default_delay: Duration,
        action: F,
    ) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            default_delay,
            action: Arc::new(action),
            inner: Arc::new(Mutex::new(TimerInner {
                state: TimerState::Idle,
                generation: 0,
                follow_up: Duration::ZERO,
            })),
        }
    }

    pub fn state(&self) -> TimerState {
        self.inner.lock().state
    }

    /// Run the action after `delay`, replacing any deadline already pending.
    pub fn reschedule(
        &self,
        delay: Duration,
    ) {
        let mut inner = self.inner.lock();
        match inner.state {
            TimerState::Running => {
                inner.state = TimerState::PendingWhileRunning;
                inner.follow_up = delay;
            }
            TimerState::PendingWhileRunning => {
                inner.follow_up = inner.follow_up.min(delay);
            }
            TimerState::Idle | TimerState::Pending => {
                inner.state = TimerState::Pending;
                inner.generation += 1;
                let generation = inner.generation;
                drop(inner);
                self.arm(generation, delay);
            }
        }
    }

    /// Run the action after the default delay unless a run is already pending.
    pub fn schedule(&self) {
        let state = self.state();
        match state {
            TimerState::Idle => self.reschedule(self.default_delay),
            TimerState::Running => self.reschedule(self.default_delay),
            TimerState::Pending | TimerState::PendingWhileRunning => {}
        }
    }

    /// Drop a pending run. A running action is left to finish.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            TimerState::Pending => {
                inner.generation += 1;
                inner.state = TimerState::Idle;
            }
            TimerState::PendingWhileRunning => inner.state = TimerState::Running,
            TimerState::Idle | TimerState::Running => {}
        }
    }

    fn arm(
        &self,
        generation: u64,
        delay: Duration,
    ) {
        let timer = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            timer.fire(generation);
        });
    }

    fn fire(
        &self,
        generation: u64,
    ) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != TimerState::Pending {
                trace!(job = self.name, generation, "superseded timer fired, ignored");
                return;
            }
            inner.state = TimerState::Running;
        }

        trace!(job = self.name, generation, "running job");
        let again = (self.action)();

        let mut inner = self.inner.lock();
        let next = match inner.state {
            TimerState::PendingWhileRunning if again => Some(inner.follow_up.min(self.default_delay)),
            TimerState::PendingWhileRunning => Some(inner.follow_up),
            _ if again => Some(self.default_delay),
            _ => None,
        };
        match next {
            Some(delay) => {
                inner.state = TimerState::Pending;
                inner.generation += 1;
                let generation = inner.generation;
                drop(inner);
                self.arm(generation, delay);
            }
            None => inner.state = TimerState::Idle,
        }
    }
}
