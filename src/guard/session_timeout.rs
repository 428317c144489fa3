//! Inactivity-based session timeout with a warning countdown.
//!
//! The guard sleeps until the warning window opens, then ticks once per
//! second: `on_warning(seconds_remaining)` inside the window, `on_timeout()`
//! exactly once when the budget is gone. Remaining time is always recomputed
//! from the latest `last_activity_at` snapshot, never from a stale closure,
//! so rapid resets cannot accumulate duplicate timers.
//!
//! Backgrounding cancels the timers but keeps the activity stamp: platform
//! timers do not reliably fire while suspended, so elapsed time is measured
//! by wall clock on return to foreground. If the budget was exhausted while
//! away the timeout fires immediately; otherwise counting resumes from the
//! elapsed time rather than restarting.

use crate::guard::{clock::Clock, AppLifecycleState};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, Duration},
};
use tracing::debug;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;
pub type WarningCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionTimeoutConfig {
    pub timeout_ms: u64,
    /// Size of the warning window in seconds. Zero disables the warning
    /// phase entirely; a value larger than the timeout means the session
    /// starts inside the warning window.
    pub warning_threshold_secs: u64,
    pub enabled: bool,
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5 * 60 * 1_000,
            warning_threshold_secs: 30,
            enabled: true,
        }
    }
}

#[derive(Debug)]
struct TimeoutState {
    last_activity_at: u64,
    enabled: bool,
    is_warning: bool,
    seconds_remaining: Option<u64>,
    timed_out: bool,
    in_background: bool,
}

struct Inner {
    clock: Clock,
    config: SessionTimeoutConfig,
    state: Mutex<TimeoutState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    // Bumped on every cancel/reschedule; a task whose generation no longer
    // matches must not produce any externally visible effect.
    generation: AtomicU64,
    on_timeout: TimeoutCallback,
    on_warning: Option<WarningCallback>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

enum Tick {
    Timeout,
    Warn(u64),
    Idle,
    Stop,
}

pub struct SessionTimeoutGuard {
    inner: Arc<Inner>,
}

impl SessionTimeoutGuard {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: SessionTimeoutConfig,
        on_timeout: TimeoutCallback,
        on_warning: Option<WarningCallback>,
    ) -> Self {
        let enabled = config.enabled;
        let guard = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TimeoutState {
                    last_activity_at: clock.now_ms(),
                    enabled,
                    is_warning: false,
                    seconds_remaining: None,
                    timed_out: false,
                    in_background: false,
                }),
                clock,
                config,
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                on_timeout,
                on_warning,
            }),
        };

        if enabled {
            guard.reset_timer();
        }

        guard
    }

    /// Record user activity: restart the inactivity budget from now.
    pub fn reset_timer(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.enabled {
                return;
            }
            state.last_activity_at = self.inner.clock.now_ms();
            state.is_warning = false;
            state.seconds_remaining = None;
            state.timed_out = false;
        }
        self.schedule(self.inner.config.timeout_ms);
    }

    /// Toggling off clears all timers and visible state without firing;
    /// toggling on starts a fresh budget from now.
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            if !enabled {
                state.is_warning = false;
                state.seconds_remaining = None;
                state.in_background = false;
            }
        }

        if enabled {
            self.reset_timer();
        } else {
            self.cancel_timer();
        }
    }

    pub fn on_app_state_change(&self, next: AppLifecycleState) {
        match next {
            AppLifecycleState::Background => {
                {
                    let mut state = self.inner.state.lock();
                    if !state.enabled {
                        return;
                    }
                    state.in_background = true;
                    state.is_warning = false;
                    state.seconds_remaining = None;
                }
                debug!("Backgrounded, timers cancelled, activity stamp kept");
                self.cancel_timer();
            }
            AppLifecycleState::Active => {
                enum Resume {
                    Fire,
                    Reschedule(u64),
                }

                let resume = {
                    let mut state = self.inner.state.lock();
                    if !state.enabled || !state.in_background {
                        return;
                    }
                    state.in_background = false;

                    let elapsed = self
                        .inner
                        .clock
                        .now_ms()
                        .saturating_sub(state.last_activity_at);
                    if elapsed >= self.inner.config.timeout_ms {
                        if state.timed_out {
                            return;
                        }
                        state.timed_out = true;
                        Resume::Fire
                    } else {
                        Resume::Reschedule(self.inner.config.timeout_ms - elapsed)
                    }
                };

                match resume {
                    Resume::Fire => {
                        debug!("Inactivity budget exhausted while backgrounded");
                        (self.inner.on_timeout)();
                    }
                    Resume::Reschedule(remaining) => self.schedule(remaining),
                }
            }
            AppLifecycleState::Inactive => {}
        }
    }

    #[must_use]
    pub fn seconds_remaining(&self) -> Option<u64> {
        self.inner.state.lock().seconds_remaining
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.inner.state.lock().is_warning
    }

    #[must_use]
    pub fn expired_message(&self) -> &'static str {
        SESSION_EXPIRED_MESSAGE
    }

    /// Abort the scheduled check; no callback fires after this returns.
    pub fn dispose(&self) {
        self.cancel_timer();
    }

    /// One deferred check for the start of the warning window, then a
    /// 1-second tick. `budget_ms` is the remaining inactivity budget; the
    /// tick itself recomputes from `last_activity_at` every round.
    fn schedule(&self, budget_ms: u64) {
        self.cancel_timer();

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let warning_ms = self.inner.config.warning_threshold_secs.saturating_mul(1_000);
        let delay = budget_ms.saturating_sub(warning_ms);
        // Weak handle: a dropped guard reaps its task.
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(delay)).await;

            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };

                let outcome = {
                    let mut state = inner.state.lock();
                    if inner.generation.load(Ordering::SeqCst) != generation
                        || !state.enabled
                        || state.in_background
                    {
                        Tick::Stop
                    } else {
                        let now = inner.clock.now_ms();
                        let remaining = inner
                            .config
                            .timeout_ms
                            .saturating_sub(now.saturating_sub(state.last_activity_at));

                        if remaining == 0 {
                            if state.timed_out {
                                Tick::Stop
                            } else {
                                state.timed_out = true;
                                state.is_warning = false;
                                state.seconds_remaining = None;
                                Tick::Timeout
                            }
                        } else if warning_ms > 0 && remaining <= warning_ms {
                            let secs = remaining.div_ceil(1_000);
                            state.is_warning = true;
                            state.seconds_remaining = Some(secs);
                            Tick::Warn(secs)
                        } else {
                            Tick::Idle
                        }
                    }
                };

                match outcome {
                    Tick::Timeout => {
                        (inner.on_timeout)();
                        return;
                    }
                    Tick::Warn(secs) => {
                        if let Some(on_warning) = &inner.on_warning {
                            on_warning(secs);
                        }
                    }
                    Tick::Idle => {}
                    Tick::Stop => return,
                }

                drop(inner);
                sleep(Duration::from_secs(1)).await;
            }
        });

        if let Some(previous) = self.inner.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
        }
    }
}
