//! Login attempt rate limiting with progressive lockout.
//!
//! Failed attempts accumulate until [`RateLimitConfig::max_attempts`], then a
//! lockout window opens. Every lockout is longer than the previous one
//! (exponential, capped), keyed by how many times the user has *ever* been
//! locked out. Natural expiry clears the attempt counter but keeps the
//! lockout count, so friction keeps escalating across repeated abuse; only a
//! successful login resets everything.
//!
//! The full state is persisted after every mutation and reloaded on startup,
//! so a lockout survives process restarts. Storage errors never reach the
//! caller: they degrade to a clean in-memory state for the session.

use crate::{
    guard::clock::Clock,
    store::{KeyValueStore, LOGIN_RATE_LIMIT_KEY},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{sleep, Duration},
};
use tracing::{debug, warn};

pub const MAX_LOGIN_ATTEMPTS: u32 = 5;
pub const INITIAL_LOCKOUT_MS: u64 = 30_000;
pub const LOCKOUT_MULTIPLIER: u32 = 2;
pub const MAX_LOCKOUT_MS: u64 = 15 * 60 * 1_000;
pub const ATTEMPT_RESET_WINDOW_MS: u64 = 15 * 60 * 1_000;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub initial_lockout_ms: u64,
    pub lockout_multiplier: u32,
    pub max_lockout_ms: u64,
    /// Idle gap after which a stale failure streak is forgiven on load.
    pub attempt_reset_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_LOGIN_ATTEMPTS,
            initial_lockout_ms: INITIAL_LOCKOUT_MS,
            lockout_multiplier: LOCKOUT_MULTIPLIER,
            max_lockout_ms: MAX_LOCKOUT_MS,
            attempt_reset_window_ms: ATTEMPT_RESET_WINDOW_MS,
        }
    }
}

/// Persisted under [`LOGIN_RATE_LIMIT_KEY`]. Timestamps are epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub attempts: u32,
    pub lockout_until: Option<u64>,
    pub lockout_count: u32,
    pub last_attempt_at: Option<u64>,
}

struct Inner {
    config: RateLimitConfig,
    clock: Clock,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<RateLimitState>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Load persisted state and start the countdown if a lockout is live.
    ///
    /// A record whose last attempt is older than the reset window is
    /// discarded: a stale failure streak should not count against a
    /// returning legitimate user. Read or decode failures degrade to the
    /// zero state for this session.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Clock,
        config: RateLimitConfig,
    ) -> Self {
        let mut state = match store.get(LOGIN_RATE_LIMIT_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<RateLimitState>(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!("Discarding undecodable rate limit record: {err}");
                    RateLimitState::default()
                }
            },
            Ok(None) => RateLimitState::default(),
            Err(err) => {
                warn!("Could not read rate limit record: {err:#}");
                RateLimitState::default()
            }
        };

        let now = clock.now_ms();
        let stale = state
            .last_attempt_at
            .is_some_and(|at| now.saturating_sub(at) > config.attempt_reset_window_ms);
        if stale {
            debug!("Rate limit record is stale, starting clean");
            state = RateLimitState::default();
            if let Err(err) = store.delete(LOGIN_RATE_LIMIT_KEY).await {
                warn!("Could not delete stale rate limit record: {err:#}");
            }
        } else {
            // A lockout that ended while the process was down decays on load.
            expire_if_due(&mut state, now);
        }

        let limiter = Self {
            inner: Arc::new(Inner {
                config,
                clock,
                store,
                state: Mutex::new(state),
                ticker: Mutex::new(None),
            }),
        };

        if limiter.is_locked() {
            limiter.start_countdown();
        }

        limiter
    }

    /// Record one failed login attempt and persist the updated state.
    ///
    /// Crossing the attempt threshold opens the lockout window and bumps the
    /// lockout count. Persistence failures are swallowed; the in-memory
    /// state stays authoritative for this session.
    pub async fn record_failed_attempt(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now_ms();
            expire_if_due(&mut state, now);

            state.attempts += 1;
            state.last_attempt_at = Some(now);

            if state.attempts >= self.inner.config.max_attempts && state.lockout_until.is_none() {
                let duration = lockout_duration_ms(&self.inner.config, state.lockout_count);
                state.lockout_until = Some(now + duration);
                state.lockout_count += 1;
                debug!(
                    "Lockout #{} opened for {} ms after {} failed attempts",
                    state.lockout_count, duration, state.attempts
                );
            }

            state.clone()
        };

        if snapshot.lockout_until.is_some() {
            self.start_countdown();
        }

        persist(self.inner.store.as_ref(), &snapshot).await;
    }

    /// Clear everything after a successful login, including the persisted
    /// record. This is the only path that resets the lockout count.
    pub async fn reset_on_success(&self) {
        *self.inner.state.lock() = RateLimitState::default();
        self.stop_countdown();

        if let Err(err) = self.inner.store.delete(LOGIN_RATE_LIMIT_KEY).await {
            warn!("Could not delete rate limit record: {err:#}");
        }
    }

    #[must_use]
    pub fn can_attempt_login(&self) -> bool {
        !self.is_locked()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        let mut state = self.inner.state.lock();
        expire_if_due(&mut state, self.inner.clock.now_ms());
        state.lockout_until.is_some()
    }

    /// Whole seconds left in the lockout, rounded up; `None` when unlocked.
    #[must_use]
    pub fn lockout_seconds_remaining(&self) -> Option<u64> {
        let mut state = self.inner.state.lock();
        let now = self.inner.clock.now_ms();
        expire_if_due(&mut state, now);
        state
            .lockout_until
            .map(|until| until.saturating_sub(now).div_ceil(1_000))
    }

    #[must_use]
    pub fn current_attempts(&self) -> u32 {
        let mut state = self.inner.state.lock();
        expire_if_due(&mut state, self.inner.clock.now_ms());
        state.attempts
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.inner.config.max_attempts
    }

    /// Pre-sanitized user-facing lockout text; `None` when unlocked.
    #[must_use]
    pub fn lockout_message(&self) -> Option<String> {
        self.lockout_seconds_remaining().map(|secs| {
            if secs >= 60 {
                format!(
                    "Too many failed attempts. Try again in {} min {} s.",
                    secs / 60,
                    secs % 60
                )
            } else {
                format!("Too many failed attempts. Try again in {secs} s.")
            }
        })
    }

    /// Snapshot of the current in-memory state (after lazy expiry).
    #[must_use]
    pub fn state(&self) -> RateLimitState {
        let mut state = self.inner.state.lock();
        expire_if_due(&mut state, self.inner.clock.now_ms());
        state.clone()
    }

    pub fn dispose(&self) {
        self.stop_countdown();
    }

    /// 1-second tick while locked; flips the state to expired at the exact
    /// moment the window closes and persists the decayed record.
    fn start_countdown(&self) {
        let mut ticker = self.inner.ticker.lock();
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        // The task holds a weak handle so a dropped limiter reaps its ticker.
        let weak = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(1)).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };

                let decayed = {
                    let mut state = inner.state.lock();
                    if state.lockout_until.is_none() {
                        None
                    } else if expire_if_due(&mut state, inner.clock.now_ms()) {
                        Some(state.clone())
                    } else {
                        continue;
                    }
                };

                if let Some(snapshot) = decayed {
                    debug!("Lockout expired, attempts reset");
                    persist(inner.store.as_ref(), &snapshot).await;
                }
                return;
            }
        }));
    }

    fn stop_countdown(&self) {
        if let Some(handle) = self.inner.ticker.lock().take() {
            handle.abort();
        }
    }
}

/// `min(initial × multiplier^count, max)`, saturating on overflow.
fn lockout_duration_ms(config: &RateLimitConfig, lockout_count: u32) -> u64 {
    u64::from(config.lockout_multiplier)
        .checked_pow(lockout_count)
        .and_then(|factor| config.initial_lockout_ms.checked_mul(factor))
        .unwrap_or(config.max_lockout_ms)
        .min(config.max_lockout_ms)
}

/// Natural expiry: attempts decay to zero, the lockout count does not.
fn expire_if_due(state: &mut RateLimitState, now: u64) -> bool {
    if state.lockout_until.is_some_and(|until| until <= now) {
        state.attempts = 0;
        state.lockout_until = None;
        true
    } else {
        false
    }
}

async fn persist(store: &dyn KeyValueStore, state: &RateLimitState) {
    match serde_json::to_string(state) {
        Ok(raw) => {
            if let Err(err) = store.put(LOGIN_RATE_LIMIT_KEY, &raw).await {
                warn!("Could not persist rate limit state: {err:#}");
            }
        }
        Err(err) => warn!("Could not encode rate limit state: {err}"),
    }
}
