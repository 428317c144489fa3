use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Wall clock in epoch milliseconds, advanced by the tokio clock.
///
/// Anchored once against `SystemTime` at construction, then advanced by
/// `tokio::time::Instant`. In production the two stay in lockstep; under
/// `start_paused` tests `tokio::time::advance` drives it, so lockout windows
/// and inactivity budgets can be tested against virtual time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch_ms: u64,
    anchor: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);

        Self {
            epoch_ms,
            anchor: Instant::now(),
        }
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.epoch_ms + self.anchor.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
