use chrono::Timelike;
use std::time::{Duration, Instant};
use tracing::info;

use crate::calendar::Clock;
use crate::config::ParserConfig;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// `hour` inside `[from, to)`; wraps past midnight when `from > to`.
pub fn in_activity_hours(hour: u32, [from, to]: [u32; 2]) -> bool {
    if from <= to {
        (from..to).contains(&hour)
    } else {
        hour >= from || hour < to
    }
}

/// Delay before the next poll cycle.
pub fn poll_delay(config: &ParserConfig, clock: &dyn Clock, failed: bool) -> Duration {
    let intervals = &config.update_interval;
    let secs = if failed {
        intervals.error
    } else if in_activity_hours(clock.now().hour(), config.activity) {
        intervals.activity
    } else {
        intervals.default
    };
    Duration::from_secs(secs)
}
