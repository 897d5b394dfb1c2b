use crate::sample::Sample;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Shared clock for sample timestamps. Copies share the same origin.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Wall-clock microseconds since Unix epoch (for audit records only).
    pub fn unix_us(&self) -> u64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(since_epoch.as_micros()).unwrap_or(u64::MAX)
    }

    /// Stamp a value with the current monotonic time.
    pub fn sample(&self, value: f64) -> Sample {
        Sample::new(self.now_us(), value)
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
