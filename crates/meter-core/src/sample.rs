use serde::{Deserialize, Serialize};

/// One timestamped measurement produced by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic microseconds from the acquisition time base.
    pub timestamp_us: u64,
    pub value: f64,
}

impl Sample {
    pub const fn new(timestamp_us: u64, value: f64) -> Self {
        Self {
            timestamp_us,
            value,
        }
    }
}
