use std::time::Duration;
use thiserror::Error;

/// Rejected loop configuration. The loop is never started when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("history capacity must be at least 1")]
    ZeroCapacity,
    #[error("update interval must not be negative (got {0} ms)")]
    NegativeInterval(i64),
    #[error("update interval {interval:?} exceeds the maximum of {max:?}")]
    IntervalTooLong { interval: Duration, max: Duration },
}

/// Failure reported by a [`Device`](crate::device::Device).
///
/// Read failures are per-cycle and non-fatal; close failures are reported to the
/// loop owner once the loop has reached its terminal state.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device fault: {0}")]
    Fault(String),
    #[error("malformed reading: {0}")]
    Malformed(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("device already closed")]
    AlreadyClosed,
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}
