use crate::device::Device;
use crate::error::{ConfigError, DeviceError};
use crate::history::HistoryBuffer;
use crate::lifecycle::{AcquisitionHandle, CloseReport, LoopState, StopHandle};
use crate::sink::{FrameEvent, FrameSink};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 3000;
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    /// History window size.
    pub capacity: usize,
    /// Delay between cycles; zero runs cycles back-to-back.
    pub interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            interval: Duration::ZERO,
        }
    }
}

impl LoopConfig {
    /// Build from a signed millisecond interval as given on a command line.
    pub fn from_millis(capacity: usize, interval_ms: i64) -> Result<Self, ConfigError> {
        let interval_ms = u64::try_from(interval_ms)
            .map_err(|_| ConfigError::NegativeInterval(interval_ms))?;
        let config = Self {
            capacity,
            interval: Duration::from_millis(interval_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.interval > MAX_INTERVAL {
            return Err(ConfigError::IntervalTooLong {
                interval: self.interval,
                max: MAX_INTERVAL,
            });
        }
        Ok(())
    }
}

/// Timing of the most recent cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleStats {
    pub frame_count: u64,
    pub cycle_start: Instant,
    pub cycle_end: Instant,
    pub elapsed: Duration,
}

impl CycleStats {
    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            cycle_start: now,
            cycle_end: now,
            elapsed: Duration::ZERO,
        }
    }
}

fn saturating_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Totals over the loop's lifetime.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames: u64,
    pub samples_acquired: u64,
    pub empty_reads: u64,
    pub read_errors: u64,
    pub max_consecutive_errors: u32,
    pub min_elapsed_us: u64,
    pub max_elapsed_us: u64,
    pub last_elapsed_us: u64,
}

impl LoopStats {
    fn record_elapsed(&mut self, elapsed: Duration) {
        let us = saturating_micros(elapsed);
        self.min_elapsed_us = if self.frames == 1 {
            us
        } else {
            self.min_elapsed_us.min(us)
        };
        self.max_elapsed_us = self.max_elapsed_us.max(us);
        self.last_elapsed_us = us;
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// A full cycle ran and its frame was published.
    Completed(CycleStats),
    /// A stop was pending: the device is closed and the closed notification went out.
    Closed(CloseReport),
    /// The loop had already closed; nothing happened.
    Terminated,
}

/// Polls a device, keeps a sliding history of its samples and publishes one frame per cycle.
pub struct AcquisitionLoop<D: Device, S: FrameSink> {
    device: D,
    sink: S,
    history: HistoryBuffer,
    config: LoopConfig,
    control: StopHandle,
    timing: CycleStats,
    stats: LoopStats,
    consecutive_errors: u32,
    /// This loop has closed its own device; the shared handle may be reused elsewhere.
    closed: bool,
}

impl<D: Device, S: FrameSink> AcquisitionLoop<D, S> {
    pub fn new(device: D, sink: S, config: LoopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let history = HistoryBuffer::new(config.capacity)?;
        Ok(Self {
            device,
            sink,
            history,
            config,
            control: StopHandle::new(),
            timing: CycleStats::new(Instant::now()),
            stats: LoopStats::default(),
            consecutive_errors: 0,
            closed: false,
        })
    }

    /// Use a handle created by the owner, so sinks built before the loop can request a stop.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.control = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.control.clone()
    }

    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn frame_count(&self) -> u64 {
        self.timing.frame_count
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Run one cycle: stop check, read, integrate, account timing, publish.
    pub fn cycle(&mut self) -> CycleOutcome {
        if self.closed {
            return CycleOutcome::Terminated;
        }
        // A handle already closed by another loop still means this device must be closed.
        if self.control.state() != LoopState::Running {
            return CycleOutcome::Closed(self.shutdown());
        }

        let (sample, read_error) = match self.device.read() {
            Ok(Some(sample)) => {
                self.history.append(sample);
                self.stats.samples_acquired += 1;
                self.consecutive_errors = 0;
                (Some(sample), None)
            }
            Ok(None) => {
                self.stats.empty_reads += 1;
                self.consecutive_errors = 0;
                (None, None)
            }
            Err(err) => {
                self.stats.read_errors += 1;
                self.consecutive_errors += 1;
                self.stats.max_consecutive_errors =
                    self.stats.max_consecutive_errors.max(self.consecutive_errors);
                warn!(
                    frame = self.timing.frame_count + 1,
                    consecutive = self.consecutive_errors,
                    error = %err,
                    "Device read failed"
                );
                (None, Some(err))
            }
        };

        self.timing.frame_count += 1;
        self.timing.cycle_end = Instant::now();
        self.timing.elapsed = self
            .timing
            .cycle_end
            .saturating_duration_since(self.timing.cycle_start);
        self.stats.frames = self.timing.frame_count;
        self.stats.record_elapsed(self.timing.elapsed);

        self.sink.on_frame(&FrameEvent {
            frame_count: self.timing.frame_count,
            elapsed: self.timing.elapsed,
            history: &self.history,
            sample,
            read_error: read_error.as_ref(),
            consecutive_errors: self.consecutive_errors,
        });

        // Taken after publishing so the next elapsed includes the device read.
        self.timing.cycle_start = Instant::now();
        CycleOutcome::Completed(self.timing)
    }

    /// Cycle until a stop request is honoured, waiting `interval` between cycles.
    pub fn run(mut self) -> CloseReport {
        info!(
            device = self.device.name(),
            capacity = self.config.capacity,
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            "Acquisition loop started"
        );
        loop {
            match self.cycle() {
                CycleOutcome::Completed(_) => {
                    if !self.config.interval.is_zero() {
                        self.control.pause(self.config.interval);
                    }
                }
                CycleOutcome::Closed(report) => return report,
                CycleOutcome::Terminated => {
                    return CloseReport {
                        stats: self.stats.clone(),
                        close_error: None,
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) -> CloseReport {
        debug!(frames = self.timing.frame_count, "Stop observed, closing device");
        self.closed = true;
        let close_error = self.device.close().err();
        if let Some(err) = &close_error {
            warn!(device = self.device.name(), error = %err, "Device close failed");
        }
        self.control.mark_closed();

        let report = CloseReport {
            stats: self.stats.clone(),
            close_error,
        };
        info!(
            frames = report.stats.frames,
            samples = report.stats.samples_acquired,
            read_errors = report.stats.read_errors,
            clean = report.is_clean(),
            "Acquisition loop closed"
        );
        self.sink.on_closed(&report);
        report
    }
}

impl<D, S> AcquisitionLoop<D, S>
where
    D: Device + 'static,
    S: FrameSink + Send + 'static,
{
    /// Move the loop onto a dedicated `acquisition` thread.
    pub fn spawn(self) -> std::io::Result<AcquisitionHandle> {
        let stop = self.stop_handle();
        let thread = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || self.run())?;
        Ok(AcquisitionHandle::new(stop, thread))
    }
}
