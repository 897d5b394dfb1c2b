use crate::acquisition::LoopStats;
use crate::error::DeviceError;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Acquisition loop lifecycle. Transitions only go forward:
/// `Running -> StopRequested -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Running,
    StopRequested,
    Closed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of shutdown, delivered once with the closed notification.
#[derive(Debug)]
pub struct CloseReport {
    pub stats: LoopStats,
    pub close_error: Option<DeviceError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.close_error.is_none()
    }
}

#[derive(Debug, Default)]
struct Control {
    state: Mutex<LoopState>,
    changed: Condvar,
}

/// Cloneable handle for requesting a cooperative stop and observing the loop state.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<Control>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a stop. Returns `true` only for the call that moved the loop out of
    /// `Running`; later calls are no-ops.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        if *state != LoopState::Running {
            return false;
        }
        *state = LoopState::StopRequested;
        self.inner.changed.notify_all();
        true
    }

    pub fn state(&self) -> LoopState {
        *self.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LoopState::Closed
    }

    /// Block until the loop reaches `Closed` or `timeout` passes. Returns whether it closed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |s| *s != LoopState::Closed)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == LoopState::Closed
    }

    /// Sleep between cycles, waking early if a stop arrives.
    pub(crate) fn pause(&self, interval: Duration) {
        let guard = self.lock();
        let _ = self
            .inner
            .changed
            .wait_timeout_while(guard, interval, |s| *s == LoopState::Running)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// `StopRequested -> Closed`. Returns false when the loop was not stopping.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.lock();
        if *state != LoopState::StopRequested {
            return false;
        }
        *state = LoopState::Closed;
        self.inner.changed.notify_all();
        true
    }
}

/// A loop running on its own thread.
pub struct AcquisitionHandle {
    stop: StopHandle,
    thread: JoinHandle<CloseReport>,
}

impl AcquisitionHandle {
    pub(crate) fn new(stop: StopHandle, thread: JoinHandle<CloseReport>) -> Self {
        Self { stop, thread }
    }

    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> LoopState {
        self.stop.state()
    }

    /// Wait for the loop thread to finish. `Err` carries the panic payload.
    pub fn join(self) -> std::thread::Result<CloseReport> {
        self.thread.join()
    }

    /// Request a stop and wait for the loop to close the device.
    pub fn shutdown(self) -> std::thread::Result<CloseReport> {
        self.stop.stop();
        self.join()
    }

    /// Like [`shutdown`](Self::shutdown), but gives up after `timeout` if the device
    /// never closes, handing the still-running loop back.
    pub fn shutdown_timeout(
        self,
        timeout: Duration,
    ) -> Result<std::thread::Result<CloseReport>, Self> {
        self.stop.stop();
        if self.stop.wait_closed(timeout) {
            Ok(self.join())
        } else {
            Err(self)
        }
    }
}
