use crate::infra::audit::{AuditEventType, AuditLogger};
use meter_core::{CloseReport, FrameEvent, FrameSink, StopHandle, TimeBase};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Logs progress every `every` frames, like a window title being refreshed.
pub struct ConsoleReporter {
    every: u64,
}

impl ConsoleReporter {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

impl FrameSink for ConsoleReporter {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        if self.every == 0 || frame.frame_count % self.every != 0 {
            return;
        }
        info!(
            frame_count = frame.frame_count,
            elapsed_us = u64::try_from(frame.elapsed.as_micros()).unwrap_or(u64::MAX),
            history_len = frame.history.len(),
            latest = ?frame.history.latest().map(|s| s.value),
            "Acquisition progress"
        );
    }

    fn on_closed(&mut self, report: &CloseReport) {
        debug!(frames = report.stats.frames, "Console reporter closed");
    }
}

/// Requests a stop once consecutive read failures reach `limit`.
pub struct ErrorEscalation {
    limit: u32,
    stop: StopHandle,
    audit: Option<Arc<AuditLogger>>,
    timebase: TimeBase,
    fired: bool,
}

impl ErrorEscalation {
    pub fn new(
        limit: u32,
        stop: StopHandle,
        audit: Option<Arc<AuditLogger>>,
        timebase: TimeBase,
    ) -> Self {
        Self {
            limit: limit.max(1),
            stop,
            audit,
            timebase,
            fired: false,
        }
    }
}

impl FrameSink for ErrorEscalation {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        if self.fired || frame.consecutive_errors < self.limit {
            return;
        }
        self.fired = true;
        let last_error = frame.read_error.map(|e| e.to_string());
        warn!(
            consecutive = frame.consecutive_errors,
            limit = self.limit,
            error = ?last_error,
            "Read error limit reached, stopping acquisition"
        );
        if let Some(logger) = &self.audit {
            if let Err(e) = logger.log_event(
                self.timebase.now_us(),
                self.timebase.unix_us(),
                AuditEventType::ReadErrorEscalation,
                serde_json::json!({
                    "frame_count": frame.frame_count,
                    "consecutive_errors": frame.consecutive_errors,
                    "last_error": last_error,
                }),
            ) {
                warn!(error = %e, "Failed to write audit entry");
            }
        }
        self.stop.stop();
    }
}

/// Fires the single closed notification to whoever awaits the session.
pub struct ClosedNotifier {
    tx: Option<oneshot::Sender<()>>,
}

impl ClosedNotifier {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }
}

impl FrameSink for ClosedNotifier {
    fn on_frame(&mut self, _frame: &FrameEvent<'_>) {}

    fn on_closed(&mut self, _report: &CloseReport) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}
