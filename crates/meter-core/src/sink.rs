use crate::error::DeviceError;
use crate::history::HistoryBuffer;
use crate::lifecycle::CloseReport;
use crate::sample::Sample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Published once per completed cycle, after the history reflects that cycle.
#[derive(Debug)]
pub struct FrameEvent<'a> {
    pub frame_count: u64,
    /// Wall-clock time since the previous cycle's publish, read latency included.
    pub elapsed: Duration,
    pub history: &'a HistoryBuffer,
    /// Sample appended this cycle, if the device had one.
    pub sample: Option<Sample>,
    pub read_error: Option<&'a DeviceError>,
    pub consecutive_errors: u32,
}

impl FrameEvent<'_> {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// The device answered but had nothing ready.
    pub fn is_empty_read(&self) -> bool {
        self.sample.is_none() && self.read_error.is_none()
    }
}

/// Consumer of loop output. Runs on the acquisition thread, so it must not block.
pub trait FrameSink {
    fn on_frame(&mut self, frame: &FrameEvent<'_>);

    /// Called exactly once, after the device has been closed.
    fn on_closed(&mut self, _report: &CloseReport) {}
}

impl FrameSink for () {
    fn on_frame(&mut self, _frame: &FrameEvent<'_>) {}
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        (**self).on_frame(frame)
    }

    fn on_closed(&mut self, report: &CloseReport) {
        (**self).on_closed(report)
    }
}

/// Fans each notification out to several sinks in registration order.
#[derive(Default)]
pub struct SinkChain {
    sinks: Vec<Box<dyn FrameSink + Send>>,
}

impl SinkChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl FrameSink + Send + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn push(&mut self, sink: impl FrameSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl FrameSink for SinkChain {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        for sink in &mut self.sinks {
            sink.on_frame(frame);
        }
    }

    fn on_closed(&mut self, report: &CloseReport) {
        for sink in &mut self.sinks {
            sink.on_closed(report);
        }
    }
}

/// Latest published frame as seen by a reader on another thread.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    pub frame_count: u64,
    pub elapsed: Duration,
    pub samples: Vec<Sample>,
    pub last_error: Option<String>,
}

/// Hands frames from the acquisition thread to a renderer thread.
///
/// History contents and counters are written under one lock, so a reader never
/// sees a frame count without the matching samples.
#[derive(Debug, Default)]
pub struct FrameExchange {
    latest: Mutex<FrameSnapshot>,
    closed: AtomicBool,
}

impl FrameExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of the latest frame.
    pub fn latest(&self) -> FrameSnapshot {
        self.with_latest(FrameSnapshot::clone)
    }

    /// Borrow the latest frame without copying the samples.
    pub fn with_latest<R>(&self, f: impl FnOnce(&FrameSnapshot) -> R) -> R {
        let guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn frame_count(&self) -> u64 {
        self.with_latest(|frame| frame.frame_count)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl FrameSink for Arc<FrameExchange> {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        frame.history.copy_into(&mut latest.samples);
        latest.frame_count = frame.frame_count;
        latest.elapsed = frame.elapsed;
        latest.last_error = frame.read_error.map(ToString::to_string);
    }

    fn on_closed(&mut self, _report: &CloseReport) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::LoopStats;

    fn frame(history: &HistoryBuffer, frame_count: u64) -> FrameEvent<'_> {
        FrameEvent {
            frame_count,
            elapsed: Duration::from_millis(2),
            history,
            sample: history.latest().copied(),
            read_error: None,
            consecutive_errors: 0,
        }
    }

    #[test]
    fn exchange_tracks_latest_frame() {
        let mut history = HistoryBuffer::new(2).unwrap();
        let mut exchange = FrameExchange::new();
        let reader = Arc::clone(&exchange);

        history.append(Sample::new(1, 1.5));
        exchange.on_frame(&frame(&history, 1));
        history.append(Sample::new(2, 2.5));
        history.append(Sample::new(3, 3.5));
        exchange.on_frame(&frame(&history, 2));

        let latest = reader.latest();
        assert_eq!(latest.frame_count, 2);
        assert_eq!(latest.samples, vec![Sample::new(2, 2.5), Sample::new(3, 3.5)]);
        assert!(!reader.is_closed());

        exchange.on_closed(&CloseReport {
            stats: LoopStats::default(),
            close_error: None,
        });
        assert!(reader.is_closed());
    }

    #[test]
    fn exchange_records_read_errors() {
        let history = HistoryBuffer::new(2).unwrap();
        let mut exchange = FrameExchange::new();
        let err = DeviceError::Fault("overrange".into());
        let mut event = frame(&history, 1);
        event.read_error = Some(&err);

        exchange.on_frame(&event);
        assert_eq!(
            exchange.latest().last_error.as_deref(),
            Some("device fault: overrange")
        );
    }

    #[derive(Default)]
    struct Counting {
        frames: Arc<Mutex<Vec<(&'static str, u64)>>>,
        name: &'static str,
    }

    impl FrameSink for Counting {
        fn on_frame(&mut self, frame: &FrameEvent<'_>) {
            self.frames.lock().unwrap().push((self.name, frame.frame_count));
        }
    }

    #[test]
    fn chain_preserves_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = SinkChain::new()
            .with(Counting {
                frames: Arc::clone(&log),
                name: "first",
            })
            .with(Counting {
                frames: Arc::clone(&log),
                name: "second",
            });
        assert_eq!(chain.len(), 2);

        let history = HistoryBuffer::new(1).unwrap();
        chain.on_frame(&frame(&history, 7));
        assert_eq!(*log.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn empty_read_detection() {
        let history = HistoryBuffer::new(1).unwrap();
        let event = frame(&history, 1);
        assert!(event.is_empty_read());
        assert!((event.elapsed_secs() - 0.002).abs() < 1e-9);
    }
}
