//! Prometheus metrics for fastmeter acquisition.
//!
//! Counters and gauges are process-wide; [`MetricsSink`] feeds them from the
//! acquisition loop and [`serve_metrics`] exposes them over HTTP.

use meter_core::{CloseReport, FrameEvent, FrameSink};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};
use tracing::{error, info, warn};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Acquisition Loop Metrics
// ============================================================================

/// Total acquisition cycles completed
pub static FRAMES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter =
        IntCounter::new("fastmeter_frames_total", "Acquisition cycles completed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Samples appended to the history
pub static SAMPLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fastmeter_samples_total",
        "Samples acquired and appended to the history",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Cycles where the device had nothing ready
pub static EMPTY_READS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fastmeter_empty_reads_total",
        "Cycles where the device returned no sample",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Failed device reads
pub static READ_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter =
        IntCounter::new("fastmeter_read_errors_total", "Device reads that failed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Observed cycle time distribution in seconds
pub static CYCLE_ELAPSED_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fastmeter_cycle_elapsed_seconds",
            "Wall-clock time per acquisition cycle including device read",
        )
        .buckets(vec![
            0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

// ============================================================================
// Measurement State Metrics
// ============================================================================

/// Samples currently held in the history window
pub static HISTORY_LEN: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge =
        Gauge::new("fastmeter_history_len", "Samples held in the history window").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Most recent measurement value
pub static LATEST_VALUE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new("fastmeter_latest_value", "Most recent measurement value").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Current run of consecutive read failures
pub static CONSECUTIVE_READ_ERRORS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "fastmeter_consecutive_read_errors",
        "Current run of consecutive device read failures",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Loop closed (1 = closed, 0 = running)
pub static LOOP_CLOSED: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "fastmeter_loop_closed",
        "Acquisition loop closed (1=closed, 0=running)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Remote meter connection status (1 = connected, 0 = disconnected)
pub static REMOTE_CONNECTED: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "fastmeter_remote_connected",
        "Remote meter connection status (1=connected, 0=disconnected)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Updates the global metrics once per frame.
#[derive(Debug, Default)]
pub struct MetricsSink;

impl FrameSink for MetricsSink {
    fn on_frame(&mut self, frame: &FrameEvent<'_>) {
        FRAMES_TOTAL.inc();
        CYCLE_ELAPSED_SECONDS.observe(frame.elapsed_secs());
        HISTORY_LEN.set(frame.history.len() as f64);
        CONSECUTIVE_READ_ERRORS.set(f64::from(frame.consecutive_errors));
        if let Some(sample) = frame.sample {
            SAMPLES_TOTAL.inc();
            LATEST_VALUE.set(sample.value);
        } else if frame.read_error.is_some() {
            READ_ERRORS_TOTAL.inc();
        } else {
            EMPTY_READS_TOTAL.inc();
        }
    }

    fn on_closed(&mut self, _report: &CloseReport) {
        LOOP_CLOSED.set(1.0);
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to start metrics server");
                return;
            }
        };

        info!(addr = %bind_addr, "Metrics server listening");

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => match encode_metrics() {
                    Ok(buffer) => Response::from_data(buffer).with_header(
                        tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        )
                        .unwrap(),
                    ),
                    Err(e) => {
                        warn!(error = %e, "Failed to encode metrics");
                        Response::from_string("Internal Server Error").with_status_code(500)
                    }
                },
                "/health" => Response::from_string("OK"),
                // Ready once the loop has completed a cycle and has not closed
                "/ready" if FRAMES_TOTAL.get() > 0 && LOOP_CLOSED.get() == 0.0 => {
                    Response::from_string("Ready")
                }
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

/// Render the registry in the Prometheus text format.
pub fn encode_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    // Touch each metric to force initialization
    let _ = FRAMES_TOTAL.get();
    let _ = SAMPLES_TOTAL.get();
    let _ = EMPTY_READS_TOTAL.get();
    let _ = READ_ERRORS_TOTAL.get();
    let _ = CYCLE_ELAPSED_SECONDS.get_sample_count();
    let _ = HISTORY_LEN.get();
    let _ = LATEST_VALUE.get();
    let _ = CONSECUTIVE_READ_ERRORS.get();
    let _ = LOOP_CLOSED.get();
    let _ = REMOTE_CONNECTED.get();
}
