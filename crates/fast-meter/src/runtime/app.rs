use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::device::MeterDevice;
use crate::runtime::error::RuntimeError;
use crate::runtime::logging::init_tracing;
use crate::runtime::report::{ClosedNotifier, ConsoleReporter, ErrorEscalation};
use meter_core::{AcquisitionLoop, CloseReport, FrameExchange, SinkChain, StopHandle, TimeBase};
use meter_io::{init_metrics, serve_metrics, MetricsSink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const SUMMARY_EVERY: Duration = Duration::from_secs(1);
const CLOSE_WARN_AFTER: Duration = Duration::from_secs(5);

/// Why the session was asked to stop.
#[derive(Debug, Clone, Copy)]
enum StopReason {
    Signal,
    Timer,
    /// The loop closed on its own (error escalation).
    Loop,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Timer => "timer",
            Self::Loop => "loop",
        }
    }
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fast-meter: {e}");
            eprintln!("Try 'fast-meter --help' for more information.");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    run(config)
}

fn run(config: RuntimeConfig) -> ExitCode {
    let _log_guard = init_tracing(config.json_logs, config.log_file.as_deref());

    match run_session(&config) {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Session failed");
            ExitCode::FAILURE
        }
    }
}

fn run_session(config: &RuntimeConfig) -> Result<CloseReport, RuntimeError> {
    let loop_config = config.loop_config()?;

    init_metrics();
    if let Some(addr) = &config.metrics_addr {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone());
    }

    let timebase = TimeBase::new();
    let audit_logger = init_audit_logger(config.audit_path.as_ref())?;

    info!("{}", config.title());
    let device = MeterDevice::open(config, timebase)?;

    audit(
        audit_logger.as_deref(),
        &timebase,
        AuditEventType::SessionStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "device": config.device.label(),
            "capacity": loop_config.capacity,
            "interval_ms": u64::try_from(loop_config.interval.as_millis()).unwrap_or(u64::MAX),
            "metrics_enabled": config.metrics_addr.is_some(),
        }),
    );

    let stop = StopHandle::new();
    let exchange = FrameExchange::new();
    let (notifier, closed_rx) = ClosedNotifier::new();

    let mut sinks = SinkChain::new()
        .with(MetricsSink)
        .with(ConsoleReporter::new(config.report_every))
        .with(Arc::clone(&exchange));
    if let Some(limit) = config.max_read_errors {
        sinks.push(ErrorEscalation::new(
            limit,
            stop.clone(),
            audit_logger.clone(),
            timebase,
        ));
    }
    sinks.push(notifier);

    let handle = AcquisitionLoop::new(device, sinks, loop_config)?
        .with_stop_handle(stop.clone())
        .spawn()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let reason = runtime.block_on(supervise(
        closed_rx,
        config.run_duration(),
        Arc::clone(&exchange),
    ));

    if stop.stop() {
        info!(reason = reason.as_str(), "Stop requested");
        audit(
            audit_logger.as_deref(),
            &timebase,
            AuditEventType::StopRequested,
            serde_json::json!({ "reason": reason.as_str() }),
        );
    }

    let joined = match handle.shutdown_timeout(CLOSE_WARN_AFTER) {
        Ok(joined) => joined,
        Err(handle) => {
            warn!(
                waited_s = CLOSE_WARN_AFTER.as_secs(),
                "Device close is slow, still waiting"
            );
            handle.join()
        }
    };
    let report = joined.map_err(|_| RuntimeError::LoopPanicked)?;
    let latest = exchange.latest();

    if let Some(err) = &report.close_error {
        audit(
            audit_logger.as_deref(),
            &timebase,
            AuditEventType::DeviceCloseFailed,
            serde_json::json!({ "error": err.to_string() }),
        );
    }

    info!(
        frames = report.stats.frames,
        samples = report.stats.samples_acquired,
        empty_reads = report.stats.empty_reads,
        read_errors = report.stats.read_errors,
        min_elapsed_us = report.stats.min_elapsed_us,
        max_elapsed_us = report.stats.max_elapsed_us,
        history_len = latest.samples.len(),
        "Run complete"
    );
    audit(
        audit_logger.as_deref(),
        &timebase,
        AuditEventType::SessionClosed,
        serde_json::json!({
            "reason": reason.as_str(),
            "stats": report.stats,
            "clean": report.is_clean(),
        }),
    );

    Ok(report)
}

/// Wait until the loop closes by itself, a signal arrives or the run timer expires.
async fn supervise(
    mut closed_rx: oneshot::Receiver<()>,
    run_for: Option<Duration>,
    exchange: Arc<FrameExchange>,
) -> StopReason {
    let timer = async {
        match run_for {
            Some(duration) => {
                info!(seconds = duration.as_secs_f64(), "Running for limited duration");
                tokio::time::sleep(duration).await
            }
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timer);

    let signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(signal);

    let mut summary = tokio::time::interval(SUMMARY_EVERY);
    summary.tick().await;

    loop {
        tokio::select! {
            _ = &mut closed_rx => return StopReason::Loop,
            _ = &mut signal => return StopReason::Signal,
            _ = &mut timer => return StopReason::Timer,
            _ = summary.tick() => log_window(&exchange),
        }
    }
}

fn log_window(exchange: &FrameExchange) {
    exchange.with_latest(|frame| {
        let (min, max) = frame
            .samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.value), hi.max(s.value))
            });
        if frame.samples.is_empty() {
            debug!(frame_count = frame.frame_count, "Window empty");
        } else {
            debug!(
                frame_count = frame.frame_count,
                window = frame.samples.len(),
                min,
                max,
                last_error = ?frame.last_error,
                "Window"
            );
        }
    });
}

fn audit(
    logger: Option<&AuditLogger>,
    timebase: &TimeBase,
    event_type: AuditEventType,
    details: serde_json::Value,
) {
    if let Some(logger) = logger {
        if let Err(e) = logger.log_event(timebase.now_us(), timebase.unix_us(), event_type, details)
        {
            warn!(error = %e, ?event_type, "Failed to write audit entry");
        }
    }
}

fn init_audit_logger(
    audit_path: Option<&PathBuf>,
) -> Result<Option<Arc<AuditLogger>>, RuntimeError> {
    let Some(path) = audit_path else {
        return Ok(None);
    };
    let logger = AuditLogger::new(path)?;
    info!(path = %path.display(), "Audit logging enabled");
    Ok(Some(Arc::new(logger)))
}
