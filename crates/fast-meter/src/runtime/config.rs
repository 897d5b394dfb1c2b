use crate::runtime::error::RuntimeError;
use meter_core::acquisition::DEFAULT_CAPACITY;
use meter_core::{LoopConfig, SimulatedMeterConfig};
use meter_io::TcpMeterConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How long `--testing` runs before stopping itself.
const TESTING_RUN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Simulated,
    Tcp(String),
}

impl DeviceSpec {
    pub fn label(&self) -> String {
        match self {
            Self::Simulated => "SimulatedMeter".to_string(),
            Self::Tcp(addr) => format!("TcpMeter({addr})"),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sim" | "simulated" => Ok(Self::Simulated),
            other => other
                .strip_prefix("tcp://")
                .or_else(|| other.strip_prefix("tcp:"))
                .filter(|addr| !addr.is_empty())
                .map(|addr| Self::Tcp(addr.to_string()))
                .ok_or_else(|| RuntimeError::InvalidArgument {
                    flag: "--device",
                    value: s.to_string(),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub device: DeviceSpec,
    pub size: usize,
    pub update_ms: i64,
    pub run_seconds: Option<u64>,
    pub testing: bool,
    pub sim_latency_us: u64,
    pub sim_ready_every: u32,
    pub sim_fault_every: Option<u32>,
    pub read_timeout_ms: u64,
    pub max_read_errors: Option<u32>,
    pub report_every: u64,
    pub json_logs: bool,
    pub log_file: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            device: DeviceSpec::Simulated,
            size: DEFAULT_CAPACITY,
            update_ms: 0,
            run_seconds: None,
            testing: false,
            sim_latency_us: 0,
            sim_ready_every: 1,
            sim_fault_every: None,
            read_timeout_ms: 50,
            max_read_errors: None,
            report_every: 100_000,
            json_logs: false,
            log_file: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

fn parse_value<T: FromStr>(flag: &'static str, value: Option<&String>) -> Result<T, RuntimeError> {
    let value = value.ok_or(RuntimeError::MissingValue(flag))?;
    value.parse().map_err(|_| RuntimeError::InvalidArgument {
        flag,
        value: value.clone(),
    })
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, RuntimeError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, RuntimeError> {
        let mut cfg = RuntimeConfig::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-d" | "--device" => cfg.device = parse_value("--device", iter.next())?,
                "-s" | "--size" => cfg.size = parse_value("--size", iter.next())?,
                "-u" | "--update" => cfg.update_ms = parse_value("--update", iter.next())?,
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse_value("--run-seconds", iter.next())?);
                }
                "-t" | "--testing" => cfg.testing = true,
                "--sim-latency-us" => {
                    cfg.sim_latency_us = parse_value("--sim-latency-us", iter.next())?;
                }
                "--sim-ready-every" => {
                    cfg.sim_ready_every = parse_value("--sim-ready-every", iter.next())?;
                }
                "--sim-fault-every" => {
                    cfg.sim_fault_every = Some(parse_value("--sim-fault-every", iter.next())?);
                }
                "--read-timeout-ms" => {
                    cfg.read_timeout_ms = parse_value("--read-timeout-ms", iter.next())?;
                }
                "--max-read-errors" => {
                    cfg.max_read_errors = Some(parse_value("--max-read-errors", iter.next())?);
                }
                "--report-every" => {
                    cfg.report_every = parse_value("--report-every", iter.next())?;
                }
                "--json-logs" => cfg.json_logs = true,
                "--log-file" => {
                    cfg.log_file = Some(parse_value("--log-file", iter.next())?);
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(parse_value("--metrics-addr", iter.next())?);
                }
                "--audit-log" => {
                    cfg.audit_path = Some(parse_value("--audit-log", iter.next())?);
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(RuntimeError::UnknownArgument(other.to_string())),
            }
        }
        Ok(cfg)
    }

    pub fn loop_config(&self) -> Result<LoopConfig, RuntimeError> {
        Ok(LoopConfig::from_millis(self.size, self.update_ms)?)
    }

    /// Explicit `--run-seconds` wins over the `--testing` default.
    pub fn run_duration(&self) -> Option<Duration> {
        match (self.run_seconds, self.testing) {
            (Some(secs), _) => Some(Duration::from_secs(secs)),
            (None, true) => Some(TESTING_RUN),
            (None, false) => None,
        }
    }

    pub fn simulation(&self) -> SimulatedMeterConfig {
        SimulatedMeterConfig {
            latency: Duration::from_micros(self.sim_latency_us),
            ready_every: self.sim_ready_every.max(1),
            fault_every: self.sim_fault_every,
            ..Default::default()
        }
    }

    pub fn remote(&self, addr: &str) -> TcpMeterConfig {
        TcpMeterConfig {
            addr: addr.to_string(),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..Default::default()
        }
    }

    /// One-line description of the session.
    pub fn title(&self) -> String {
        format!(
            "{} updated every {} ms for {} reads",
            self.device.label(),
            self.update_ms,
            self.size
        )
    }

    pub fn print_help() {
        println!(
            r#"fast-meter - continuous measurement acquisition

USAGE:
    fast-meter [OPTIONS]

OPTIONS:
    -d, --device <SPEC>       Data source: sim | tcp://HOST:PORT [default: sim]
    -s, --size <N>            History size in samples [default: 3000]
    -u, --update <MS>         Update interval in ms, 0 for as fast as possible [default: 0]
    -t, --testing             Automatically terminate after 3 seconds
    --run-seconds <SECS>      Run for a fixed duration then exit
    --sim-latency-us <US>     Simulated per-read latency [default: 0]
    --sim-ready-every <N>     Simulated meter has a sample every Nth read [default: 1]
    --sim-fault-every <N>     Simulated meter faults every Nth read
    --read-timeout-ms <MS>    Remote meter read timeout [default: 50]
    --max-read-errors <N>     Stop after N consecutive read errors (disabled by default)
    --report-every <N>        Log frame count and cycle time every N frames, 0 disables [default: 100000]
    --json-logs               Output logs in JSON format
    --log-file <PATH>         Write logs to a file instead of stdout
    --metrics-addr <ADDR>     Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>        Append session events to a JSONL file
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log filter (e.g., RUST_LOG=debug,meter_core=trace)

EXAMPLES:
    # Simulated meter, 500 sample window, stop after ten seconds
    fast-meter --size 500 --run-seconds 10

    # Remote meter with metrics and audit trail
    fast-meter --device tcp://192.168.1.20:7100 --metrics-addr 0.0.0.0:9090 --audit-log session.jsonl
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("fast-meter")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[])).unwrap();
        assert_eq!(cfg.size, 3000);
        assert_eq!(cfg.update_ms, 0);
        assert_eq!(cfg.device, DeviceSpec::Simulated);
        assert_eq!(cfg.run_duration(), None);
        assert_eq!(cfg.title(), "SimulatedMeter updated every 0 ms for 3000 reads");
    }

    #[test]
    fn parses_short_and_long_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "-s",
            "300",
            "--update",
            "20",
            "-d",
            "tcp://10.0.0.5:7100",
            "--max-read-errors",
            "3",
            "-t",
        ]))
        .unwrap();
        assert_eq!(cfg.size, 300);
        assert_eq!(cfg.update_ms, 20);
        assert_eq!(cfg.device, DeviceSpec::Tcp("10.0.0.5:7100".into()));
        assert_eq!(cfg.max_read_errors, Some(3));
        assert_eq!(cfg.run_duration(), Some(Duration::from_secs(3)));

        let lc = cfg.loop_config().unwrap();
        assert_eq!(lc.capacity, 300);
        assert_eq!(lc.interval, Duration::from_millis(20));
    }

    #[test]
    fn run_seconds_overrides_testing() {
        let cfg = RuntimeConfig::from_args(&args(&["-t", "--run-seconds", "1"])).unwrap();
        assert_eq!(cfg.run_duration(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn negative_update_is_a_config_error() {
        let cfg = RuntimeConfig::from_args(&args(&["--update", "-5"])).unwrap();
        assert!(matches!(cfg.loop_config(), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn zero_size_is_a_config_error() {
        let cfg = RuntimeConfig::from_args(&args(&["--size", "0"])).unwrap();
        assert!(matches!(cfg.loop_config(), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--size", "lots"])),
            Err(RuntimeError::InvalidArgument { flag: "--size", .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--size"])),
            Err(RuntimeError::MissingValue("--size"))
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--geometry", "1,2,3,4"])),
            Err(RuntimeError::UnknownArgument(_))
        ));
        assert!(RuntimeConfig::from_args(&args(&["--device", "serial"])).is_err());
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["--help", "--bogus"])).unwrap();
        assert!(cfg.show_help);
    }
}
