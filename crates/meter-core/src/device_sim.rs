use crate::device::Device;
use crate::error::DeviceError;
use crate::sample::Sample;
use crate::timebase::TimeBase;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatedMeterConfig {
    /// Mean optical power in milliwatts.
    pub baseline_mw: f64,
    pub amplitude_mw: f64,
    pub period: Duration,
    /// Relative noise, uniform in `±noise_fraction`.
    pub noise_fraction: f64,
    /// Time each read blocks, like a USB round-trip.
    pub latency: Duration,
    /// Only every Nth read has a sample ready; the rest return `None`.
    pub ready_every: u32,
    /// Every Mth read fails with a device fault.
    pub fault_every: Option<u32>,
    pub seed: Option<u64>,
}

impl Default for SimulatedMeterConfig {
    fn default() -> Self {
        Self {
            baseline_mw: 1.0,
            amplitude_mw: 0.25,
            period: Duration::from_secs(5),
            noise_fraction: 0.05,
            latency: Duration::ZERO,
            ready_every: 1,
            fault_every: None,
            seed: None,
        }
    }
}

/// Simulated optical power meter with a slow sinusoidal drift and noise.
#[derive(Debug)]
pub struct SimulatedMeter {
    config: SimulatedMeterConfig,
    timebase: TimeBase,
    rng: StdRng,
    reads: u64,
    closed: bool,
}

impl SimulatedMeter {
    pub fn new(config: SimulatedMeterConfig, timebase: TimeBase) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            timebase,
            rng,
            reads: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn power_at(&mut self, timestamp_us: u64) -> f64 {
        let period_s = self.config.period.as_secs_f64().max(f64::EPSILON);
        let phase = TAU * (timestamp_us as f64 / 1_000_000.0) / period_s;
        let clean = self.config.baseline_mw + self.config.amplitude_mw * phase.sin();
        let noise = if self.config.noise_fraction > 0.0 {
            self.rng
                .gen_range(-self.config.noise_fraction..self.config.noise_fraction)
        } else {
            0.0
        };
        clean * (1.0 + noise)
    }
}

impl Default for SimulatedMeter {
    fn default() -> Self {
        Self::new(SimulatedMeterConfig::default(), TimeBase::new())
    }
}

impl Device for SimulatedMeter {
    fn read(&mut self) -> Result<Option<Sample>, DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        if !self.config.latency.is_zero() {
            thread::sleep(self.config.latency);
        }
        self.reads += 1;

        if let Some(every) = self.config.fault_every.filter(|n| *n > 0) {
            if self.reads % u64::from(every) == 0 {
                return Err(DeviceError::Fault(format!(
                    "simulated fault on read {}",
                    self.reads
                )));
            }
        }
        if self.reads % u64::from(self.config.ready_every.max(1)) != 0 {
            return Ok(None);
        }

        let timestamp_us = self.timebase.now_us();
        let value = self.power_at(timestamp_us);
        Ok(Some(Sample::new(timestamp_us, value)))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn meter(config: SimulatedMeterConfig) -> SimulatedMeter {
        SimulatedMeter::new(
            SimulatedMeterConfig {
                seed: Some(7),
                ..config
            },
            TimeBase::new(),
        )
    }

    #[test]
    fn readings_stay_within_noise_envelope() {
        let mut m = meter(SimulatedMeterConfig::default());
        for _ in 0..200 {
            let sample = m.read().unwrap().unwrap();
            assert!(sample.value > 0.75 * 0.95 - 1e-9);
            assert!(sample.value < 1.25 * 1.05 + 1e-9);
        }
    }

    #[test]
    fn ready_every_yields_gaps() {
        let mut m = meter(SimulatedMeterConfig {
            ready_every: 3,
            ..Default::default()
        });
        let ready: Vec<bool> = (0..6).map(|_| m.read().unwrap().is_some()).collect();
        assert_eq!(ready, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn fault_injection() {
        let mut m = meter(SimulatedMeterConfig {
            fault_every: Some(2),
            ..Default::default()
        });
        assert!(m.read().is_ok());
        assert!(matches!(m.read(), Err(DeviceError::Fault(_))));
        assert!(m.read().is_ok());
    }

    #[test]
    fn latency_is_applied() {
        let mut m = meter(SimulatedMeterConfig {
            latency: Duration::from_millis(5),
            ..Default::default()
        });
        let started = Instant::now();
        m.read().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn second_close_fails_and_reads_stop() {
        let mut m = meter(SimulatedMeterConfig::default());
        assert!(m.close().is_ok());
        assert!(m.is_closed());
        assert!(matches!(m.close(), Err(DeviceError::AlreadyClosed)));
        assert!(matches!(m.read(), Err(DeviceError::AlreadyClosed)));
    }
}
