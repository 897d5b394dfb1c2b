use crate::runtime::config::{DeviceSpec, RuntimeConfig};
use crate::runtime::error::RuntimeError;
use meter_core::{Device, DeviceError, Sample, SimulatedMeter, TimeBase};
use meter_io::TcpMeter;
use tracing::info;

/// The meters the binary can drive.
pub enum MeterDevice {
    Simulated(SimulatedMeter),
    Remote(TcpMeter),
}

impl MeterDevice {
    pub fn open(config: &RuntimeConfig, timebase: TimeBase) -> Result<Self, RuntimeError> {
        match &config.device {
            DeviceSpec::Simulated => {
                let sim = config.simulation();
                info!(
                    latency_us = u64::try_from(sim.latency.as_micros()).unwrap_or(u64::MAX),
                    ready_every = sim.ready_every,
                    fault_every = ?sim.fault_every,
                    "Using simulated meter"
                );
                Ok(Self::Simulated(SimulatedMeter::new(sim, timebase)))
            }
            DeviceSpec::Tcp(addr) => {
                info!(addr = %addr, "Connecting to remote meter");
                let meter = TcpMeter::connect(&config.remote(addr), timebase)?;
                Ok(Self::Remote(meter))
            }
        }
    }
}

impl Device for MeterDevice {
    fn read(&mut self) -> Result<Option<Sample>, DeviceError> {
        match self {
            Self::Simulated(m) => m.read(),
            Self::Remote(m) => m.read(),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Simulated(m) => m.close(),
            Self::Remote(m) => m.close(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Simulated(m) => m.name(),
            Self::Remote(m) => m.name(),
        }
    }
}
