pub mod acquisition;
pub mod device;
#[cfg(feature = "simulation")]
pub mod device_sim;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod sample;
pub mod sink;
pub mod timebase;

pub use acquisition::{AcquisitionLoop, CycleOutcome, CycleStats, LoopConfig, LoopStats};
pub use device::Device;
#[cfg(feature = "simulation")]
pub use device_sim::{SimulatedMeter, SimulatedMeterConfig};
pub use error::{ConfigError, DeviceError};
pub use history::HistoryBuffer;
pub use lifecycle::{AcquisitionHandle, CloseReport, LoopState, StopHandle};
pub use sample::Sample;
pub use sink::{FrameEvent, FrameExchange, FrameSink, FrameSnapshot, SinkChain};
pub use timebase::TimeBase;
