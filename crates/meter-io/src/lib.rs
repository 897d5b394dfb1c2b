pub mod metrics;
pub mod protocol;
pub mod remote;

pub use metrics::{init_metrics, serve_metrics, MetricsSink};
pub use protocol::MeterMessage;
pub use remote::{RemoteError, TcpMeter, TcpMeterConfig};
