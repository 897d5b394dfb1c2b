use meter_core::ConfigError;
use meter_io::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {flag}: {value}")]
    InvalidArgument { flag: &'static str, value: String },
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("remote meter unavailable: {0}")]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("acquisition thread panicked")]
    LoopPanicked,
}
