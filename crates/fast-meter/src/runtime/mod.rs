mod app;
mod config;
mod device;
mod error;
mod logging;
mod report;

pub use app::run_from_args;
