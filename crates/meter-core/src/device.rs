use crate::error::DeviceError;
use crate::sample::Sample;

/// Measurement source polled by the acquisition loop.
///
/// `read` is called once per cycle and must return within bounded time; a device
/// backed by blocking I/O applies its own timeout and reports it as `Ok(None)`.
/// `close` is called by the loop exactly once, when it reaches its terminal state.
pub trait Device: Send {
    /// `Ok(None)` means nothing was ready this cycle, which is not an error.
    fn read(&mut self) -> Result<Option<Sample>, DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    fn name(&self) -> &str {
        "device"
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn read(&mut self) -> Result<Option<Sample>, DeviceError> {
        (**self).read()
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
