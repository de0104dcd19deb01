use thiserror::Error;
use uvcman_core::{DeviceId, InvalidDeviceId, ParseError, Resolution};

use crate::driver::DriverError;
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Device query failed for {device}: {source}")]
    DeviceQuery {
        device: DeviceId,
        #[source]
        source: DriverError,
    },
    #[error("Resolution {resolution} is not supported by {device}")]
    UnsupportedResolution {
        device: DeviceId,
        resolution: Resolution,
    },
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),
    #[error("Device {device} cannot start preview while {state}")]
    InvalidState {
        device: DeviceId,
        state: SessionState,
    },
    #[error("Driver failed to open {device}: {source}")]
    Driver {
        device: DeviceId,
        #[source]
        source: DriverError,
    },
}

impl From<InvalidDeviceId> for SessionError {
    fn from(err: InvalidDeviceId) -> Self {
        SessionError::InvalidArgument(err.to_string())
    }
}
