use thiserror::Error;

/// Raised when driver-reported device data is not well formed.
///
/// Parsing never yields a partially populated value: either every required
/// field was read or one of these variants is returned.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed device info for {device}: {source}")]
    DeviceInfo {
        device: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed format catalog: {0}")]
    Catalog(#[from] serde_json::Error),
    #[error("Invalid format entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Device identifier is empty")]
pub struct InvalidDeviceId;
