//! uvcman Core - Device identity and capability types
//!
//! This crate provides the leaf data types shared by the rest of uvcman:
//! - Device identifiers and parsed vendor/product information
//! - Format catalogs describing the resolutions and frame rates a device supports
//! - Parse errors raised when driver-reported data is malformed

pub mod device;
pub mod error;
pub mod format;

pub use device::{DeviceId, DeviceInfo, KnownModel};
pub use error::{InvalidDeviceId, ParseError};
pub use format::{FormatCatalog, FrameFormat, FrameType, Resolution};
