//! Collaborator interfaces implemented outside the session core

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uvcman_core::{DeviceId, Resolution};

/// Opaque handle the driver returns when a device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub i32);

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to a render surface owned by the rendering collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceRef(pub u64);

/// Stream negotiation order requested when opening a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecPreference {
    /// H.264 > MJPEG > YUV
    H264First,
    /// MJPEG > H.264 > YUV
    MjpegFirst,
}

impl CodecPreference {
    pub fn from_prefer_h264(prefer_h264: bool) -> Self {
        if prefer_h264 {
            Self::H264First
        } else {
            Self::MjpegFirst
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Device not available: {0}")]
    NotAvailable(String),
    #[error("Driver call failed: {0}")]
    Failed(String),
}

/// Native driver that talks to the USB devices.
///
/// Everything except the queries is fire-and-request: completion is reported
/// later as a [`crate::DriverEvent`]. `close_device` must tolerate devices
/// that are already closed or were never opened.
pub trait UvcDriver: Send + Sync {
    fn request_permission(&self, device: &DeviceId);

    fn open_device(
        &self,
        device: &DeviceId,
        resolution: Resolution,
        codec: CodecPreference,
    ) -> Result<DeviceHandle, DriverError>;

    fn close_device(&self, device: &DeviceId);

    fn set_stream_target(
        &self,
        device: &DeviceId,
        handle: DeviceHandle,
        surface: SurfaceRef,
        resolution: Resolution,
    );

    fn stop_stream(&self, device: &DeviceId);

    /// Raw device info payload, e.g. `{"vid":1482,"pid":10002}`
    fn query_device_info(&self, device: &DeviceId) -> Result<String, DriverError>;

    /// Raw capability listing, see [`uvcman_core::FormatCatalog::parse`]
    fn query_format_catalog(&self, device: &DeviceId) -> Result<String, DriverError>;
}

/// Rendering pipeline that presents decoded frames.
pub trait RenderSurfaceProvider: Send + Sync {
    /// Called once per preview start
    fn create_surface(&self, resolution: Resolution) -> SurfaceRef;

    /// Called on every frame loop tick while the device is previewing.
    /// Must not stop or close the same device from inside this call.
    fn render_frame(&self, device: &DeviceId, handle: DeviceHandle);
}
