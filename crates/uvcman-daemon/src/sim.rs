//! Simulated UVC driver and render surfaces
//!
//! The driver answers every request by queueing the driver event a real
//! device would eventually produce, so the coordinator sees the same
//! asynchronous protocol as on hardware.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uvcman_core::{DeviceId, FormatCatalog, Resolution};
use uvcman_session::{
    CodecPreference, DeviceHandle, DriverError, DriverEvent, RenderSurfaceProvider, SurfaceRef,
    UvcDriver,
};

use crate::config::SimDeviceConfig;

pub struct SimulatedDriver {
    devices: HashMap<String, SimDeviceConfig>,
    /// Insertion order for attach/detach
    order: Vec<String>,
    events: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
    open: Mutex<HashSet<String>>,
    next_handle: AtomicI32,
}

impl SimulatedDriver {
    pub fn new(devices: Vec<SimDeviceConfig>, events: mpsc::UnboundedSender<DriverEvent>) -> Self {
        let order = devices.iter().map(|d| d.id.clone()).collect();
        Self {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
            order,
            events: Mutex::new(Some(events)),
            open: Mutex::new(HashSet::new()),
            next_handle: AtomicI32::new(1),
        }
    }

    /// Report every configured device as plugged in
    pub fn attach_all(&self) {
        for id in &self.order {
            info!(device = %id, "Simulating attach");
            self.send(DriverEvent::Attach { device: id.clone() });
        }
    }

    /// Report every configured device as unplugged
    pub fn detach_all(&self) {
        for id in &self.order {
            info!(device = %id, "Simulating detach");
            self.send(DriverEvent::Detach { device: id.clone() });
        }
    }

    /// Stop producing events; the coordinator's pump ends once it drains
    pub fn shutdown(&self) {
        self.events.lock().take();
    }

    pub fn is_device_open(&self, device: &str) -> bool {
        self.open.lock().contains(device)
    }

    fn send(&self, event: DriverEvent) {
        match self.events.lock().as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("Event receiver gone, dropping driver event");
                }
            }
            None => trace!(event = ?event, "Driver shut down, dropping event"),
        }
    }

    fn device(&self, device: &DeviceId) -> Result<&SimDeviceConfig, DriverError> {
        self.devices
            .get(device.as_str())
            .ok_or_else(|| DriverError::NotAvailable(device.to_string()))
    }
}

impl UvcDriver for SimulatedDriver {
    fn request_permission(&self, device: &DeviceId) {
        let granted = self
            .devices
            .get(device.as_str())
            .is_some_and(|d| d.grant_permission);
        debug!(device = %device, granted, "Permission dialog answered");
        self.send(DriverEvent::PermissionResult {
            device: device.to_string(),
            granted,
        });
    }

    fn open_device(
        &self,
        device: &DeviceId,
        resolution: Resolution,
        codec: CodecPreference,
    ) -> Result<DeviceHandle, DriverError> {
        self.device(device)?;
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.open.lock().insert(device.to_string());
        debug!(device = %device, handle = %handle, resolution = %resolution, codec = ?codec, "Opened");

        self.send(DriverEvent::Connected {
            device: device.to_string(),
        });
        self.send(DriverEvent::Ready {
            device: device.to_string(),
        });
        Ok(handle)
    }

    fn close_device(&self, device: &DeviceId) {
        // Only a real close produces a disconnect, so repeated closes stay quiet
        if self.open.lock().remove(device.as_str()) {
            debug!(device = %device, "Closed");
            self.send(DriverEvent::Disconnected {
                device: device.to_string(),
            });
        }
    }

    fn set_stream_target(
        &self,
        device: &DeviceId,
        handle: DeviceHandle,
        surface: SurfaceRef,
        resolution: Resolution,
    ) {
        if !self.is_device_open(device.as_str()) {
            warn!(device = %device, handle = %handle, "Stream target for closed device");
            return;
        }
        debug!(device = %device, surface = surface.0, resolution = %resolution, "Streaming");
        self.send(DriverEvent::StreamStarted {
            device: device.to_string(),
        });
    }

    fn stop_stream(&self, device: &DeviceId) {
        self.send(DriverEvent::StreamStopped {
            device: device.to_string(),
        });
    }

    fn query_device_info(&self, device: &DeviceId) -> Result<String, DriverError> {
        let config = self.device(device)?;
        Ok(serde_json::json!({ "vid": config.vid, "pid": config.pid }).to_string())
    }

    fn query_format_catalog(&self, device: &DeviceId) -> Result<String, DriverError> {
        let config = self.device(device)?;
        let catalog = FormatCatalog::from_formats(config.formats.clone());
        serde_json::to_string(&catalog).map_err(|e| DriverError::Failed(e.to_string()))
    }
}

/// Render surfaces that only count frames
#[derive(Default)]
pub struct SimSurfaces {
    next_surface: AtomicU64,
    frames: Mutex<HashMap<DeviceId, u64>>,
}

impl SimSurfaces {
    pub fn frames(&self, device: &str) -> u64 {
        DeviceId::new(device)
            .ok()
            .and_then(|id| self.frames.lock().get(&id).copied())
            .unwrap_or(0)
    }
}

impl RenderSurfaceProvider for SimSurfaces {
    fn create_surface(&self, resolution: Resolution) -> SurfaceRef {
        let surface = SurfaceRef(self.next_surface.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(surface = surface.0, resolution = %resolution, "Created surface");
        surface
    }

    fn render_frame(&self, device: &DeviceId, _handle: DeviceHandle) {
        *self.frames.lock().entry(device.clone()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use uvcman_core::FrameFormat;
    use uvcman_session::{CoordinatorConfig, SessionCoordinator, SessionState};

    fn theta_v(id: &str, grant_permission: bool) -> SimDeviceConfig {
        SimDeviceConfig {
            id: id.to_string(),
            vid: 1482,
            pid: 10002,
            grant_permission,
            formats: vec![FrameFormat::new(1280, 720, 1.0, 30.0)],
        }
    }

    struct Harness {
        coordinator: Arc<SessionCoordinator>,
        driver: Arc<SimulatedDriver>,
        surfaces: Arc<SimSurfaces>,
        pump: tokio::task::JoinHandle<()>,
    }

    fn harness(devices: Vec<SimDeviceConfig>) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(SimulatedDriver::new(devices, tx));
        let surfaces = Arc::new(SimSurfaces::default());
        let coordinator = Arc::new(SessionCoordinator::new(
            CoordinatorConfig {
                frame_interval: Duration::from_millis(2),
                ..Default::default()
            },
            driver.clone(),
            surfaces.clone(),
            Handle::current(),
        ));
        let pump = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(rx).await }
        });
        Harness {
            coordinator,
            driver,
            surfaces,
            pump,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_attach_reaches_preview() {
        let h = harness(vec![theta_v("cam0", true)]);
        h.driver.attach_all();

        assert!(wait_for(|| h.coordinator.is_previewing("cam0")).await);
        assert!(wait_for(|| h.surfaces.frames("cam0") > 0).await);
        assert!(h.driver.is_device_open("cam0"));

        h.driver.detach_all();
        h.driver.shutdown();
        h.pump.await.unwrap();

        assert!(h.coordinator.is_empty());
        assert!(!h.driver.is_device_open("cam0"));
    }

    #[tokio::test]
    async fn test_denied_permission_stays_closed() {
        let h = harness(vec![theta_v("cam0", false)]);
        h.driver.attach_all();

        assert!(
            wait_for(|| h.coordinator.state("cam0") == Some(SessionState::PermissionDenied))
                .await
        );
        assert!(!h.driver.is_device_open("cam0"));
        h.driver.shutdown();
        h.pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_closes_driver_devices() {
        let h = harness(vec![theta_v("cam0", true), theta_v("cam1", true)]);
        h.driver.attach_all();
        assert!(
            wait_for(|| h.coordinator.is_previewing("cam0") && h.coordinator.is_previewing("cam1"))
                .await
        );

        h.coordinator.on_pause();
        assert!(!h.driver.is_device_open("cam0"));
        assert!(!h.driver.is_device_open("cam1"));
        // Let the pump drain the disconnects produced by the closes
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.coordinator.on_resume();
        assert!(wait_for(|| {
            h.coordinator.is_previewing("cam0") || h.coordinator.is_previewing("cam1")
        })
        .await);
        h.driver.shutdown();
        h.pump.await.unwrap();
    }

    #[test]
    fn test_unknown_device_queries_fail() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let driver = SimulatedDriver::new(Vec::new(), tx);
        let id = DeviceId::new("ghost").unwrap();
        assert!(matches!(
            driver.query_device_info(&id),
            Err(DriverError::NotAvailable(_))
        ));
        assert!(driver
            .open_device(&id, Resolution::HD720, CodecPreference::H264First)
            .is_err());
    }

    #[test]
    fn test_catalog_round_trips_through_parser() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let driver = SimulatedDriver::new(vec![theta_v("cam0", true)], tx);
        let raw = driver
            .query_format_catalog(&DeviceId::new("cam0").unwrap())
            .unwrap();
        let catalog = FormatCatalog::parse(&raw).unwrap();
        assert!(catalog.contains(Resolution::HD720));
    }
}
