//! Session coordinator
//!
//! Owns the registry and routes every driver notification and application
//! request to the matching session. Work on one device is sequenced through
//! the entry's sequencer; different devices proceed in parallel.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uvcman_core::{DeviceId, DeviceInfo, FormatCatalog, Resolution};

use crate::driver::{CodecPreference, RenderSurfaceProvider, UvcDriver};
use crate::error::SessionError;
use crate::events::{DriverEvent, SessionEvent};
use crate::frame_loop::FrameLoop;
use crate::handlers::{
    AttachDecision, AttachPolicy, DetachHandler, Handlers, PreviewHandler, ResolutionChoice,
    ResolutionPolicy,
};
use crate::registry::{SessionRegistry, SharedSession};
use crate::session::{DeviceSession, SessionSnapshot, SessionState, StreamTarget};

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Used to open devices and when no resolution policy picks one
    pub default_resolution: Resolution,
    /// Negotiate H.264 ahead of MJPEG when opening
    pub prefer_h264: bool,
    /// Frame loop period while previewing
    pub frame_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_resolution: Resolution::HD720,
            prefer_h264: true,
            frame_interval: Duration::from_millis(16),
        }
    }
}

impl CoordinatorConfig {
    pub fn codec_preference(&self) -> CodecPreference {
        CodecPreference::from_prefer_h264(self.prefer_h264)
    }
}

/// Devices with a permission request awaiting its result
#[derive(Default)]
struct PermissionGate {
    pending: Mutex<HashSet<DeviceId>>,
}

impl PermissionGate {
    fn begin(&self, device: &DeviceId) {
        self.pending.lock().insert(device.clone());
    }

    fn finish(&self, device: &DeviceId) -> bool {
        self.pending.lock().remove(device)
    }

    fn is_requesting(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

pub struct SessionCoordinator {
    config: CoordinatorConfig,
    driver: Arc<dyn UvcDriver>,
    surfaces: Arc<dyn RenderSurfaceProvider>,
    handlers: RwLock<Handlers>,
    registry: SessionRegistry,
    permission: PermissionGate,
    runtime: Handle,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    /// Frame loops are spawned on `runtime`
    pub fn new(
        config: CoordinatorConfig,
        driver: Arc<dyn UvcDriver>,
        surfaces: Arc<dyn RenderSurfaceProvider>,
        runtime: Handle,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            driver,
            surfaces,
            handlers: RwLock::new(Handlers::default()),
            registry: SessionRegistry::new(),
            permission: PermissionGate::default(),
            runtime,
            event_tx,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Subscribe to session changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn set_handlers(&self, handlers: Handlers) {
        *self.handlers.write() = handlers;
    }

    pub fn set_attach_policy(&self, policy: Arc<dyn AttachPolicy>) {
        self.handlers.write().attach = policy;
    }

    pub fn set_detach_handler(&self, handler: Arc<dyn DetachHandler>) {
        self.handlers.write().detach = handler;
    }

    pub fn set_resolution_policy(&self, policy: Arc<dyn ResolutionPolicy>) {
        self.handlers.write().resolution = policy;
    }

    pub fn set_preview_handler(&self, handler: Arc<dyn PreviewHandler>) {
        self.handlers.write().preview = handler;
    }

    fn handlers(&self) -> Handlers {
        self.handlers.read().clone()
    }

    // --- Driver events ---

    /// Route one driver notification
    pub fn dispatch(&self, event: DriverEvent) -> Result<(), SessionError> {
        match event {
            DriverEvent::Attach { device } => self.on_attach(&device),
            DriverEvent::Detach { device } => self.on_detach(&device),
            DriverEvent::PermissionResult { device, granted } => {
                self.on_permission_result(&device, granted)
            }
            DriverEvent::Connected { device } => self.on_connected(&device),
            DriverEvent::Disconnected { device } => self.on_disconnected(&device),
            DriverEvent::Ready { device } => self.on_ready(&device),
            DriverEvent::StreamStarted { device } => self.on_stream_started(&device),
            DriverEvent::StreamStopped { device } => self.on_stream_stopped(&device),
            DriverEvent::Status { device, payload } => self.on_status(&device, &payload),
            DriverEvent::Button { device, payload } => self.on_button(&device, &payload),
        }
    }

    /// Dispatch driver events until the sender side closes
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
        info!("Driver event pump started");
        while let Some(event) = events.recv().await {
            let device = event.device().to_string();
            if let Err(e) = self.dispatch(event) {
                warn!(device = %device, error = %e, "Driver event failed");
            }
        }
        info!("Driver event channel closed");
    }

    /// A device appeared. Creates its session, consults the attach policy and
    /// requests permission for accepted devices.
    pub fn on_attach(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let (entry, created) = match self
            .registry
            .get_or_create(&id, |id| self.build_session(id))
        {
            Ok(found) => found,
            Err(e) => {
                warn!(device = %id, error = %e, "Attach aborted");
                return Err(e);
            }
        };

        let _sequence = entry.sequence();
        let info = {
            let session = entry.lock();
            if session.state() != SessionState::Attached {
                debug!(device = %id, state = %session.state(), "Ignoring repeated attach");
                return Ok(());
            }
            session.device().clone()
        };

        if created {
            info!(
                device = %id,
                vid = info.vendor_id(),
                pid = info.product_id(),
                model = ?info.known_model(),
                "Device attached"
            );
            self.emit(SessionEvent::SessionCreated(info.clone()));
        }

        match self.handlers().attach.on_attach(self, &info) {
            AttachDecision::Accept => self.request_permission(&entry),
            AttachDecision::Reject => {
                info!(device = %id, "Device rejected by attach policy");
                self.discard(&entry);
            }
        }
        Ok(())
    }

    /// A device went away. Notifies the application, closes and forgets it.
    pub fn on_detach(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let Some(entry) = self.registry.get(&id) else {
            debug!(device = %id, "Detach for untracked device");
            return Ok(());
        };

        let _sequence = entry.sequence();
        let (info, seen) = {
            let session = entry.lock();
            if session.is_removed() {
                return Ok(());
            }
            // Attach policy has not run yet; the application never saw it
            (
                session.device().clone(),
                session.state() != SessionState::Attached,
            )
        };

        info!(device = %id, "Device detached");
        if seen {
            self.handlers().detach.on_detach(self, &info);
        }
        self.close_entry(&entry);
        self.discard(&entry);
        Ok(())
    }

    pub fn on_permission_result(&self, device: &str, granted: bool) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        self.permission.finish(&id);
        let Some(entry) = self.registry.get(&id) else {
            debug!(device = %id, granted, "Permission result for untracked device");
            return Ok(());
        };

        let _sequence = entry.sequence();
        if !granted {
            let prev = entry.lock().deny_permission();
            match prev {
                Some(prev) => {
                    info!(device = %id, "USB permission denied");
                    self.transitioned(&id, prev, SessionState::PermissionDenied);
                }
                None => debug!(device = %id, "Ignoring permission denial"),
            }
            return Ok(());
        }

        let prev = entry.lock().grant_permission();
        let Some(prev) = prev else {
            debug!(device = %id, "Ignoring permission grant");
            return Ok(());
        };
        self.transitioned(&id, prev, SessionState::PermissionGranted);
        self.open(&entry)
    }

    pub fn on_connected(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        debug!(device = %id, "Driver reported device connected");
        Ok(())
    }

    /// The driver closed the device on its own; mirror it in the session
    pub fn on_disconnected(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        info!(device = %id, "Driver reported device disconnected");
        self.close(device)
    }

    /// The device can take a stream target; start previewing if opened
    pub fn on_ready(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let Some(entry) = self.registry.get(&id) else {
            debug!(device = %id, "Ready for untracked device");
            return Ok(());
        };

        let _sequence = entry.sequence();
        let state = entry.lock().state();
        if state != SessionState::Opened {
            debug!(device = %id, state = %state, "Ignoring ready");
            return Ok(());
        }
        self.negotiate_and_start(&entry)
    }

    pub fn on_stream_started(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let Some(entry) = self.registry.get(&id) else {
            debug!(device = %id, "Stream started for untracked device");
            return Ok(());
        };

        let _sequence = entry.sequence();
        let started = {
            let mut session = entry.lock();
            session
                .stream_started()
                .map(|(target, handle)| (target, handle, session.device().clone()))
        };
        let Some((target, handle, info)) = started else {
            debug!(device = %id, "Ignoring stream started");
            return Ok(());
        };
        self.transitioned(&id, SessionState::Opened, SessionState::Previewing);

        let frame_loop = FrameLoop::spawn(
            &self.runtime,
            id.clone(),
            handle,
            self.config.frame_interval,
            self.surfaces.clone(),
        );
        let stale = entry.lock().attach_frame_loop(frame_loop);
        if let Some(stale) = stale {
            stale.stop();
        }

        info!(
            device = %id,
            surface = target.surface.0,
            resolution = %target.resolution,
            "Preview started"
        );
        self.handlers()
            .preview
            .on_preview_started(self, &info, target.surface);
        Ok(())
    }

    /// The stream ended. Covers both requested and spontaneous stops.
    pub fn on_stream_stopped(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let Some(entry) = self.registry.get(&id) else {
            debug!(device = %id, "Stream stopped for untracked device");
            return Ok(());
        };

        let _sequence = entry.sequence();
        let (info, stopped) = {
            let mut session = entry.lock();
            if session.is_removed() {
                return Ok(());
            }
            (session.device().clone(), session.stream_stopped())
        };

        if let Some((prev, frame_loop)) = stopped {
            if let Some(frame_loop) = frame_loop {
                frame_loop.stop();
            }
            info!(device = %id, "Stream stopped by driver");
            self.transitioned(&id, prev, SessionState::Opened);
        }
        self.handlers().preview.on_preview_stopped(self, &info);
        Ok(())
    }

    pub fn on_status(&self, device: &str, payload: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        debug!(device = %id, payload, "Device status");
        Ok(())
    }

    pub fn on_button(&self, device: &str, payload: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        debug!(device = %id, payload, "Device button");
        Ok(())
    }

    // --- Application requests ---

    /// Start previewing an opened device. A device already previewing is
    /// left alone.
    pub fn start_preview(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let entry = self
            .registry
            .get(&id)
            .ok_or_else(|| SessionError::UnknownDevice(id.clone()))?;

        let _sequence = entry.sequence();
        let state = entry.lock().state();
        match state {
            SessionState::Previewing => {
                debug!(device = %id, "Already previewing");
                Ok(())
            }
            SessionState::Opened => self.negotiate_and_start(&entry),
            state => Err(SessionError::InvalidState { device: id, state }),
        }
    }

    /// Stop previewing. The frame loop is stopped before the driver is told.
    pub fn stop_preview(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        let entry = self
            .registry
            .get(&id)
            .ok_or_else(|| SessionError::UnknownDevice(id.clone()))?;

        let _sequence = entry.sequence();
        let stopped = entry.lock().stop();
        let Some((prev, frame_loop)) = stopped else {
            debug!(device = %id, "Not previewing, nothing to stop");
            return Ok(());
        };

        if let Some(frame_loop) = frame_loop {
            frame_loop.stop();
        }
        if let Some(prev) = prev {
            self.transitioned(&id, prev, SessionState::Stopped);
        }

        info!(device = %id, "Stopping preview");
        self.driver.stop_stream(&id);

        let reopened = entry.lock().finish_stop();
        if let Some(prev) = reopened {
            self.transitioned(&id, prev, SessionState::Opened);
        }
        Ok(())
    }

    /// Close a device. Always asks the driver to close, tracked or not.
    pub fn close(&self, device: &str) -> Result<(), SessionError> {
        let id = DeviceId::new(device)?;
        match self.registry.get(&id) {
            Some(entry) => {
                let _sequence = entry.sequence();
                self.close_entry(&entry);
            }
            None => {
                debug!(device = %id, "Closing untracked device");
                self.driver.close_device(&id);
            }
        }
        Ok(())
    }

    pub fn close_all(&self) {
        self.registry.for_each(|entry| {
            let _sequence = entry.sequence();
            if !entry.lock().is_removed() {
                self.close_entry(entry);
            }
        });
    }

    /// Host going to background: release every device
    pub fn on_pause(&self) {
        info!(sessions = self.registry.len(), "Pausing, closing all devices");
        self.close_all();
    }

    /// Host back in foreground: ask again for one device that lost its
    /// permission or handle, unless a request is already outstanding
    pub fn on_resume(&self) {
        if self.permission.is_requesting() {
            debug!("Permission request in flight, not requesting again");
            return;
        }

        let mut candidate = None;
        self.registry.for_each(|entry| {
            if candidate.is_none() && entry.lock().needs_permission() {
                candidate = Some(entry.clone());
            }
        });

        if let Some(entry) = candidate {
            let _sequence = entry.sequence();
            info!(device = %entry.id(), "Requesting permission again on resume");
            self.request_permission(&entry);
        }
    }

    // --- Queries ---

    pub fn is_open(&self, device: &str) -> bool {
        self.with_session(device, DeviceSession::is_open)
            .unwrap_or(false)
    }

    pub fn is_previewing(&self, device: &str) -> bool {
        self.with_session(device, DeviceSession::is_previewing)
            .unwrap_or(false)
    }

    pub fn is_permission_requesting(&self) -> bool {
        self.permission.is_requesting()
    }

    pub fn stream_target(&self, device: &str) -> Option<StreamTarget> {
        self.with_session(device, DeviceSession::stream_target)
            .flatten()
    }

    pub fn state(&self, device: &str) -> Option<SessionState> {
        self.with_session(device, DeviceSession::state)
    }

    pub fn device_info(&self, device: &str) -> Option<DeviceInfo> {
        self.with_session(device, |session| session.device().clone())
    }

    pub fn catalog(&self, device: &str) -> Option<FormatCatalog> {
        self.with_session(device, |session| session.catalog().clone())
    }

    pub fn session(&self, device: &str) -> Option<SessionSnapshot> {
        self.lookup(device).map(|entry| entry.snapshot())
    }

    /// Snapshots of every tracked session, ordered by device id
    pub fn devices(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::with_capacity(self.registry.len());
        self.registry
            .for_each(|entry| snapshots.push(entry.snapshot()));
        snapshots.sort_by(|a, b| a.device.id().cmp(b.device.id()));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // --- Internals ---

    fn lookup(&self, device: &str) -> Option<SharedSession> {
        let id = DeviceId::new(device).ok()?;
        self.registry.get(&id)
    }

    fn with_session<R>(&self, device: &str, f: impl FnOnce(&DeviceSession) -> R) -> Option<R> {
        let entry = self.lookup(device)?;
        let session = entry.lock();
        Some(f(&*session))
    }

    /// Query and parse identity and capabilities for a new device
    fn build_session(&self, id: &DeviceId) -> Result<DeviceSession, SessionError> {
        let raw_info = self
            .driver
            .query_device_info(id)
            .map_err(|source| SessionError::DeviceQuery {
                device: id.clone(),
                source,
            })?;
        let info = DeviceInfo::parse(id.clone(), &raw_info)?;

        let catalog = self.query_catalog(id)?;
        debug!(device = %id, formats = %catalog, "Capabilities loaded");
        Ok(DeviceSession::new(info, catalog))
    }

    fn query_catalog(&self, id: &DeviceId) -> Result<FormatCatalog, SessionError> {
        let raw = self
            .driver
            .query_format_catalog(id)
            .map_err(|source| SessionError::DeviceQuery {
                device: id.clone(),
                source,
            })?;
        Ok(FormatCatalog::parse(&raw)?)
    }

    fn request_permission(&self, entry: &SharedSession) {
        let id = entry.id();
        let prev = entry.lock().request_permission();
        let Some(prev) = prev else {
            debug!(device = %id, "Permission request not applicable");
            return;
        };

        self.permission.begin(id);
        self.transitioned(id, prev, SessionState::PermissionRequested);
        info!(device = %id, "Requesting USB permission");
        self.driver.request_permission(id);
    }

    fn open(&self, entry: &SharedSession) -> Result<(), SessionError> {
        let id = entry.id();
        let resolution = self.config.default_resolution;
        let codec = self.config.codec_preference();

        let handle = match self.driver.open_device(id, resolution, codec) {
            Ok(handle) => handle,
            Err(source) => {
                warn!(device = %id, error = %source, "Failed to open device");
                return Err(SessionError::Driver {
                    device: id.clone(),
                    source,
                });
            }
        };

        let prev = entry.lock().opened(handle);
        match prev {
            Some(prev) => {
                info!(device = %id, handle = %handle, resolution = %resolution, codec = ?codec, "Device opened");
                self.transitioned(id, prev, SessionState::Opened);
            }
            None => {
                warn!(device = %id, handle = %handle, "Session changed while opening, closing handle");
                self.driver.close_device(id);
            }
        }
        Ok(())
    }

    /// Re-read the catalog, pick a resolution and hand the driver a target.
    /// Nothing reaches the driver when the resolution is unsupported.
    fn negotiate_and_start(&self, entry: &SharedSession) -> Result<(), SessionError> {
        let id = entry.id();
        let (info, handle, pending) = {
            let session = entry.lock();
            (
                session.device().clone(),
                session.active_handle(),
                session.pending_target(),
            )
        };
        if let Some(pending) = pending {
            debug!(device = %id, resolution = %pending.resolution, "Preview start already pending");
            return Ok(());
        }
        let Some(handle) = handle else {
            let state = entry.lock().state();
            return Err(SessionError::InvalidState {
                device: id.clone(),
                state,
            });
        };

        let catalog = self.query_catalog(id)?;
        let resolution = match self
            .handlers()
            .resolution
            .select_resolution(self, &info, &catalog)
        {
            ResolutionChoice::Default => self.config.default_resolution,
            ResolutionChoice::Use(resolution) => resolution,
        };

        if catalog
            .find(resolution.width, resolution.height, None)
            .is_none()
        {
            warn!(
                device = %id,
                resolution = %resolution,
                supported = %catalog,
                "Resolution not supported"
            );
            entry.lock().set_catalog(catalog);
            return Err(SessionError::UnsupportedResolution {
                device: id.clone(),
                resolution,
            });
        }

        let surface = self.surfaces.create_surface(resolution);
        let target = StreamTarget {
            surface,
            resolution,
        };
        let accepted = entry.lock().begin_preview(target, catalog);
        if !accepted {
            debug!(device = %id, "Session changed during negotiation, preview not started");
            return Ok(());
        }

        info!(device = %id, resolution = %resolution, "Setting stream target");
        self.driver
            .set_stream_target(id, handle, surface, resolution);
        Ok(())
    }

    fn close_entry(&self, entry: &SharedSession) {
        let id = entry.id();
        let (prev, frame_loop) = entry.lock().close();
        if let Some(frame_loop) = frame_loop {
            frame_loop.stop();
        }

        self.driver.close_device(id);
        if let Some(prev) = prev {
            info!(device = %id, "Device closed");
            self.transitioned(id, prev, SessionState::Closed);
        }
    }

    /// Mark removed and drop from the registry. Later events for this entry
    /// find it gone or removed and do nothing.
    fn discard(&self, entry: &SharedSession) {
        let id = entry.id();
        let (prev, frame_loop) = entry.lock().mark_removed();
        if let Some(frame_loop) = frame_loop {
            frame_loop.stop();
        }

        self.permission.finish(id);
        self.registry.remove_entry(id, entry);
        if let Some(prev) = prev {
            self.transitioned(id, prev, SessionState::Removed);
        }
        self.emit(SessionEvent::SessionRemoved(id.clone()));
    }

    fn transitioned(&self, device: &DeviceId, from: SessionState, to: SessionState) {
        debug!(device = %device, from = %from, to = %to, "Session state changed");
        self.emit(SessionEvent::StateChanged {
            device: device.clone(),
            from,
            to,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
