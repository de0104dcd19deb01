//! Test doubles for the driver, renderer and application callbacks

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use uvcman_core::{DeviceId, DeviceInfo, FormatCatalog, Resolution};

use crate::coordinator::SessionCoordinator;
use crate::driver::{
    CodecPreference, DeviceHandle, DriverError, RenderSurfaceProvider, SurfaceRef, UvcDriver,
};
use crate::handlers::{
    AttachDecision, AttachPolicy, DetachHandler, PreviewHandler, ResolutionChoice,
    ResolutionPolicy,
};

pub const THETA_V_INFO: &str = r#"{"vid":1482,"pid":10002}"#;

pub const DEFAULT_CATALOG: &str = r#"{"formats":[
    {"width":1920,"height":1080,"min_fps":1.0,"max_fps":30.0,"type":"h264"},
    {"width":1280,"height":720,"min_fps":1.0,"max_fps":30.0,"type":"mjpeg"},
    {"width":640,"height":480,"min_fps":1.0,"max_fps":30.0,"type":"yuyv"}
]}"#;

pub const VGA_ONLY_CATALOG: &str = r#"{"formats":[{"width":640,"height":480,"min_fps":1.0,"max_fps":30.0}]}"#;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    RequestPermission(String),
    Open {
        device: String,
        resolution: Resolution,
        codec: CodecPreference,
    },
    Close(String),
    SetStreamTarget {
        device: String,
        handle: DeviceHandle,
        surface: SurfaceRef,
        resolution: Resolution,
    },
    StopStream(String),
    QueryInfo(String),
    QueryCatalog(String),
}

impl DriverCall {
    fn is_query(&self) -> bool {
        matches!(self, DriverCall::QueryInfo(_) | DriverCall::QueryCatalog(_))
    }
}

/// Driver that records every call. Unknown devices report a THETA V with
/// [`DEFAULT_CATALOG`].
#[derive(Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<DriverCall>>,
    infos: Mutex<HashMap<String, Result<String, DriverError>>>,
    catalogs: Mutex<HashMap<String, Result<String, DriverError>>>,
    failing_opens: Mutex<HashSet<String>>,
    next_handle: AtomicI32,
}

impl RecordingDriver {
    pub fn set_info(&self, device: &str, raw: &str) {
        self.infos.lock().insert(device.to_string(), Ok(raw.to_string()));
    }

    pub fn set_catalog(&self, device: &str, raw: &str) {
        self.catalogs
            .lock()
            .insert(device.to_string(), Ok(raw.to_string()));
    }

    pub fn fail_info_query(&self, device: &str) {
        self.infos.lock().insert(
            device.to_string(),
            Err(DriverError::NotAvailable(device.to_string())),
        );
    }

    pub fn fail_open(&self, device: &str) {
        self.failing_opens.lock().insert(device.to_string());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Calls with side effects, queries left out
    pub fn commands(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| !c.is_query())
            .cloned()
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }
}

impl UvcDriver for RecordingDriver {
    fn request_permission(&self, device: &DeviceId) {
        self.record(DriverCall::RequestPermission(device.to_string()));
    }

    fn open_device(
        &self,
        device: &DeviceId,
        resolution: Resolution,
        codec: CodecPreference,
    ) -> Result<DeviceHandle, DriverError> {
        self.record(DriverCall::Open {
            device: device.to_string(),
            resolution,
            codec,
        });
        if self.failing_opens.lock().contains(device.as_str()) {
            return Err(DriverError::Failed("open refused".to_string()));
        }
        Ok(DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn close_device(&self, device: &DeviceId) {
        self.record(DriverCall::Close(device.to_string()));
    }

    fn set_stream_target(
        &self,
        device: &DeviceId,
        handle: DeviceHandle,
        surface: SurfaceRef,
        resolution: Resolution,
    ) {
        self.record(DriverCall::SetStreamTarget {
            device: device.to_string(),
            handle,
            surface,
            resolution,
        });
    }

    fn stop_stream(&self, device: &DeviceId) {
        self.record(DriverCall::StopStream(device.to_string()));
    }

    fn query_device_info(&self, device: &DeviceId) -> Result<String, DriverError> {
        self.record(DriverCall::QueryInfo(device.to_string()));
        self.infos
            .lock()
            .get(device.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(THETA_V_INFO.to_string()))
    }

    fn query_format_catalog(&self, device: &DeviceId) -> Result<String, DriverError> {
        self.record(DriverCall::QueryCatalog(device.to_string()));
        self.catalogs
            .lock()
            .get(device.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(DEFAULT_CATALOG.to_string()))
    }
}

#[derive(Default)]
pub struct CountingSurfaces {
    next: AtomicU64,
    created: Mutex<Vec<Resolution>>,
    frames: AtomicUsize,
}

impl CountingSurfaces {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Resolution> {
        self.created.lock().clone()
    }
}

impl RenderSurfaceProvider for CountingSurfaces {
    fn create_surface(&self, resolution: Resolution) -> SurfaceRef {
        self.created.lock().push(resolution);
        SurfaceRef(100 + self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn render_frame(&self, _device: &DeviceId, _handle: DeviceHandle) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// Application callbacks with a fixed attach decision and resolution choice,
/// logging every invocation as `kind:device`
pub struct ScriptedHandlers {
    decision: AttachDecision,
    choice: ResolutionChoice,
    log: Mutex<Vec<String>>,
}

impl ScriptedHandlers {
    pub fn new(decision: AttachDecision, choice: ResolutionChoice) -> Self {
        Self {
            decision,
            choice,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn push(&self, kind: &str, info: &DeviceInfo) {
        self.log.lock().push(format!("{}:{}", kind, info.id()));
    }
}

impl AttachPolicy for ScriptedHandlers {
    fn on_attach(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) -> AttachDecision {
        self.push("attach", info);
        self.decision
    }
}

impl DetachHandler for ScriptedHandlers {
    fn on_detach(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) {
        self.push("detach", info);
    }
}

impl ResolutionPolicy for ScriptedHandlers {
    fn select_resolution(
        &self,
        _coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        _catalog: &FormatCatalog,
    ) -> ResolutionChoice {
        self.push("select", info);
        self.choice
    }
}

impl PreviewHandler for ScriptedHandlers {
    fn on_preview_started(
        &self,
        _coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        surface: SurfaceRef,
    ) {
        self.log
            .lock()
            .push(format!("started:{}:{}", info.id(), surface.0));
    }

    fn on_preview_stopped(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) {
        self.push("stopped", info);
    }
}
