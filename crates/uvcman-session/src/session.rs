//! Per-device session state machine
//!
//! Transition methods only validate and mutate; the coordinator issues the
//! matching driver calls. A method returns the previous state when it changed
//! something and `None` when the event does not apply, so duplicate or late
//! events fall through as no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uvcman_core::{DeviceInfo, FormatCatalog, Resolution};

use crate::driver::{DeviceHandle, SurfaceRef};
use crate::frame_loop::FrameLoop;

/// Lifecycle state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Tracked, attach policy not yet applied
    Attached,
    /// Waiting for the permission result
    PermissionRequested,
    /// Permission granted, open in progress (or failed)
    PermissionGranted,
    /// Permission refused; stays until detach
    PermissionDenied,
    /// Open at the driver level
    Opened,
    /// Streaming into a render surface
    Previewing,
    /// Stop issued, returning to opened
    Stopped,
    /// Closed at the driver level, still tracked
    Closed,
    /// Dropped from the registry; every further event is ignored
    Removed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Attached => "attached",
            SessionState::PermissionRequested => "permission_requested",
            SessionState::PermissionGranted => "permission_granted",
            SessionState::PermissionDenied => "permission_denied",
            SessionState::Opened => "opened",
            SessionState::Previewing => "previewing",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
            SessionState::Removed => "removed",
        };
        write!(f, "{}", name)
    }
}

/// Where a device streams to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub surface: SurfaceRef,
    pub resolution: Resolution,
}

/// Point-in-time copy of a session for callers outside the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub device: DeviceInfo,
    pub state: SessionState,
    pub active_handle: Option<DeviceHandle>,
    pub stream_target: Option<StreamTarget>,
    pub attached_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tracked lifecycle of one physical device
pub struct DeviceSession {
    device: DeviceInfo,
    catalog: FormatCatalog,
    state: SessionState,
    active_handle: Option<DeviceHandle>,
    stream_target: Option<StreamTarget>,
    /// Target handed to the driver, waiting for the stream-started ack
    pending_target: Option<StreamTarget>,
    frame_loop: Option<FrameLoop>,
    attached_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeviceSession {
    pub fn new(device: DeviceInfo, catalog: FormatCatalog) -> Self {
        let now = Utc::now();
        Self {
            device,
            catalog,
            state: SessionState::Attached,
            active_handle: None,
            stream_target: None,
            pending_target: None,
            frame_loop: None,
            attached_at: now,
            updated_at: now,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_handle(&self) -> Option<DeviceHandle> {
        self.active_handle
    }

    pub fn stream_target(&self) -> Option<StreamTarget> {
        self.stream_target
    }

    pub fn pending_target(&self) -> Option<StreamTarget> {
        self.pending_target
    }

    pub fn is_open(&self) -> bool {
        self.active_handle.is_some()
    }

    pub fn is_previewing(&self) -> bool {
        self.state == SessionState::Previewing
            && self.active_handle.is_some()
            && self.stream_target.is_some()
    }

    pub fn is_removed(&self) -> bool {
        self.state == SessionState::Removed
    }

    /// Not open and not waiting on anything the driver owes us
    pub fn needs_permission(&self) -> bool {
        self.active_handle.is_none()
            && matches!(
                self.state,
                SessionState::PermissionRequested
                    | SessionState::PermissionGranted
                    | SessionState::Closed
            )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            device: self.device.clone(),
            state: self.state,
            active_handle: self.active_handle,
            stream_target: self.stream_target,
            attached_at: self.attached_at,
            updated_at: self.updated_at,
        }
    }

    fn transition(&mut self, to: SessionState) -> SessionState {
        let from = self.state;
        self.state = to;
        self.updated_at = Utc::now();
        from
    }

    /// Attached, Closed, or a stale request → PermissionRequested
    pub fn request_permission(&mut self) -> Option<SessionState> {
        match self.state {
            SessionState::Attached | SessionState::PermissionRequested => {
                Some(self.transition(SessionState::PermissionRequested))
            }
            SessionState::PermissionGranted | SessionState::Closed
                if self.active_handle.is_none() =>
            {
                Some(self.transition(SessionState::PermissionRequested))
            }
            _ => None,
        }
    }

    pub fn grant_permission(&mut self) -> Option<SessionState> {
        match self.state {
            SessionState::PermissionRequested => {
                Some(self.transition(SessionState::PermissionGranted))
            }
            _ => None,
        }
    }

    pub fn deny_permission(&mut self) -> Option<SessionState> {
        match self.state {
            SessionState::PermissionRequested => {
                Some(self.transition(SessionState::PermissionDenied))
            }
            _ => None,
        }
    }

    /// Record the driver handle after a successful open
    pub fn opened(&mut self, handle: DeviceHandle) -> Option<SessionState> {
        match self.state {
            SessionState::PermissionGranted => {
                self.active_handle = Some(handle);
                Some(self.transition(SessionState::Opened))
            }
            _ => None,
        }
    }

    /// Remember the validated target while the driver starts streaming.
    /// The catalog used for validation replaces the one fetched on attach.
    pub fn begin_preview(&mut self, target: StreamTarget, catalog: FormatCatalog) -> bool {
        self.catalog = catalog;
        if self.state != SessionState::Opened || self.active_handle.is_none() {
            return false;
        }
        self.pending_target = Some(target);
        self.updated_at = Utc::now();
        true
    }

    pub fn set_catalog(&mut self, catalog: FormatCatalog) {
        self.catalog = catalog;
    }

    /// Driver acknowledged streaming. Requires an open handle and a pending
    /// target; a repeated ack while already previewing is ignored.
    pub fn stream_started(&mut self) -> Option<(StreamTarget, DeviceHandle)> {
        if self.state != SessionState::Opened {
            return None;
        }
        let handle = self.active_handle?;
        let target = self.pending_target.take()?;
        self.stream_target = Some(target);
        self.transition(SessionState::Previewing);
        Some((target, handle))
    }

    /// Hand the running frame loop to the session. Returns it back when the
    /// session already left `Previewing`, so the caller can stop it.
    pub fn attach_frame_loop(&mut self, frame_loop: FrameLoop) -> Option<FrameLoop> {
        if self.state != SessionState::Previewing {
            return Some(frame_loop);
        }
        self.frame_loop.replace(frame_loop)
    }

    /// Previewing → Stopped. Also drops a start that has not been acked yet.
    /// The returned frame loop must be stopped before the driver is told.
    pub fn stop(&mut self) -> Option<(Option<SessionState>, Option<FrameLoop>)> {
        let had_pending = self.pending_target.take().is_some();
        match self.state {
            SessionState::Previewing => {
                self.stream_target = None;
                let frame_loop = self.frame_loop.take();
                Some((Some(self.transition(SessionState::Stopped)), frame_loop))
            }
            SessionState::Opened if had_pending => Some((None, None)),
            _ => None,
        }
    }

    /// Stopped → Opened once the stop has been issued
    pub fn finish_stop(&mut self) -> Option<SessionState> {
        match self.state {
            SessionState::Stopped => Some(self.transition(SessionState::Opened)),
            _ => None,
        }
    }

    /// The driver reported the stream ended. Handles spontaneous stops while
    /// previewing; otherwise nothing changes.
    pub fn stream_stopped(&mut self) -> Option<(SessionState, Option<FrameLoop>)> {
        match self.state {
            SessionState::Previewing => {
                self.stream_target = None;
                let frame_loop = self.frame_loop.take();
                Some((self.transition(SessionState::Opened), frame_loop))
            }
            _ => None,
        }
    }

    /// Any state except Removed → Closed, clearing handle and targets.
    /// Returns the previous state only when the state actually changed.
    pub fn close(&mut self) -> (Option<SessionState>, Option<FrameLoop>) {
        let frame_loop = self.frame_loop.take();
        self.active_handle = None;
        self.stream_target = None;
        self.pending_target = None;
        let prev = match self.state {
            SessionState::Closed | SessionState::Removed => None,
            _ => Some(self.transition(SessionState::Closed)),
        };
        (prev, frame_loop)
    }

    /// Final transition; the session ignores everything afterwards
    pub fn mark_removed(&mut self) -> (Option<SessionState>, Option<FrameLoop>) {
        let (_, frame_loop) = self.close();
        let prev = match self.state {
            SessionState::Removed => None,
            _ => Some(self.transition(SessionState::Removed)),
        };
        (prev, frame_loop)
    }
}
