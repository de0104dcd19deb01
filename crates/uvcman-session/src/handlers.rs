//! Application lifecycle callbacks
//!
//! Each capability is its own trait. Slots that the application leaves alone
//! are filled with [`DefaultHandlers`], so the coordinator never has to check
//! whether a handler exists.

use std::sync::Arc;
use uvcman_core::{DeviceInfo, FormatCatalog, Resolution};

use crate::coordinator::SessionCoordinator;
use crate::driver::SurfaceRef;

/// Whether an attached device should be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachDecision {
    Accept,
    Reject,
}

/// Resolution picked by a [`ResolutionPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChoice {
    /// Use the coordinator's configured default resolution
    Default,
    Use(Resolution),
}

pub trait AttachPolicy: Send + Sync {
    fn on_attach(&self, coordinator: &SessionCoordinator, info: &DeviceInfo) -> AttachDecision;
}

pub trait DetachHandler: Send + Sync {
    fn on_detach(&self, coordinator: &SessionCoordinator, info: &DeviceInfo);
}

/// Chooses the capture resolution. The choice is still validated against the
/// catalog; an unsupported pick fails the preview instead of falling back.
pub trait ResolutionPolicy: Send + Sync {
    fn select_resolution(
        &self,
        coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        catalog: &FormatCatalog,
    ) -> ResolutionChoice;
}

pub trait PreviewHandler: Send + Sync {
    fn on_preview_started(
        &self,
        coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        surface: SurfaceRef,
    );

    fn on_preview_stopped(&self, coordinator: &SessionCoordinator, info: &DeviceInfo);
}

/// Behavior used when the application registers nothing: accept every
/// device, use the default resolution, ignore notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandlers;

impl AttachPolicy for DefaultHandlers {
    fn on_attach(&self, _coordinator: &SessionCoordinator, _info: &DeviceInfo) -> AttachDecision {
        AttachDecision::Accept
    }
}

impl DetachHandler for DefaultHandlers {
    fn on_detach(&self, _coordinator: &SessionCoordinator, _info: &DeviceInfo) {}
}

impl ResolutionPolicy for DefaultHandlers {
    fn select_resolution(
        &self,
        _coordinator: &SessionCoordinator,
        _info: &DeviceInfo,
        _catalog: &FormatCatalog,
    ) -> ResolutionChoice {
        ResolutionChoice::Default
    }
}

impl PreviewHandler for DefaultHandlers {
    fn on_preview_started(
        &self,
        _coordinator: &SessionCoordinator,
        _info: &DeviceInfo,
        _surface: SurfaceRef,
    ) {
    }

    fn on_preview_stopped(&self, _coordinator: &SessionCoordinator, _info: &DeviceInfo) {}
}

/// The full set of registered callbacks
#[derive(Clone)]
pub struct Handlers {
    pub attach: Arc<dyn AttachPolicy>,
    pub detach: Arc<dyn DetachHandler>,
    pub resolution: Arc<dyn ResolutionPolicy>,
    pub preview: Arc<dyn PreviewHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            attach: Arc::new(DefaultHandlers),
            detach: Arc::new(DefaultHandlers),
            resolution: Arc::new(DefaultHandlers),
            preview: Arc::new(DefaultHandlers),
        }
    }
}
