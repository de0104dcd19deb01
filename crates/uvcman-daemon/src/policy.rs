//! Application callbacks driven by the `[policy]` config section

use tracing::info;
use uvcman_core::{DeviceInfo, FormatCatalog, Resolution};
use uvcman_session::{
    AttachDecision, AttachPolicy, DetachHandler, PreviewHandler, ResolutionChoice,
    ResolutionPolicy, SessionCoordinator, SurfaceRef,
};

use crate::config::PolicyConfig;

/// Vendor allowlist plus an optional preferred resolution
pub struct ConfigPolicy {
    allowed_vendors: Vec<u16>,
    preferred: Option<Resolution>,
}

impl ConfigPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            allowed_vendors: config.allowed_vendors.clone(),
            preferred: config.preferred_resolution(),
        }
    }
}

impl AttachPolicy for ConfigPolicy {
    fn on_attach(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) -> AttachDecision {
        if self.allowed_vendors.is_empty()
            || self
                .allowed_vendors
                .iter()
                .any(|vid| info.is_known_vendor(*vid))
        {
            AttachDecision::Accept
        } else {
            info!(device = %info.id(), vid = info.vendor_id(), "Vendor not in allowlist");
            AttachDecision::Reject
        }
    }
}

impl ResolutionPolicy for ConfigPolicy {
    /// Preferred resolution when the device lists it, the default otherwise
    fn select_resolution(
        &self,
        _coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        catalog: &FormatCatalog,
    ) -> ResolutionChoice {
        match self.preferred {
            Some(preferred) if catalog.contains(preferred) => ResolutionChoice::Use(preferred),
            Some(preferred) => {
                info!(
                    device = %info.id(),
                    preferred = %preferred,
                    supported = %catalog,
                    "Preferred resolution unavailable, using default"
                );
                ResolutionChoice::Default
            }
            None => ResolutionChoice::Default,
        }
    }
}

impl DetachHandler for ConfigPolicy {
    fn on_detach(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) {
        info!(device = %info.id(), model = ?info.known_model(), "Camera removed");
    }
}

impl PreviewHandler for ConfigPolicy {
    fn on_preview_started(
        &self,
        coordinator: &SessionCoordinator,
        info: &DeviceInfo,
        surface: SurfaceRef,
    ) {
        let resolution = coordinator
            .stream_target(info.id().as_str())
            .map(|target| target.resolution.to_string())
            .unwrap_or_default();
        info!(device = %info.id(), surface = surface.0, resolution = %resolution, "Camera streaming");
    }

    fn on_preview_stopped(&self, _coordinator: &SessionCoordinator, info: &DeviceInfo) {
        info!(device = %info.id(), "Camera stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimSurfaces, SimulatedDriver};
    use std::sync::Arc;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;
    use uvcman_core::{DeviceId, FrameFormat};
    use uvcman_session::CoordinatorConfig;

    fn coordinator() -> SessionCoordinator {
        let (tx, _rx) = mpsc::unbounded_channel();
        SessionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(SimulatedDriver::new(Vec::new(), tx)),
            Arc::new(SimSurfaces::default()),
            Handle::current(),
        )
    }

    fn info(vid: u16) -> DeviceInfo {
        DeviceInfo::new(DeviceId::new("cam0").unwrap(), vid, 1)
    }

    #[tokio::test]
    async fn test_vendor_allowlist() {
        let c = coordinator();
        let open = ConfigPolicy::from_config(&PolicyConfig::default());
        assert_eq!(open.on_attach(&c, &info(9)), AttachDecision::Accept);

        let ricoh_only = ConfigPolicy::from_config(&PolicyConfig {
            allowed_vendors: vec![1482],
            ..Default::default()
        });
        assert_eq!(ricoh_only.on_attach(&c, &info(1482)), AttachDecision::Accept);
        assert_eq!(ricoh_only.on_attach(&c, &info(1133)), AttachDecision::Reject);
    }

    #[tokio::test]
    async fn test_preferred_resolution_only_when_listed() {
        let c = coordinator();
        let policy = ConfigPolicy::from_config(&PolicyConfig {
            preferred_width: Some(1920),
            preferred_height: Some(1080),
            ..Default::default()
        });

        let with_1080 = FormatCatalog::from_formats(vec![
            FrameFormat::new(1920, 1080, 1.0, 30.0),
            FrameFormat::new(1280, 720, 1.0, 30.0),
        ]);
        assert_eq!(
            policy.select_resolution(&c, &info(1482), &with_1080),
            ResolutionChoice::Use(Resolution::HD1080)
        );

        let without = FormatCatalog::from_formats(vec![FrameFormat::new(1280, 720, 1.0, 30.0)]);
        assert_eq!(
            policy.select_resolution(&c, &info(1482), &without),
            ResolutionChoice::Default
        );
    }
}
