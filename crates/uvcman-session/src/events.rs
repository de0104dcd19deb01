//! Event types flowing into and out of the coordinator

use serde::{Deserialize, Serialize};
use uvcman_core::{DeviceId, DeviceInfo};

use crate::session::SessionState;

/// Notification from the driver, keyed by the raw device name it reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    Attach { device: String },
    Detach { device: String },
    PermissionResult { device: String, granted: bool },
    /// Device opened at the driver level
    Connected { device: String },
    /// Device closed at the driver level; may arrive without a close request
    Disconnected { device: String },
    /// Device can accept a stream target
    Ready { device: String },
    StreamStarted { device: String },
    StreamStopped { device: String },
    Status { device: String, payload: String },
    Button { device: String, payload: String },
}

impl DriverEvent {
    pub fn device(&self) -> &str {
        match self {
            DriverEvent::Attach { device }
            | DriverEvent::Detach { device }
            | DriverEvent::PermissionResult { device, .. }
            | DriverEvent::Connected { device }
            | DriverEvent::Disconnected { device }
            | DriverEvent::Ready { device }
            | DriverEvent::StreamStarted { device }
            | DriverEvent::StreamStopped { device }
            | DriverEvent::Status { device, .. }
            | DriverEvent::Button { device, .. } => device,
        }
    }
}

/// Session change broadcast to subscribers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// New device tracked
    SessionCreated(DeviceInfo),
    /// State transition
    StateChanged {
        device: DeviceId,
        from: SessionState,
        to: SessionState,
    },
    /// Device dropped from the registry
    SessionRemoved(DeviceId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_event_json_shape() {
        let event: DriverEvent =
            serde_json::from_str(r#"{"event":"permission_result","device":"dev1","granted":true}"#)
                .unwrap();
        assert_eq!(
            event,
            DriverEvent::PermissionResult {
                device: "dev1".to_string(),
                granted: true
            }
        );
        assert_eq!(event.device(), "dev1");
    }
}
