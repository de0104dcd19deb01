//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use uvcman_core::{FrameFormat, FrameType, Resolution};
use uvcman_session::CoordinatorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Devices the simulated driver reports
    #[serde(default, rename = "device")]
    pub devices: Vec<SimDeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Resolution used to open devices and when no preference applies
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    /// Prefer H.264 over MJPEG when opening
    #[serde(default = "default_true")]
    pub prefer_h264: bool,
    /// Frame loop period in milliseconds
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_width: default_width(),
            default_height: default_height(),
            prefer_h264: true,
            frame_interval_ms: default_frame_interval(),
        }
    }
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_frame_interval() -> u64 {
    16 // ~60 fps
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// USB vendor ids to accept; empty accepts every device
    #[serde(default)]
    pub allowed_vendors: Vec<u16>,
    /// Preferred capture resolution, used when the device supports it
    #[serde(default)]
    pub preferred_width: Option<u32>,
    #[serde(default)]
    pub preferred_height: Option<u32>,
}

impl PolicyConfig {
    pub fn preferred_resolution(&self) -> Option<Resolution> {
        match (self.preferred_width, self.preferred_height) {
            (Some(width), Some(height)) => Some(Resolution::new(width, height)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimDeviceConfig {
    /// Device name as the driver reports it
    pub id: String,
    pub vid: u16,
    pub pid: u16,
    /// Answer to the permission request
    #[serde(default = "default_true")]
    pub grant_permission: bool,
    #[serde(default)]
    pub formats: Vec<FrameFormat>,
}

impl Config {
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            default_resolution: Resolution::new(
                self.session.default_width,
                self.session.default_height,
            ),
            prefer_h264: self.session.prefer_h264,
            frame_interval: Duration::from_millis(self.session.frame_interval_ms.max(1)),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(
            path = %path.display(),
            devices = config.devices.len(),
            "Loaded configuration"
        );
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut mjpeg_720 = FrameFormat::new(1280, 720, 1.0, 30.0);
    mjpeg_720.frame_type = FrameType::Mjpeg;
    let mut h264_1080 = FrameFormat::new(1920, 1080, 1.0, 30.0);
    h264_1080.frame_type = FrameType::H264;

    let config = Config {
        session: SessionConfig::default(),
        policy: PolicyConfig {
            allowed_vendors: vec![1482],
            preferred_width: None,
            preferred_height: None,
        },
        devices: vec![SimDeviceConfig {
            id: "/dev/bus/usb/001/004".to_string(),
            vid: 1482,
            pid: 10002,
            grant_permission: true,
            formats: vec![h264_1080, mjpeg_720],
        }],
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("uvcd.toml")).unwrap();
        assert!(config.devices.is_empty());
        assert!(config.policy.allowed_vendors.is_empty());

        let coordinator = config.to_coordinator_config();
        assert_eq!(coordinator.default_resolution, Resolution::HD720);
        assert!(coordinator.prefer_h264);
        assert_eq!(coordinator.frame_interval, Duration::from_millis(16));
    }

    #[test]
    fn test_default_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uvcd.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.policy.allowed_vendors, vec![1482]);
        assert_eq!(config.devices.len(), 1);
        let device = &config.devices[0];
        assert_eq!(device.pid, 10002);
        assert_eq!(device.formats.len(), 2);
        assert_eq!(device.formats[0].frame_type, FrameType::H264);
    }

    #[test]
    fn test_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uvcd.toml");
        std::fs::write(
            &path,
            r#"
[session]
prefer_h264 = false
frame_interval_ms = 0

[policy]
preferred_width = 640
preferred_height = 480

[[device]]
id = "cam0"
vid = 1133
pid = 2085
grant_permission = false

[[device.formats]]
width = 640
height = 480
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.session.default_width, 1280);
        assert_eq!(config.policy.preferred_resolution(), Some(Resolution::VGA));

        let device = &config.devices[0];
        assert!(!device.grant_permission);
        assert_eq!(device.formats[0].max_fps, 0.0);
        assert_eq!(device.formats[0].frame_type, FrameType::Unknown);

        let coordinator = config.to_coordinator_config();
        assert!(!coordinator.prefer_h264);
        assert_eq!(coordinator.frame_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_half_preferred_resolution_ignored() {
        let policy = PolicyConfig {
            preferred_width: Some(640),
            ..Default::default()
        };
        assert_eq!(policy.preferred_resolution(), None);
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uvcd.toml");
        std::fs::write(&path, "[[device]]\nid = 3").unwrap();
        assert!(load_config(&path).is_err());
    }
}
