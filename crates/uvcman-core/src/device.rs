//! Device identity types for attached UVC hardware

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use tracing::trace;

use crate::error::{InvalidDeviceId, ParseError};

/// USB vendor id assigned to Ricoh
pub const VENDOR_RICOH: u16 = 1482;
/// THETA S product id (live streaming mode)
pub const PRODUCT_THETA_S: u16 = 10001;
/// THETA V product id (live streaming mode)
pub const PRODUCT_THETA_V: u16 = 10002;

/// Unique identifier for a device, as reported by the driver on attach
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a DeviceId from a driver device name, rejecting blank names
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidDeviceId> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidDeviceId);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Products with dedicated handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownModel {
    ThetaS,
    ThetaV,
}

/// Wire shape of the driver's device info payload, e.g. `{"vid":1482,"pid":10002}`
#[derive(Deserialize)]
struct RawDeviceInfo {
    vid: u16,
    pid: u16,
}

/// Identity of one attached device.
///
/// Two records describe the same device when their ids match, whatever the
/// vendor/product fields say.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    id: DeviceId,
    vendor_id: u16,
    product_id: u16,
}

impl DeviceInfo {
    pub fn new(id: DeviceId, vendor_id: u16, product_id: u16) -> Self {
        Self {
            id,
            vendor_id,
            product_id,
        }
    }

    /// Parse the JSON info payload the driver reports for `id`
    pub fn parse(id: DeviceId, raw: &str) -> Result<Self, ParseError> {
        let parsed: RawDeviceInfo =
            serde_json::from_str(raw).map_err(|source| ParseError::DeviceInfo {
                device: id.to_string(),
                source,
            })?;

        trace!(device = %id, vid = parsed.vid, pid = parsed.pid, "Parsed device info");

        Ok(Self::new(id, parsed.vid, parsed.pid))
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// Whether this device was made by vendor `code`
    pub fn is_known_vendor(&self, code: u16) -> bool {
        self.vendor_id == code
    }

    pub fn is_ricoh(&self) -> bool {
        self.is_known_vendor(VENDOR_RICOH)
    }

    pub fn is_theta_s(&self) -> bool {
        self.is_ricoh() && self.product_id == PRODUCT_THETA_S
    }

    /// THETA V in live streaming mode. The same camera enumerating with
    /// pid 872 is not a UVC stream and does not match.
    pub fn is_theta_v(&self) -> bool {
        self.is_ricoh() && self.product_id == PRODUCT_THETA_V
    }

    pub fn known_model(&self) -> Option<KnownModel> {
        if self.is_theta_s() {
            Some(KnownModel::ThetaS)
        } else if self.is_theta_v() {
            Some(KnownModel::ThetaV)
        } else {
            None
        }
    }
}

impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceInfo {}

impl Hash for DeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(vid={},pid={})",
            self.id, self.vendor_id, self.product_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> DeviceId {
        DeviceId::new(name).unwrap()
    }

    #[test]
    fn test_device_id_rejects_blank() {
        assert_eq!(DeviceId::new(""), Err(InvalidDeviceId));
        assert_eq!(DeviceId::new("   "), Err(InvalidDeviceId));
        assert_eq!(id("/dev/bus/usb/001/002").as_str(), "/dev/bus/usb/001/002");
    }

    #[test]
    fn test_device_id_deserialize_rejects_blank() {
        let ok: DeviceId = serde_json::from_str("\"dev1\"").unwrap();
        assert_eq!(ok.as_str(), "dev1");
        assert!(serde_json::from_str::<DeviceId>("\"\"").is_err());
    }

    #[test]
    fn test_parse_captures_vendor_and_product() {
        // Product id must land in its own field, not overwrite the vendor id
        let info = DeviceInfo::parse(id("dev1"), r#"{"vid":1482,"pid":10002}"#).unwrap();
        assert_eq!(info.vendor_id(), 1482);
        assert_eq!(info.product_id(), 10002);
        assert!(info.is_theta_v());
        assert!(!info.is_theta_s());
        assert_eq!(info.known_model(), Some(KnownModel::ThetaV));
    }

    #[test]
    fn test_parse_theta_v_still_image_mode_is_not_theta_v() {
        let info = DeviceInfo::parse(id("dev1"), r#"{"vid":1482,"pid":872}"#).unwrap();
        assert!(info.is_ricoh());
        assert!(!info.is_theta_v());
        assert_eq!(info.known_model(), None);
    }

    #[test]
    fn test_parse_missing_field_fails() {
        let err = DeviceInfo::parse(id("dev1"), r#"{"vid":1482}"#).unwrap_err();
        assert!(matches!(err, ParseError::DeviceInfo { ref device, .. } if device == "dev1"));
    }

    #[test]
    fn test_parse_malformed_fails() {
        assert!(DeviceInfo::parse(id("dev1"), "not json").is_err());
        assert!(DeviceInfo::parse(id("dev1"), r#"{"vid":70000,"pid":1}"#).is_err());
        assert!(DeviceInfo::parse(id("dev1"), r#"{"vid":"1482","pid":1}"#).is_err());
    }

    #[test]
    fn test_identity_is_by_id() {
        let a = DeviceInfo::new(id("dev1"), 1, 2);
        let b = DeviceInfo::new(id("dev1"), 3, 4);
        let c = DeviceInfo::new(id("dev2"), 1, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let info = DeviceInfo::new(id("dev1"), 1482, 10001);
        assert_eq!(info.to_string(), "dev1(vid=1482,pid=10001)");
        assert!(info.is_theta_s());
    }
}
