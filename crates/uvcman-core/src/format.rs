//! Format catalog: the resolutions and frame rates a device advertises

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use tracing::debug;

use crate::error::ParseError;

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const VGA: Resolution = Resolution::new(640, 480);
    pub const HD720: Resolution = Resolution::new(1280, 720);
    pub const HD1080: Resolution = Resolution::new(1920, 1080);
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Frame encoding of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Mjpeg,
    Yuyv,
    H264,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One supported (width, height, frame rate range) combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    /// Lowest supported rate; 0.0 when the device did not report rates
    #[serde(default)]
    pub min_fps: f32,
    /// Highest supported rate; 0.0 when the device did not report rates
    #[serde(default)]
    pub max_fps: f32,
    #[serde(default, rename = "type")]
    pub frame_type: FrameType,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, min_fps: f32, max_fps: f32) -> Self {
        Self {
            width,
            height,
            min_fps,
            max_fps,
            frame_type: FrameType::Unknown,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn has_rate_info(&self) -> bool {
        self.max_fps > 0.0
    }

    /// Whether this entry's rate range overlaps `rates`.
    /// Entries without rate information match any range.
    pub fn supports_rates(&self, rates: &RangeInclusive<f32>) -> bool {
        if !self.has_rate_info() {
            return true;
        }
        self.min_fps <= *rates.end() && self.max_fps >= *rates.start()
    }

    fn validate(&self, index: usize) -> Result<(), ParseError> {
        let reason = if self.width == 0 || self.height == 0 {
            Some(format!("zero dimension {}x{}", self.width, self.height))
        } else if self.min_fps < 0.0 || self.max_fps < 0.0 {
            Some("negative frame rate".to_string())
        } else if self.min_fps > self.max_fps {
            Some(format!(
                "min_fps {} exceeds max_fps {}",
                self.min_fps, self.max_fps
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ParseError::InvalidEntry { index, reason }),
            None => Ok(()),
        }
    }
}

/// Ordered list of the formats a single device supports.
///
/// Serializes to the same `{"formats":[...]}` shape [`FormatCatalog::parse`] reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatCatalog {
    formats: Vec<FrameFormat>,
}

impl FormatCatalog {
    /// Parse a driver capability listing.
    ///
    /// The `formats` array is required but may be empty; every entry must have
    /// non-zero dimensions and a sane rate range.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let catalog: FormatCatalog = serde_json::from_str(raw)?;

        for (index, format) in catalog.formats.iter().enumerate() {
            format.validate(index)?;
        }

        debug!(entries = catalog.formats.len(), "Parsed format catalog");
        Ok(catalog)
    }

    pub fn from_formats(formats: Vec<FrameFormat>) -> Self {
        Self { formats }
    }

    /// Find the first entry with exactly `width` x `height`, optionally
    /// restricted to entries whose rates overlap `rates`
    pub fn find(
        &self,
        width: u32,
        height: u32,
        rates: Option<RangeInclusive<f32>>,
    ) -> Option<&FrameFormat> {
        self.formats.iter().find(|f| {
            f.width == width
                && f.height == height
                && rates.as_ref().map_or(true, |r| f.supports_rates(r))
        })
    }

    pub fn contains(&self, resolution: Resolution) -> bool {
        self.find(resolution.width, resolution.height, None).is_some()
    }

    /// Distinct resolutions in catalog order
    pub fn resolutions(&self) -> Vec<Resolution> {
        let mut seen = Vec::new();
        for format in &self.formats {
            let res = format.resolution();
            if !seen.contains(&res) {
                seen.push(res);
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameFormat> {
        self.formats.iter()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl fmt::Display for FormatCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list: Vec<String> = self.resolutions().iter().map(|r| r.to_string()).collect();
        write!(f, "[{}]", list.join(", "))
    }
}
