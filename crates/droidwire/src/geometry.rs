//! Display geometry: size, density, orientation and touch sensor bounds

use crate::error::{DeviceError, Result};
use std::fmt;

/// Device rotation in 90 degree steps from upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
    PortraitReversed,
    LandscapeReversed,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Portrait,
        Orientation::Landscape,
        Orientation::PortraitReversed,
        Orientation::LandscapeReversed,
    ];

    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(Orientation::Portrait),
            1 => Ok(Orientation::Landscape),
            2 => Ok(Orientation::PortraitReversed),
            3 => Ok(Orientation::LandscapeReversed),
            other => Err(DeviceError::InvalidArgument(format!(
                "orientation must be 0..=3, got {}",
                other
            ))),
        }
    }

    /// Parse a rotation in degrees (0, 90, 180, 270)
    pub fn from_rotation(degrees: u32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "rotation must be a multiple of 90, got {}",
                degrees
            )));
        }
        Self::from_index((degrees / 90) % 4)
    }

    pub fn index(self) -> u32 {
        match self {
            Orientation::Portrait => 0,
            Orientation::Landscape => 1,
            Orientation::PortraitReversed => 2,
            Orientation::LandscapeReversed => 3,
        }
    }

    pub fn rotation(self) -> u32 {
        self.index() * 90
    }

    /// Orientations 1 and 3
    pub fn is_sideways(self) -> bool {
        matches!(self, Orientation::Landscape | Orientation::LandscapeReversed)
    }
}

impl TryFrom<u32> for Orientation {
    type Error = DeviceError;

    fn try_from(value: u32) -> Result<Self> {
        Self::from_index(value)
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Resolved display record for one device
///
/// Always stored portrait-relative (`height >= width`); landscape is carried
/// by `orientation`. `max_x`/`max_y` are the touch digitizer's own maxima and
/// come from a different probe than the pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceGeometry {
    pub width: u32,
    pub height: u32,
    /// Scale factor relative to 160 dpi, when known
    pub density: Option<f64>,
    pub orientation: Orientation,
    pub max_x: Option<u32>,
    pub max_y: Option<u32>,
}

impl DeviceGeometry {
    /// Portrait-normalised geometry with upright orientation and no sensor bounds
    pub fn new(width: u32, height: u32, density: Option<f64>) -> Self {
        let (width, height) = if width > height {
            (height, width)
        } else {
            (width, height)
        };
        Self {
            width,
            height,
            density,
            orientation: Orientation::Portrait,
            max_x: None,
            max_y: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_sensor_bounds(mut self, max_x: Option<u32>, max_y: Option<u32>) -> Self {
        self.max_x = max_x;
        self.max_y = max_y;
        self
    }

    /// Rotation in degrees, always derived from `orientation`
    pub fn rotation(&self) -> u32 {
        self.orientation.rotation()
    }

    /// Size as currently seen on screen (swapped when sideways)
    pub fn current_resolution(&self) -> (u32, u32) {
        if self.orientation.is_sideways() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_roundtrip_index() {
        for o in Orientation::ALL {
            assert_eq!(Orientation::from_index(o.index()).unwrap(), o);
            assert_eq!(Orientation::from_rotation(o.rotation()).unwrap(), o);
        }
        assert!(Orientation::from_index(4).is_err());
        assert!(Orientation::from_rotation(45).is_err());
    }

    #[test]
    fn test_new_normalizes_to_portrait() {
        let g = DeviceGeometry::new(1920, 1080, Some(3.0));
        assert_eq!((g.width, g.height), (1080, 1920));
        assert_eq!(g.rotation(), 0);
    }

    #[test]
    fn test_current_resolution_sideways() {
        let g = DeviceGeometry::new(1080, 1920, None).with_orientation(Orientation::Landscape);
        assert_eq!(g.current_resolution(), (1920, 1080));
        assert_eq!(g.rotation(), 90);
        let g = g.with_orientation(Orientation::PortraitReversed);
        assert_eq!(g.current_resolution(), (1080, 1920));
    }
}
