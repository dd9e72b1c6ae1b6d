//! Rotating points between the upright frame and the device's native frame

use crate::geometry::Orientation;

/// Upright screen point to the device's native (portrait) frame
///
/// `(w, h)` is the portrait-normalised display size.
pub fn up_2_ori((x, y): (f64, f64), (w, h): (f64, f64), orientation: Orientation) -> (f64, f64) {
    match orientation {
        Orientation::Portrait => (x, y),
        Orientation::Landscape => (w - y, x),
        Orientation::PortraitReversed => (w - x, h - y),
        Orientation::LandscapeReversed => (y, h - x),
    }
}

/// Inverse of [`up_2_ori`]
pub fn ori_2_up((x, y): (f64, f64), (w, h): (f64, f64), orientation: Orientation) -> (f64, f64) {
    match orientation {
        Orientation::Portrait => (x, y),
        Orientation::Landscape => (y, w - x),
        Orientation::PortraitReversed => (w - x, h - y),
        Orientation::LandscapeReversed => (h - y, x),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_orientations() {
        let size = (1080.0, 1920.0);
        let points = [(0.0, 0.0), (100.0, 200.0), (1079.0, 1919.0), (540.5, 33.25)];
        for o in Orientation::ALL {
            for p in points {
                assert_eq!(ori_2_up(up_2_ori(p, size, o), size, o), p, "orientation {}", o);
                assert_eq!(up_2_ori(ori_2_up(p, size, o), size, o), p, "orientation {}", o);
            }
        }
    }

    #[test]
    fn test_up_2_ori_values() {
        let size = (1080.0, 1920.0);
        let p = (100.0, 200.0);
        assert_eq!(up_2_ori(p, size, Orientation::Portrait), (100.0, 200.0));
        assert_eq!(up_2_ori(p, size, Orientation::Landscape), (880.0, 100.0));
        assert_eq!(up_2_ori(p, size, Orientation::PortraitReversed), (980.0, 1720.0));
        assert_eq!(up_2_ori(p, size, Orientation::LandscapeReversed), (200.0, 1820.0));
    }
}
