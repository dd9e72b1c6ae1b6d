//! Geometry and state probes over `adb shell`
//!
//! Every probe comes in two halves: a pure parser over command output and an
//! async cascade that tries commands from newest to oldest Android release.

use crate::adb::Adb;
use crate::error::{DeviceError, Result};
use crate::geometry::{DeviceGeometry, Orientation};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

/// Reference density `ro.sf.lcd_density` is divided by
pub const BASE_DPI: f64 = 160.0;

lazy_static! {
    static ref WM_SIZE_RE: Regex = Regex::new(r"Physical size: (\d+)x(\d+)").unwrap();
    static ref WM_DENSITY_RE: Regex = Regex::new(r"Physical density: (\d+)").unwrap();
    static ref PHYSICAL_DISPLAY_RE: Regex =
        Regex::new(r"PhysicalDisplayInfo\{(\d+) x (\d+), .*, density ([\d.]+)").unwrap();
    static ref UNRESTRICTED_SCREEN_RE: Regex =
        Regex::new(r"^\s*mUnrestrictedScreen=\((\d+),(\d+)\) (\d+)x(\d+)").unwrap();
    static ref DISPLAY_WH_RE: Regex =
        Regex::new(r"^\s*DisplayWidth=(\d+) *DisplayHeight=(\d+)").unwrap();
    static ref SURFACE_FLINGER_ORIENTATION_RE: Regex = Regex::new(r"orientation=(\d+)").unwrap();
    static ref INPUT_ORIENTATION_RE: Regex = Regex::new(r"SurfaceOrientation:\s+(\d+)").unwrap();
    static ref ABS_MAX_RE: Regex = Regex::new(r"max (\d+)").unwrap();
    static ref SCREEN_ON_RE: Regex = Regex::new(r"mScreenOnFully=(true|false)").unwrap();
    static ref LOCKSCREEN_RE: Regex = Regex::new(r"mShowingLockscreen=(true|false)").unwrap();
    static ref TOP_ACTIVITY_RE: Regex =
        Regex::new(r"^\s*ACTIVITY ([A-Za-z0-9_.]+)/([A-Za-z0-9_.$]+) \w+ pid=(\d+)").unwrap();
}

/// Raw size (not yet portrait-normalised) and density factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDisplay {
    pub width: u32,
    pub height: u32,
    pub density: Option<f64>,
}

/// `wm size; wm density` (API 18+)
pub fn parse_wm_size(output: &str) -> Option<RawDisplay> {
    let size = WM_SIZE_RE.captures(output)?;
    let density = WM_DENSITY_RE
        .captures(output)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|dpi| dpi / BASE_DPI);
    Some(RawDisplay {
        width: size[1].parse().ok()?,
        height: size[2].parse().ok()?,
        density,
    })
}

/// `dumpsys display`; density there is already a factor
pub fn parse_physical_display_info(output: &str) -> Option<RawDisplay> {
    output.lines().find_map(|line| {
        let caps = PHYSICAL_DISPLAY_RE.captures(line)?;
        Some(RawDisplay {
            width: caps[1].parse().ok()?,
            height: caps[2].parse().ok()?,
            density: caps[3].parse().ok(),
        })
    })
}

/// `dumpsys window`, for old releases; carries no density
pub fn parse_window_dump(output: &str) -> Option<(u32, u32)> {
    output.lines().find_map(|line| {
        if let Some(caps) = UNRESTRICTED_SCREEN_RE.captures(line) {
            return Some((caps[3].parse().ok()?, caps[4].parse().ok()?));
        }
        let caps = DISPLAY_WH_RE.captures(line)?;
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    })
}

/// An `lcd_density` property value as a factor of [`BASE_DPI`]
pub fn parse_density_prop(value: &str) -> Option<f64> {
    let dpi: f64 = value.trim().parse().ok()?;
    (dpi > 0.0).then(|| dpi / BASE_DPI)
}

/// `dumpsys SurfaceFlinger`
pub fn parse_surface_flinger_orientation(output: &str) -> Option<Orientation> {
    let caps = SURFACE_FLINGER_ORIENTATION_RE.captures(output)?;
    Orientation::from_index(caps[1].parse().ok()?).ok()
}

/// `dumpsys input`
pub fn parse_input_orientation(output: &str) -> Option<Orientation> {
    let caps = INPUT_ORIENTATION_RE.captures(output)?;
    Orientation::from_index(caps[1].parse().ok()?).ok()
}

/// Maxima of ABS_MT_POSITION_X (0035) and ABS_MT_POSITION_Y (0036) from `getevent -p`
///
/// With several touch devices listed, the last one wins.
pub fn parse_getevent_bounds(output: &str) -> (Option<u32>, Option<u32>) {
    let mut max_x = None;
    let mut max_y = None;
    for line in output.lines() {
        let value = || {
            ABS_MAX_RE
                .captures(line)
                .and_then(|c| c[1].parse::<u32>().ok())
        };
        if line.contains("0035") {
            if let Some(v) = value() {
                max_x = Some(v);
            }
        }
        if line.contains("0036") {
            if let Some(v) = value() {
                max_y = Some(v);
            }
        }
    }
    (max_x, max_y)
}

/// `mScreenOnFully` from `dumpsys window policy`
pub fn parse_screen_on(output: &str) -> Option<bool> {
    SCREEN_ON_RE.captures(output).map(|c| &c[1] == "true")
}

/// `mShowingLockscreen` from `dumpsys window policy`
pub fn parse_lockscreen(output: &str) -> Option<bool> {
    LOCKSCREEN_RE.captures(output).map(|c| &c[1] == "true")
}

/// Foreground activity as reported by `dumpsys activity top`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopActivity {
    pub package: String,
    pub activity: String,
    pub pid: u32,
}

impl TopActivity {
    /// `package/activity`
    pub fn component(&self) -> String {
        format!("{}/{}", self.package, self.activity)
    }
}

pub fn parse_top_activity(output: &str) -> Option<TopActivity> {
    output.lines().find_map(|line| {
        let caps = TOP_ACTIVITY_RE.captures(line.trim_end_matches('\r'))?;
        Some(TopActivity {
            package: caps[1].to_string(),
            activity: caps[2].to_string(),
            pid: caps[3].parse().ok()?,
        })
    })
}

/// Run one probe command, treating a failed invocation as "no answer"
async fn shell_or_empty(adb: &Adb, cmd: &str) -> String {
    match adb.shell(cmd).await {
        Ok(out) => out,
        Err(e) => {
            debug!("probe `{}` failed: {}", cmd, e);
            String::new()
        }
    }
}

/// Density from `ro.sf.lcd_density`, then `qemu.sf.lcd_density`
pub async fn density_from_props(adb: &Adb) -> Option<f64> {
    for key in ["ro.sf.lcd_density", "qemu.sf.lcd_density"] {
        if let Ok(value) = adb.getprop(key).await {
            if let Some(density) = parse_density_prop(&value) {
                return Some(density);
            }
        }
    }
    None
}

/// Size and density, first probe that parses wins; normalised to portrait
pub async fn discover_display(adb: &Adb) -> Result<DeviceGeometry> {
    let raw = if let Some(raw) = parse_wm_size(&shell_or_empty(adb, "wm size; wm density").await) {
        raw
    } else if let Some(raw) = parse_physical_display_info(&shell_or_empty(adb, "dumpsys display").await) {
        raw
    } else if let Some((width, height)) = parse_window_dump(&shell_or_empty(adb, "dumpsys window").await) {
        RawDisplay {
            width,
            height,
            density: None,
        }
    } else {
        return Err(DeviceError::GeometryUnavailable(
            "no display size from wm, dumpsys display or dumpsys window".to_string(),
        ));
    };

    let density = match raw.density {
        Some(d) => Some(d),
        None => density_from_props(adb).await,
    };
    if density.is_none() {
        warn!("display density unknown");
    }
    Ok(DeviceGeometry::new(raw.width, raw.height, density))
}

/// Current orientation from SurfaceFlinger, then the input service, then the aspect ratio
pub async fn discover_orientation(adb: &Adb, width: u32, height: u32) -> Orientation {
    if let Some(o) = parse_surface_flinger_orientation(&shell_or_empty(adb, "dumpsys SurfaceFlinger").await) {
        return o;
    }
    if let Some(o) = parse_input_orientation(&shell_or_empty(adb, "dumpsys input").await) {
        return o;
    }
    debug!("orientation unknown, guessing from {}x{}", width, height);
    if height > width {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    }
}

/// Touch sensor maxima from `getevent -p`
pub async fn discover_sensor_bounds(adb: &Adb) -> (Option<u32>, Option<u32>) {
    parse_getevent_bounds(&shell_or_empty(adb, "getevent -p").await)
}

/// Full geometry: size, density, orientation and sensor bounds
pub async fn discover_geometry(adb: &Adb) -> Result<DeviceGeometry> {
    let display = discover_display(adb).await?;
    let orientation = discover_orientation(adb, display.width, display.height).await;
    let (max_x, max_y) = discover_sensor_bounds(adb).await;
    Ok(display
        .with_orientation(orientation)
        .with_sensor_bounds(max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wm_size_with_density() {
        let out = "Physical size: 1080x1920\nPhysical density: 480\n";
        assert_eq!(
            parse_wm_size(out),
            Some(RawDisplay {
                width: 1080,
                height: 1920,
                density: Some(3.0)
            })
        );
        let out = "Physical size: 1440x2560\nOverride size: 1080x1920\n";
        assert_eq!(parse_wm_size(out).map(|r| (r.width, r.density)), Some((1440, None)));
        assert_eq!(parse_wm_size("/system/bin/sh: wm: not found"), None);
    }

    #[test]
    fn test_parse_physical_display_info() {
        let out = "DISPLAY MANAGER (dumpsys display)\n  mPhysicalDisplayInfo=PhysicalDisplayInfo{720 x 1280, 60.0 fps, density 2.0, 320.0 x 320.0 dpi, secure true}\n";
        assert_eq!(
            parse_physical_display_info(out),
            Some(RawDisplay {
                width: 720,
                height: 1280,
                density: Some(2.0)
            })
        );
    }

    #[test]
    fn test_parse_window_dump() {
        let out = "  mSystem=(0,0) 480x800\n    mUnrestrictedScreen=(0,0) 480x800\n";
        assert_eq!(parse_window_dump(out), Some((480, 800)));
        let old = "  DisplayWidth=320 DisplayHeight=480\n";
        assert_eq!(parse_window_dump(old), Some((320, 480)));
        assert_eq!(parse_window_dump("nothing"), None);
    }

    #[test]
    fn test_parse_density_prop() {
        assert_eq!(parse_density_prop("320\r\n"), Some(2.0));
        assert_eq!(parse_density_prop(""), None);
        assert_eq!(parse_density_prop("0"), None);
    }

    #[test]
    fn test_parse_orientations() {
        let sf = "Display 0 HWC layers:\n  orientation=3, flags=0\n";
        assert_eq!(parse_surface_flinger_orientation(sf), Some(Orientation::LandscapeReversed));
        assert_eq!(parse_surface_flinger_orientation("orientation=7"), None);
        let input = "    Viewport: displayId=0\n    SurfaceOrientation: 1\n";
        assert_eq!(parse_input_orientation(input), Some(Orientation::Landscape));
    }

    #[test]
    fn test_parse_getevent_bounds() {
        let out = "add device 1: /dev/input/event1\n  name:     \"synaptics_dsx\"\n  events:\n\
                   ABS (0003): 002f  : value 0, min 0, max 9, fuzz 0, flat 0, resolution 0\n\
                   0035  : value 0, min 0, max 1079, fuzz 0, flat 0, resolution 0\n\
                   0036  : value 0, min 0, max 1919, fuzz 0, flat 0, resolution 0\n";
        assert_eq!(parse_getevent_bounds(out), (Some(1079), Some(1919)));
        assert_eq!(parse_getevent_bounds("add device 2: /dev/input/event0\n"), (None, None));
    }

    #[test]
    fn test_parse_policy_flags() {
        let out = "    mScreenOnEarly=true mScreenOnFully=false\n    mShowingLockscreen=true mShowingDream=false\n";
        assert_eq!(parse_screen_on(out), Some(false));
        assert_eq!(parse_lockscreen(out), Some(true));
        assert_eq!(parse_screen_on(""), None);
    }

    #[test]
    fn test_parse_top_activity() {
        let out = "TASK com.android.settings id=12\r\n  ACTIVITY com.android.settings/.Settings 41c3d0f0 pid=2218\r\n";
        let top = parse_top_activity(out).unwrap();
        assert_eq!(top.component(), "com.android.settings/.Settings");
        assert_eq!(top.pid, 2218);
        assert_eq!(parse_top_activity("TASK null\n"), None);
    }
}

#[cfg(all(test, unix))]
mod adb_tests {
    use super::*;
    use crate::testutil::FakeAdb;

    fn adb_for(fake: &FakeAdb) -> Adb {
        Adb::new(Some("emulator-5554".to_string()), &fake.config())
    }

    #[tokio::test]
    async fn test_cascade_falls_through_to_window_dump() {
        let fake = FakeAdb::new(&[
            (r#"*"shell wm size"*"#, "echo 'wm: not found'; exit 127"),
            (r#"*"shell dumpsys window"*"#, "echo '  mUnrestrictedScreen=(0,0) 800x480'"),
            (r#"*"getprop ro.sf.lcd_density"*"#, "echo 240"),
        ]);
        let geometry = discover_display(&adb_for(&fake)).await.unwrap();
        assert_eq!((geometry.width, geometry.height), (480, 800));
        assert_eq!(geometry.density, Some(1.5));
        assert_eq!(fake.count("shell dumpsys display"), 1);
    }

    #[tokio::test]
    async fn test_no_probe_matches() {
        let fake = FakeAdb::new(&[]);
        assert!(matches!(
            discover_display(&adb_for(&fake)).await,
            Err(DeviceError::GeometryUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_orientation_cascade() {
        let fake = FakeAdb::new(&[(r#"*"dumpsys input"*"#, "echo '    SurfaceOrientation: 2'")]);
        let adb = adb_for(&fake);
        assert_eq!(
            discover_orientation(&adb, 1080, 1920).await,
            Orientation::PortraitReversed
        );

        let fake = FakeAdb::new(&[]);
        let adb = adb_for(&fake);
        assert_eq!(discover_orientation(&adb, 1080, 1920).await, Orientation::Portrait);
        assert_eq!(discover_orientation(&adb, 1920, 1080).await, Orientation::Landscape);
    }

    #[tokio::test]
    async fn test_discover_geometry_normalizes_and_probes_sensor() {
        let fake = FakeAdb::new(&[
            (
                r#"*"shell wm size"*"#,
                r"printf 'Physical size: 1920x1080\r\nPhysical density: 320\r\n'",
            ),
            (r#"*"dumpsys SurfaceFlinger"*"#, "echo 'orientation=1, flags=0'"),
            (
                r#"*"getevent -p"*"#,
                r"printf '    0035  : value 0, min 0, max 4095\n    0036  : value 0, min 0, max 4095\n'",
            ),
        ]);
        let g = discover_geometry(&adb_for(&fake)).await.unwrap();
        assert_eq!((g.width, g.height), (1080, 1920));
        assert_eq!(g.density, Some(2.0));
        assert_eq!(g.orientation, Orientation::Landscape);
        assert_eq!(g.rotation(), 90);
        assert_eq!((g.max_x, g.max_y), (Some(4095), Some(4095)));
    }
}
