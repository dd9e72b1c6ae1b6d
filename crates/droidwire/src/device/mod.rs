//! Device facade tying the bridge, minicap and minitouch together

mod probe;
mod transform;

pub use probe::{
    density_from_props, discover_display, discover_geometry, discover_orientation,
    discover_sensor_bounds, parse_density_prop, parse_getevent_bounds, parse_input_orientation,
    parse_lockscreen, parse_physical_display_info, parse_screen_on,
    parse_surface_flinger_orientation, parse_top_activity, parse_window_dump, parse_wm_size,
    RawDisplay, TopActivity, BASE_DPI,
};
pub use transform::{ori_2_up, up_2_ori};

use crate::adb::{first_ready_device, list_devices, Adb};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::geometry::{DeviceGeometry, Orientation};
use crate::retry::RetryPolicy;
use crate::stf::{DisplayInfo, Minicap, Minitouch, TouchCommand};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Last SDK level whose minicap only captures portrait frames
const PORTRAIT_ONLY_CAPTURE_SDK: u32 = 16;

/// Rotate a portrait-only capture back to the screen's current orientation
///
/// Only applies to SDK <= 16, where minicap ignores rotation, and only when
/// the frame is still portrait-shaped.
pub fn orient_frame(frame: DynamicImage, orientation: Orientation, sdk_version: u32) -> DynamicImage {
    if sdk_version > PORTRAIT_ONLY_CAPTURE_SDK || frame.width() >= frame.height() {
        return frame;
    }
    // counter-clockwise by orientation * 90 degrees
    match orientation {
        Orientation::Portrait => frame,
        Orientation::Landscape => frame.rotate270(),
        Orientation::PortraitReversed => frame.rotate180(),
        Orientation::LandscapeReversed => frame.rotate90(),
    }
}

/// Minitouch server and client, as on first connect
async fn attach_minitouch(minitouch: &mut Minitouch, backend: bool) -> Result<()> {
    if minitouch.setup_server(None, None).await?.is_none() {
        warn!("minitouch setup failed, attaching to whatever serves the socket");
    }
    if backend {
        minitouch.setup_client_backend().await
    } else {
        minitouch.setup_client().await
    }
}

/// One Android device
///
/// Owns the adb bridge and, when enabled, the minicap and minitouch clients.
/// Points passed in are in the upright screen frame and are rotated into
/// the device's native frame before injection.
pub struct Android {
    serial: String,
    config: DeviceConfig,
    adb: Arc<Adb>,
    geometry: DeviceGeometry,
    sdk_version: u32,
    minicap: Option<Minicap>,
    minitouch: Option<Minitouch>,
    retry: RetryPolicy,
}

impl Android {
    /// Connect to `serial`, or to the first ready device when `None`
    ///
    /// Probes geometry, then installs and starts the enabled streaming clients.
    pub async fn connect(serial: Option<&str>, config: DeviceConfig) -> Result<Self> {
        let serial = match serial {
            Some(s) => s.to_string(),
            None => first_ready_device(&config).await?,
        };
        let adb = Arc::new(Adb::new(Some(serial.clone()), &config));
        adb.connect().await?;

        let geometry = probe::discover_geometry(&adb).await?;
        let sdk_version = adb.sdk_version().await?;
        info!(
            "connected {} (sdk {}): {}x{} orientation {}",
            serial, sdk_version, geometry.width, geometry.height, geometry.orientation
        );

        let mut device = Self {
            serial,
            retry: RetryPolicy::new(&config.retry),
            config,
            adb,
            geometry,
            sdk_version,
            minicap: None,
            minitouch: None,
        };
        if device.config.use_minicap {
            device.start_minicap().await?;
        }
        if device.config.use_minitouch {
            device.start_minitouch().await?;
        }
        Ok(device)
    }

    async fn start_minicap(&mut self) -> Result<()> {
        // seeded from dumpsys; `minicap -i` crashes on some devices
        let display = DisplayInfo {
            width: self.geometry.width,
            height: self.geometry.height,
            rotation: self.geometry.rotation(),
        };
        let mut minicap = Minicap::new(self.adb.clone(), &self.config, Some(display));
        minicap.install(false).await?;
        self.minicap = Some(minicap);
        Ok(())
    }

    async fn start_minitouch(&mut self) -> Result<()> {
        let mut minitouch = Minitouch::new(self.adb.clone(), &self.config, Some(self.geometry.clone()));
        minitouch.install(false).await?;
        attach_minitouch(&mut minitouch, self.config.stf.backend).await?;
        self.minitouch = Some(minitouch);
        Ok(())
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn adb(&self) -> &Arc<Adb> {
        &self.adb
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn sdk_version(&self) -> u32 {
        self.sdk_version
    }

    pub fn minicap_mut(&mut self) -> Option<&mut Minicap> {
        self.minicap.as_mut()
    }

    pub fn minitouch_mut(&mut self) -> Option<&mut Minitouch> {
        self.minitouch.as_mut()
    }

    /// Screen size as currently displayed (width and height swap when sideways)
    pub fn current_resolution(&self) -> (u32, u32) {
        self.geometry.current_resolution()
    }

    /// Upright screen point to the device's native frame
    pub fn transform_point(&self, point: (f64, f64)) -> (f64, f64) {
        let size = (self.geometry.width as f64, self.geometry.height as f64);
        up_2_ori(point, size, self.geometry.orientation)
    }

    /// Re-probe orientation, or take `orientation` from an outside monitor
    ///
    /// Geometry, minicap rotation and minitouch geometry change together.
    pub async fn refresh_orientation(&mut self, orientation: Option<Orientation>) -> Orientation {
        let orientation = match orientation {
            Some(o) => o,
            None => {
                probe::discover_orientation(&self.adb, self.geometry.width, self.geometry.height)
                    .await
            }
        };
        let geometry = self.geometry.clone().with_orientation(orientation);
        if let Some(minicap) = self.minicap.as_mut() {
            minicap.set_rotation(geometry.rotation());
        }
        if let Some(minitouch) = self.minitouch.as_mut() {
            minitouch.set_geometry(geometry.clone());
        }
        self.geometry = geometry;
        orientation
    }

    /// Reconnect the bridge and restart minitouch
    pub async fn reconnect(&mut self) -> Result<()> {
        info!("reconnecting {}", self.serial);
        if let Some(minicap) = self.minicap.as_mut() {
            if let Err(e) = minicap.ensure_alive() {
                warn!("minicap: {}", e);
            }
        }
        if let Some(minitouch) = self.minitouch.as_mut() {
            if let Err(e) = minitouch.ensure_alive() {
                warn!("minitouch: {}", e);
            }
        }
        self.adb.disconnect().await?;
        self.adb.connect().await?;
        if let Some(minitouch) = self.minitouch.as_mut() {
            attach_minitouch(minitouch, self.config.stf.backend).await?;
        }
        Ok(())
    }

    async fn snapshot_once(&mut self, filename: Option<PathBuf>, ensure_orientation: bool) -> Result<DynamicImage> {
        let raw = match self.minicap.as_mut() {
            Some(minicap) => minicap.get_still_frame(true).await?,
            None => self.adb.snapshot().await?,
        };
        let mut frame = image::load_from_memory(&raw)?;
        if ensure_orientation {
            frame = orient_frame(frame, self.geometry.orientation, self.sdk_version);
        }
        if let Some(path) = filename {
            frame.save(&path)?;
        }
        Ok(frame)
    }

    /// Capture the screen, optionally writing it to `filename`
    pub async fn snapshot(&mut self, filename: Option<&Path>, ensure_orientation: bool) -> Result<DynamicImage> {
        let filename = filename.map(Path::to_path_buf);
        let policy = self.retry;
        policy
            .execute(
                self,
                move |dev| Box::pin(dev.snapshot_once(filename.clone(), ensure_orientation)),
                |dev| Box::pin(dev.reconnect()),
            )
            .await
    }

    async fn touch_once(&mut self, pos: (f64, f64), duration: f64) -> Result<()> {
        let pos = self.transform_point(pos);
        match self.minitouch.as_mut() {
            Some(minitouch) => minitouch.touch(pos, duration).await,
            None => self.adb.input_tap(pos.0, pos.1).await,
        }
    }

    /// Tap at `pos`, holding for `duration` seconds (default from config)
    pub async fn touch(&mut self, pos: (f64, f64), duration: Option<f64>) -> Result<()> {
        let duration = duration.unwrap_or(self.config.timing.default_touch_duration);
        let policy = self.retry;
        policy
            .execute(
                self,
                move |dev| Box::pin(dev.touch_once(pos, duration)),
                |dev| Box::pin(dev.reconnect()),
            )
            .await
    }

    async fn swipe_once(&mut self, from: (f64, f64), to: (f64, f64), duration: f64) -> Result<()> {
        let from = self.transform_point(from);
        let to = self.transform_point(to);
        let steps = self.config.timing.default_swipe_steps;
        match self.minitouch.as_mut() {
            Some(minitouch) => minitouch.swipe(from, to, duration, steps).await,
            None => {
                self.adb
                    .input_swipe(from, to, (duration * 1000.0) as u64)
                    .await
            }
        }
    }

    pub async fn swipe(&mut self, from: (f64, f64), to: (f64, f64), duration: Option<f64>) -> Result<()> {
        let duration = duration.unwrap_or(self.config.timing.default_swipe_duration);
        let policy = self.retry;
        policy
            .execute(
                self,
                move |dev| Box::pin(dev.swipe_once(from, to, duration)),
                |dev| Box::pin(dev.reconnect()),
            )
            .await
    }

    async fn operate_once(&mut self, command: TouchCommand) -> Result<()> {
        let command = command.map_xy(|x, y| self.transform_point((x, y)));
        match self.minitouch.as_mut() {
            Some(minitouch) => minitouch.operate(command).await,
            None => Err(DeviceError::Unsupported(
                "operate needs minitouch".to_string(),
            )),
        }
    }

    /// Send one raw touch command; coordinates in the upright frame
    pub async fn operate(&mut self, command: TouchCommand) -> Result<()> {
        let policy = self.retry;
        policy
            .execute(
                self,
                move |dev| Box::pin(dev.operate_once(command)),
                |dev| Box::pin(dev.reconnect()),
            )
            .await
    }

    /// Two-finger pinch around `center`; needs minitouch
    pub async fn pinch(&mut self, center: (f64, f64), from_offset: f64, to_offset: f64, duration: Option<f64>) -> Result<()> {
        let duration = duration.unwrap_or(self.config.timing.default_swipe_duration);
        let steps = self.config.timing.default_swipe_steps;
        let center = self.transform_point(center);
        match self.minitouch.as_mut() {
            Some(minitouch) => minitouch.pinch(center, from_offset, to_offset, duration, steps).await,
            None => Err(DeviceError::Unsupported("pinch needs minitouch".to_string())),
        }
    }

    pub async fn shell(&mut self, cmd: &str) -> Result<String> {
        let cmd = cmd.to_string();
        let policy = self.retry;
        policy
            .execute(
                self,
                move |dev| {
                    let cmd = cmd.clone();
                    Box::pin(async move { dev.adb.shell(&cmd).await })
                },
                |dev| Box::pin(dev.reconnect()),
            )
            .await
    }

    pub async fn getprop(&self, key: &str) -> Result<String> {
        self.adb.getprop(key).await
    }

    /// `input keyevent`, key name upper-cased (`home` -> `HOME`)
    pub async fn keyevent(&self, key: &str) -> Result<()> {
        self.adb
            .shell(&format!("input keyevent {}", key.to_uppercase()))
            .await?;
        Ok(())
    }

    pub async fn home(&self) -> Result<()> {
        self.keyevent("HOME").await
    }

    /// Press POWER unless the screen is already on
    pub async fn wake(&self) -> Result<()> {
        if !self.is_screen_on().await? {
            self.keyevent("POWER").await?;
        }
        Ok(())
    }

    /// Type `text` through `input text`; spaces are sent as `%s`
    pub async fn text(&self, text: &str) -> Result<()> {
        self.adb
            .shell(&format!("input text '{}'", text.replace(' ', "%s")))
            .await?;
        Ok(())
    }

    pub async fn is_screen_on(&self) -> Result<bool> {
        let out = self.adb.shell("dumpsys window policy").await?;
        probe::parse_screen_on(&out)
            .ok_or_else(|| DeviceError::Parse("couldn't determine screen ON state".to_string()))
    }

    /// Lockscreen state; not reported by every vendor build
    pub async fn is_locked(&self) -> Result<bool> {
        let out = self.adb.shell("dumpsys window policy").await?;
        probe::parse_lockscreen(&out)
            .ok_or_else(|| DeviceError::Parse("couldn't determine screen lock state".to_string()))
    }

    /// MENU then BACK; dismisses the keyguard on devices without a secure lock
    pub async fn unlock(&self) -> Result<()> {
        self.keyevent("MENU").await?;
        self.keyevent("BACK").await
    }

    pub async fn is_keyboard_shown(&self) -> Result<bool> {
        let out = self.adb.shell("dumpsys input_method").await?;
        Ok(out.contains("mInputShown=true"))
    }

    pub async fn top_activity(&self) -> Result<Option<TopActivity>> {
        let out = self.adb.shell("dumpsys activity top").await?;
        let top = probe::parse_top_activity(&out);
        if top.is_none() {
            warn!("no ACTIVITY line in dumpsys activity top");
        }
        Ok(top)
    }

    /// Fail with `PackageNotFound` unless `package` is installed
    pub async fn amcheck(&self, package: &str) -> Result<()> {
        let out = self.adb.shell(&format!("pm path {}", package)).await?;
        if !out.contains("package:") {
            return Err(DeviceError::PackageNotFound(format!(
                "{} (pm path: {})",
                package,
                out.trim()
            )));
        }
        Ok(())
    }

    /// Launch `package`, through its launcher intent when `activity` is `None`
    pub async fn amstart(&self, package: &str, activity: Option<&str>) -> Result<()> {
        self.amcheck(package).await?;
        let cmd = match activity {
            Some(activity) => format!("am start -n {0}/{0}.{1}", package, activity),
            None => format!(
                "monkey -p {} -c android.intent.category.LAUNCHER 1",
                package
            ),
        };
        self.adb.shell(&cmd).await?;
        Ok(())
    }

    pub async fn amstop(&self, package: &str) -> Result<()> {
        self.amcheck(package).await?;
        self.adb.shell(&format!("am force-stop {}", package)).await?;
        Ok(())
    }

    pub async fn amclear(&self, package: &str) -> Result<()> {
        self.amcheck(package).await?;
        self.adb.shell(&format!("pm clear {}", package)).await?;
        Ok(())
    }

    pub async fn install(&self, apk: &Path) -> Result<String> {
        self.adb.install(apk).await
    }

    pub async fn uninstall(&self, package: &str) -> Result<String> {
        self.adb.uninstall(package).await
    }

    /// State reported by `adb devices` for this serial, `None` when not listed
    pub async fn check_status(&self) -> Result<Option<String>> {
        let devices = list_devices(&self.config, None).await?;
        Ok(devices
            .into_iter()
            .find(|d| d.serial == self.serial)
            .map(|d| d.state))
    }

    /// Stop both streaming servers and close their sockets
    pub async fn teardown(&mut self) {
        if let Some(minicap) = self.minicap.as_mut() {
            minicap.teardown().await;
        }
        if let Some(minitouch) = self.minitouch.as_mut() {
            minitouch.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orient_frame_rotates_portrait_capture_on_old_sdk() {
        let frame = DynamicImage::new_rgb8(2, 4);
        let rotated = orient_frame(frame.clone(), Orientation::Landscape, 16);
        assert_eq!((rotated.width(), rotated.height()), (4, 2));
        let rotated = orient_frame(frame.clone(), Orientation::LandscapeReversed, 15);
        assert_eq!((rotated.width(), rotated.height()), (4, 2));
        let flipped = orient_frame(frame.clone(), Orientation::PortraitReversed, 16);
        assert_eq!((flipped.width(), flipped.height()), (2, 4));
    }

    #[test]
    fn test_orient_frame_counter_clockwise() {
        let mut frame = image::RgbImage::new(2, 4);
        frame.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        let rotated = orient_frame(DynamicImage::ImageRgb8(frame), Orientation::Landscape, 16).to_rgb8();
        // top-left moves to bottom-left when turned counter-clockwise
        assert_eq!(rotated.get_pixel(0, 1), &image::Rgb([255, 0, 0]));
    }

    #[test]
    fn test_orient_frame_leaves_other_frames() {
        let portrait = DynamicImage::new_rgb8(2, 4);
        let out = orient_frame(portrait.clone(), Orientation::Landscape, 17);
        assert_eq!((out.width(), out.height()), (2, 4));

        let landscape = DynamicImage::new_rgb8(4, 2);
        let out = orient_frame(landscape, Orientation::Landscape, 16);
        assert_eq!((out.width(), out.height()), (4, 2));
    }
}
