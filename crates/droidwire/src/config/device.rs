//! Device-level configuration: adb server address and native binary staging

use super::env_or;
use super::timing::{RetryConfig, TimingConfig};
use std::path::PathBuf;
use std::str::FromStr;

/// Where to find the adb executable and which adb server to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbConfig {
    pub adb_path: String,
    pub host: String,
    pub port: u16,
}

impl AdbConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 5037;

    /// True when pointing at the local default adb server
    pub fn is_default_server(&self) -> bool {
        self.host == Self::DEFAULT_HOST && self.port == Self::DEFAULT_PORT
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: env_or("DROIDWIRE_ADB_PATH", "adb".to_string()),
            host: env_or("DROIDWIRE_ADB_HOST", Self::DEFAULT_HOST.to_string()),
            port: env_or("DROIDWIRE_ADB_PORT", Self::DEFAULT_PORT),
        }
    }
}

/// Resolution requested from minicap relative to the real display size
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Projection {
    /// Capture at the real device resolution
    #[default]
    Original,
    /// Capture at a fixed virtual width and height
    Size(u32, u32),
    /// Scale the real resolution by a factor
    Scale(f64),
}

impl Projection {
    /// Virtual size for a display of `width` x `height`
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            Projection::Original => (width, height),
            Projection::Size(w, h) => (w, h),
            Projection::Scale(f) => (
                (width as f64 * f).round() as u32,
                (height as f64 * f).round() as u32,
            ),
        }
    }
}

impl FromStr for Projection {
    type Err = String;

    /// Accepts `WxH` or a float scale factor
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((w, h)) = s.split_once('x') {
            let w = w.parse().map_err(|_| format!("invalid projection width: {}", s))?;
            let h = h.parse().map_err(|_| format!("invalid projection height: {}", s))?;
            return Ok(Projection::Size(w, h));
        }
        let f: f64 = s.parse().map_err(|_| format!("invalid projection: {}", s))?;
        if f == 1.0 {
            Ok(Projection::Original)
        } else {
            Ok(Projection::Scale(f))
        }
    }
}

/// Native minicap/minitouch binaries and the ports they are served on
#[derive(Debug, Clone)]
pub struct StfConfig {
    /// Host directory laid out as `<abi>/minicap`, `<abi>/minitouch` and
    /// `minicap-shared/aosp/libs/android-<sdk>/<abi>/minicap.so`
    pub lib_dir: PathBuf,
    /// Device directory the binaries are staged in
    pub device_dir: String,
    pub minicap_port: u16,
    pub minitouch_port: u16,
    pub minitouch_socket: String,
    pub projection: Projection,
    /// Wait this long for a frame length prefix before yielding a stale marker
    pub frame_timeout: Option<f64>,
    /// Queue touch commands through a background worker
    pub backend: bool,
}

impl Default for StfConfig {
    fn default() -> Self {
        Self {
            lib_dir: PathBuf::from(env_or("DROIDWIRE_STF_LIB", "libs".to_string())),
            device_dir: env_or("DROIDWIRE_DEVICE_DIR", "/data/local/tmp".to_string()),
            minicap_port: env_or("DROIDWIRE_MINICAP_PORT", 11313),
            minitouch_port: env_or("DROIDWIRE_MINITOUCH_PORT", 11111),
            minitouch_socket: env_or("DROIDWIRE_MINITOUCH_SOCKET", "moa_minitouch".to_string()),
            projection: env_or("DROIDWIRE_PROJECTION", Projection::Original),
            frame_timeout: std::env::var("DROIDWIRE_FRAME_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            backend: env_or("DROIDWIRE_TOUCH_BACKEND", false),
        }
    }
}

/// Top-level configuration handed to [`crate::Android`] and its clients
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub adb: AdbConfig,
    pub stf: StfConfig,
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    /// Use minicap for snapshots instead of `screencap`
    pub use_minicap: bool,
    /// Use minitouch for input instead of `input tap`/`input swipe`
    pub use_minitouch: bool,
}

impl DeviceConfig {
    /// Create a configuration with both streaming clients enabled
    pub fn new() -> Self {
        Self {
            use_minicap: true,
            use_minitouch: true,
            ..Self::default()
        }
    }

    /// Set the adb executable path
    pub fn with_adb_path(mut self, path: impl Into<String>) -> Self {
        self.adb.adb_path = path.into();
        self
    }

    /// Set the adb server address
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.adb.host = host.into();
        self.adb.port = port;
        self
    }

    /// Set the host directory holding the native binaries
    pub fn with_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stf.lib_dir = dir.into();
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.stf.projection = projection;
        self
    }

    pub fn with_frame_timeout(mut self, secs: Option<f64>) -> Self {
        self.stf.frame_timeout = secs;
        self
    }

    /// Queue touch commands through a background worker
    pub fn with_backend(mut self, backend: bool) -> Self {
        self.stf.backend = backend;
        self
    }

    pub fn with_minicap(mut self, enabled: bool) -> Self {
        self.use_minicap = enabled;
        self
    }

    pub fn with_minitouch(mut self, enabled: bool) -> Self {
        self.use_minitouch = enabled;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
