//! Configuration module for droidwire
//!
//! This module contains:
//! - `device`: adb server address, native binary staging and the top-level `DeviceConfig`
//! - `timing`: delays, timeouts and retry/backoff settings
//!
//! Every `Default` impl reads `DROIDWIRE_*` environment variables once, at
//! construction. The resulting structs are plain values handed to each
//! component; nothing here is global.

mod device;
mod timing;

pub use device::{AdbConfig, DeviceConfig, Projection, StfConfig};
pub use timing::{RetryConfig, TimingConfig};

use std::env;
use std::str::FromStr;

/// Read an environment variable, falling back to `default` when unset or unparsable
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
