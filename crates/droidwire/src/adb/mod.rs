//! ADB (Android Debug Bridge) module
//!
//! This module provides:
//! - `bridge`: the adb command wrapper (run/shell/forward/push/install)
//! - `connection`: device discovery through the adb server
//! - `reader`: timed line reads over a subprocess pipe

mod bridge;
mod connection;
mod reader;

pub use bridge::{command_line, normalize_line_breaks, parse_forwards, Adb, ForwardEntry};
pub(crate) use bridge::{replace_bytes, LINE_BREAKER};
pub use connection::{first_ready_device, list_devices, parse_devices, ConnectionType, DeviceInfo};
pub use reader::NonBlockingStreamReader;
