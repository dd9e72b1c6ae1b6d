//! droidwire: Android device communication over adb, minicap and minitouch
//!
//! This library provides the low-level device layer for UI automation:
//! - adb bridge for process control, port forwards, pushes and shell commands
//! - minicap client for still frames and the binary frame stream
//! - minitouch client for the touch line protocol, direct or queued
//! - `Android` facade with geometry probing, orientation-aware coordinates
//!   and retry with reconnect
//!
//! # Example
//!
//! ```no_run
//! use droidwire::{Android, DeviceConfig};
//!
//! #[tokio::main]
//! async fn main() -> droidwire::Result<()> {
//!     let config = DeviceConfig::new().with_lib_dir("/opt/stf/libs");
//!     let mut device = Android::connect(None, config).await?;
//!
//!     device.touch((540.0, 960.0), None).await?;
//!     device.swipe((540.0, 1500.0), (540.0, 400.0), Some(0.3)).await?;
//!     let screen = device.snapshot(Some("screen.png".as_ref()), true).await?;
//!     println!("{}x{}", screen.width(), screen.height());
//!
//!     device.teardown().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod config;
pub mod geometry;
pub mod retry;

// Transport and side channels
pub mod adb;
pub mod stf;

// Facade
pub mod device;

#[cfg(all(test, unix))]
mod testutil;

pub use error::{DeviceError, Result};

pub use config::{AdbConfig, DeviceConfig, Projection, RetryConfig, StfConfig, TimingConfig};

pub use geometry::{DeviceGeometry, Orientation};

pub use retry::RetryPolicy;

pub use adb::{
    first_ready_device, list_devices, Adb, ConnectionType, DeviceInfo, ForwardEntry,
    NonBlockingStreamReader,
};

pub use stf::{
    FrameStream, Minicap, MinicapHeader, Minitouch, SensorBounds, ServerState, StreamEvent,
    TouchCommand,
};

pub use device::{ori_2_up, up_2_ori, Android, TopActivity};
