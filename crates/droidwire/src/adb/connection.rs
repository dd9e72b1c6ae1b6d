//! Device discovery through the adb server

use super::bridge::Adb;
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEVICE_LINE_RE: Regex = Regex::new(r"^[\w\d.:-]+\t\w+$").unwrap();
}

/// Type of adb connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    Remote,
}

/// A device as listed by `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: String,
    pub connection_type: ConnectionType,
}

/// Parse `adb devices` output, keeping only `<serial>\t<state>` lines
pub fn parse_devices(output: &str, state: Option<&str>) -> Vec<DeviceInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| DEVICE_LINE_RE.is_match(line))
        .filter_map(|line| line.split_once('\t'))
        .filter(|(_, s)| state.map_or(true, |wanted| *s == wanted))
        .map(|(serial, s)| DeviceInfo {
            serial: serial.to_string(),
            state: s.to_string(),
            connection_type: if serial.contains(':') {
                ConnectionType::Remote
            } else {
                ConnectionType::Usb
            },
        })
        .collect()
}

/// List devices known to the configured adb server, optionally filtered by state
pub async fn list_devices(config: &DeviceConfig, state: Option<&str>) -> Result<Vec<DeviceInfo>> {
    let adb = Adb::new(None, config);
    adb.run(&["start-server"]).await?;
    let out = adb.run(&["devices"]).await?;
    Ok(parse_devices(&out, state))
}

/// Serial of the first device in the `device` state
pub async fn first_ready_device(config: &DeviceConfig) -> Result<String> {
    list_devices(config, Some("device"))
        .await?
        .into_iter()
        .next()
        .map(|d| d.serial)
        .ok_or_else(|| DeviceError::DeviceNotFound("no device in state 'device'".to_string()))
}
