//! Thin wrapper around the adb command-line tool

use crate::config::{AdbConfig, DeviceConfig, TimingConfig};
use crate::error::{DeviceError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Line terminator adb's pty translation inserts into binary shell output
#[cfg(windows)]
pub(crate) const LINE_BREAKER: &[u8] = b"\r\r\n";
#[cfg(not(windows))]
pub(crate) const LINE_BREAKER: &[u8] = b"\r\n";

/// One `adb forward --list` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardEntry {
    pub serial: String,
    pub local: String,
    pub remote: String,
}

/// Build the argument list (without the executable) for an adb invocation
///
/// `start-server` against the default local server is passed bare since the
/// server itself takes no `-H`/`-P`/`-s` selectors.
pub fn command_line<S: AsRef<str>>(config: &AdbConfig, serial: Option<&str>, args: &[S]) -> Vec<String> {
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    if args.len() == 1 && args[0] == "start-server" && config.is_default_server() {
        return args;
    }

    let mut cmd = vec![
        "-H".to_string(),
        config.host.clone(),
        "-P".to_string(),
        config.port.to_string(),
    ];
    if let Some(serial) = serial {
        cmd.push("-s".to_string());
        cmd.push(serial.to_string());
    }
    cmd.extend(args);
    cmd
}

/// Parse `adb forward --list` output
pub fn parse_forwards(output: &str) -> Vec<ForwardEntry> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [serial, local, remote] => Some(ForwardEntry {
                    serial: serial.to_string(),
                    local: local.to_string(),
                    remote: remote.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Replace every occurrence of `from` with `to` in a byte buffer
pub(crate) fn replace_bytes(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Undo adb's newline translation on binary shell output
pub fn normalize_line_breaks(data: &[u8]) -> Vec<u8> {
    replace_bytes(data, LINE_BREAKER, b"\n")
}

/// adb bridge bound to one device serial
pub struct Adb {
    config: AdbConfig,
    timing: TimingConfig,
    serial: Option<String>,
    props: Mutex<HashMap<String, String>>,
}

impl Adb {
    /// Create a bridge for `serial` (or the only attached device when `None`)
    pub fn new(serial: Option<String>, config: &DeviceConfig) -> Self {
        Self {
            config: config.adb.clone(),
            timing: config.timing.clone(),
            serial,
            props: Mutex::new(HashMap::new()),
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Network-addressed devices (`host:port`) need an explicit connect
    pub fn is_remote(&self) -> bool {
        self.serial.as_deref().is_some_and(|s| s.contains(':'))
    }

    fn command(&self, serial: Option<&str>, args: &[String]) -> Command {
        let full = command_line(&self.config, serial, args);
        debug!("{} {}", self.config.adb_path, full.join(" "));

        let mut cmd = Command::new(&self.config.adb_path);
        cmd.args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn output(&self, serial: Option<&str>, args: &[String]) -> Result<Vec<u8>> {
        let timeout = self.timing.command_timeout();
        let output = tokio::time::timeout(timeout, self.command(serial, args).output())
            .await
            .map_err(|_| {
                DeviceError::Timeout(format!(
                    "adb {} timed out after {:.1}s",
                    args.join(" "),
                    timeout.as_secs_f64()
                ))
            })?
            .map_err(DeviceError::Io)?;

        if !output.status.success() {
            return Err(DeviceError::Bridge {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }

    fn to_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
        args.iter().map(|a| a.as_ref().to_string()).collect()
    }

    /// Run an adb command to completion and return its stdout as bytes
    pub async fn run_raw<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<u8>> {
        self.output(self.serial(), &Self::to_args(args)).await
    }

    /// Run an adb command to completion and return its stdout
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let out = self.run_raw(args).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Run an adb command without a device selector
    pub async fn run_global<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let out = self.output(None, &Self::to_args(args)).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Spawn an adb command and hand back the live process
    ///
    /// stdout and stderr are piped for the caller to stream.
    pub fn start<S: AsRef<str>>(&self, args: &[S]) -> Result<Child> {
        let child = self.command(self.serial(), &Self::to_args(args)).spawn()?;
        Ok(child)
    }

    pub async fn shell(&self, cmd: &str) -> Result<String> {
        self.run(&["shell", cmd]).await
    }

    pub async fn shell_raw(&self, cmd: &str) -> Result<Vec<u8>> {
        self.run_raw(&["shell", cmd]).await
    }

    pub fn start_shell(&self, cmd: &str) -> Result<Child> {
        self.start(&["shell", cmd])
    }

    /// Connect to a network device; a no-op for USB serials
    pub async fn connect(&self) -> Result<()> {
        if let Some(serial) = self.serial.as_deref().filter(|_| self.is_remote()) {
            let out = self.run_global(&["connect", serial]).await?;
            info!("adb connect {}: {}", serial, out.trim());
            tokio::time::sleep(self.timing.connect_settle()).await;
        }
        Ok(())
    }

    /// Disconnect a network device; a no-op for USB serials
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(serial) = self.serial.as_deref().filter(|_| self.is_remote()) {
            self.run_global(&["disconnect", serial]).await?;
            tokio::time::sleep(self.timing.connect_settle()).await;
        }
        Ok(())
    }

    /// Read a system property, trailing newline stripped
    pub async fn getprop(&self, key: &str) -> Result<String> {
        let out = self.run(&["shell", "getprop", key]).await?;
        Ok(out.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    /// Read a system property once and cache it for the lifetime of the bridge
    pub async fn cached_prop(&self, key: &str) -> Result<String> {
        if let Some(v) = self.props.lock().ok().and_then(|p| p.get(key).cloned()) {
            return Ok(v);
        }
        let value = self.getprop(key).await?;
        if let Ok(mut props) = self.props.lock() {
            props.insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    pub async fn sdk_version(&self) -> Result<u32> {
        let raw = self.cached_prop("ro.build.version.sdk").await?;
        raw.trim()
            .parse()
            .map_err(|_| DeviceError::Parse(format!("invalid sdk version: {:?}", raw)))
    }

    pub async fn abi(&self) -> Result<String> {
        self.cached_prop("ro.product.cpu.abi").await
    }

    /// Map a local endpoint to a device endpoint, e.g. `tcp:11111` -> `localabstract:moa_minitouch`
    pub async fn forward(&self, local: &str, remote: &str, rebind: bool) -> Result<()> {
        let mut args = vec!["forward"];
        if !rebind {
            args.push("--no-rebind");
        }
        args.push(local);
        args.push(remote);
        self.run(&args).await?;
        Ok(())
    }

    pub async fn remove_forward(&self, local: &str) -> Result<()> {
        self.run(&["forward", "--remove", local]).await?;
        Ok(())
    }

    pub async fn get_forwards(&self) -> Result<Vec<ForwardEntry>> {
        let out = self.run(&["forward", "--list"]).await?;
        Ok(parse_forwards(&out))
    }

    pub async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.run(&["push", local.as_ref(), remote]).await?;
        Ok(())
    }

    /// Install an apk from the host
    pub async fn install(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(DeviceError::InvalidArgument(format!(
                "{} is not a valid file",
                path.display()
            )));
        }
        let path = path.to_string_lossy();
        self.run(&["install", path.as_ref()]).await
    }

    pub async fn uninstall(&self, package: &str) -> Result<String> {
        self.run(&["uninstall", package]).await
    }

    /// PNG screenshot through `screencap`, the slow path without minicap
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let raw = self.shell_raw("screencap -p").await?;
        Ok(normalize_line_breaks(&raw))
    }

    /// Tap through `input tap`, the slow path without minitouch
    pub async fn input_tap(&self, x: f64, y: f64) -> Result<()> {
        self.shell(&format!("input tap {} {}", x as i64, y as i64))
            .await?;
        tokio::time::sleep(std::time::Duration::from_secs_f64(self.timing.input_tap_delay)).await;
        Ok(())
    }

    /// Swipe through `input swipe`, the slow path without minitouch
    pub async fn input_swipe(&self, from: (f64, f64), to: (f64, f64), duration_ms: u64) -> Result<()> {
        let sdk = self.sdk_version().await?;
        let (x0, y0, x1, y1) = (from.0 as i64, from.1 as i64, to.0 as i64, to.1 as i64);
        if sdk <= 15 {
            return Err(DeviceError::Unsupported(format!(
                "swipe: API <= 15 not supported (version={})",
                sdk
            )));
        } else if sdk <= 17 {
            self.shell(&format!("input swipe {} {} {} {}", x0, y0, x1, y1))
                .await?;
        } else {
            self.shell(&format!(
                "input touchscreen swipe {} {} {} {} {}",
                x0, y0, x1, y1, duration_ms
            ))
            .await?;
        }
        Ok(())
    }
}
