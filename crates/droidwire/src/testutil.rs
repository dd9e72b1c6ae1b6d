//! Scripted stand-in for the `adb` executable

use crate::config::{DeviceConfig, RetryConfig, TimingConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A shell script posing as `adb`
///
/// Every invocation appends its arguments to a log. `arms` are `case`
/// branches matched against the joined argument list: a shell glob and the
/// body to run (print output, `sleep`, `exit 1`...). Unmatched calls succeed
/// silently.
pub(crate) struct FakeAdb {
    dir: TempDir,
    path: PathBuf,
    log: PathBuf,
}

impl FakeAdb {
    pub fn new(arms: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adb");
        let log = dir.path().join("calls.log");

        let mut script = format!("#!/bin/sh\necho \"$*\" >> '{}'\ncase \"$*\" in\n", log.display());
        for (pattern, body) in arms {
            script.push_str(&format!("  {})\n    {}\n    ;;\n", pattern, body));
        }
        script.push_str("esac\nexit 0\n");

        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path, log }
    }

    /// Scratch directory living as long as the fake
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Argument lists of every call so far, in order
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    /// Config pointing at this fake, with short waits and no backoff
    pub fn config(&self) -> DeviceConfig {
        let timing = TimingConfig {
            connect_settle_delay: 0.0,
            minicap_setup_wait: 0.3,
            minitouch_setup_wait: 0.3,
            command_timeout: 10.0,
            default_touch_duration: 0.0,
            default_swipe_duration: 0.0,
            default_swipe_steps: 2,
            input_tap_delay: 0.0,
        };
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff: 0.0,
            backoff_factor: 1.0,
            max_backoff: 0.0,
        };
        DeviceConfig::new()
            .with_adb_path(self.path.to_string_lossy())
            .with_lib_dir(self.dir.path().join("stf_libs"))
            .with_timing(timing)
            .with_retry(retry)
    }

    /// Create empty host-side binaries under the configured lib dir
    pub fn stage_libs(&self, abi: &str, sdk: u32) {
        let libs = self.dir.path().join("stf_libs");
        let bin_dir = libs.join(abi);
        fs::create_dir_all(&bin_dir).unwrap();
        for name in ["minicap", "minicap-nopie", "minitouch", "minitouch-nopie"] {
            fs::write(bin_dir.join(name), b"").unwrap();
        }
        let so_dir = libs
            .join("minicap-shared/aosp/libs")
            .join(format!("android-{}", sdk))
            .join(abi);
        fs::create_dir_all(&so_dir).unwrap();
        fs::write(so_dir.join("minicap.so"), b"").unwrap();
    }
}
