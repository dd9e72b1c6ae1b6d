//! Timing configuration for device operations

use super::env_or;
use std::time::Duration;

/// Delays and timeouts used by the bridge, the streaming clients and the facade
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Pause after `adb connect`/`adb disconnect` for network devices
    pub connect_settle_delay: f64,
    /// How long to collect minicap startup output before checking it is alive
    pub minicap_setup_wait: f64,
    /// How long to collect the minitouch banner before checking it is alive
    pub minitouch_setup_wait: f64,
    /// Upper bound for a blocking adb invocation
    pub command_timeout: f64,
    pub default_touch_duration: f64,
    pub default_swipe_duration: f64,
    pub default_swipe_steps: u32,
    /// Delay after a plain `input tap` fallback
    pub input_tap_delay: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_settle_delay: env_or("DROIDWIRE_CONNECT_SETTLE_DELAY", 1.0),
            minicap_setup_wait: env_or("DROIDWIRE_MINICAP_SETUP_WAIT", 0.5),
            minitouch_setup_wait: env_or("DROIDWIRE_MINITOUCH_SETUP_WAIT", 1.0),
            command_timeout: env_or("DROIDWIRE_COMMAND_TIMEOUT", 60.0),
            default_touch_duration: env_or("DROIDWIRE_TOUCH_DURATION", 0.01),
            default_swipe_duration: env_or("DROIDWIRE_SWIPE_DURATION", 0.5),
            default_swipe_steps: env_or("DROIDWIRE_SWIPE_STEPS", 5),
            input_tap_delay: env_or("DROIDWIRE_INPUT_TAP_DELAY", 0.1),
        }
    }
}

impl TimingConfig {
    pub fn connect_settle(&self) -> Duration {
        Duration::from_secs_f64(self.connect_settle_delay)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout)
    }
}

/// Retry/backoff settings for operations that go through the forwarded sockets
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: f64,
    pub backoff_factor: f64,
    pub max_backoff: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: env_or("DROIDWIRE_RETRY_ATTEMPTS", 5),
            initial_backoff: env_or("DROIDWIRE_RETRY_INITIAL_BACKOFF", 0.1),
            backoff_factor: env_or("DROIDWIRE_RETRY_BACKOFF_FACTOR", 2.0),
            max_backoff: env_or("DROIDWIRE_RETRY_MAX_BACKOFF", 2.0),
        }
    }
}
