//! Server process lifecycle shared by minicap and minitouch
//!
//! Both tools run as `adb shell` children serving a device-side abstract
//! socket, reached through an adb forward from a local TCP port.

use crate::adb::{Adb, NonBlockingStreamReader};
use crate::error::{DeviceError, Result};
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Lifecycle of a streaming server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Binary not confirmed on the device yet
    Uninstalled,
    /// Installed, no server running
    Stopped,
    /// Server spawned, banner not yet checked
    Starting,
    Running,
    /// Server exited on its own (port owned by someone else, crash, missing binary)
    Failed,
}

/// Local TCP port mapped to a device abstract socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardBinding {
    pub local_port: u16,
    pub device_socket: String,
}

impl ForwardBinding {
    pub fn new(local_port: u16, device_socket: impl Into<String>) -> Self {
        Self {
            local_port,
            device_socket: device_socket.into(),
        }
    }

    pub fn local(&self) -> String {
        format!("tcp:{}", self.local_port)
    }

    pub fn remote(&self) -> String {
        format!("localabstract:{}", self.device_socket)
    }
}

/// One server process plus the forward it is reached through
#[derive(Debug)]
pub struct StreamingSession {
    state: ServerState,
    server: Option<Child>,
    forward: Option<ForwardBinding>,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            state: ServerState::Uninstalled,
            server: None,
            forward: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn forward(&self) -> Option<&ForwardBinding> {
        self.forward.as_ref()
    }

    pub fn mark_installed(&mut self) {
        if self.state == ServerState::Uninstalled {
            self.state = ServerState::Stopped;
        }
    }

    pub fn mark_uninstalled(&mut self) {
        self.state = ServerState::Uninstalled;
    }

    /// Kill the tracked server, if any. Safe to call on an already dead process.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.server.take() {
            if let Err(e) = child.kill().await {
                debug!("server already gone: {}", e);
            }
        }
        if matches!(self.state, ServerState::Starting | ServerState::Running) {
            self.state = ServerState::Stopped;
        }
    }

    /// Check whether the tracked server is still alive, moving to `Failed` if it exited
    pub fn check_alive(&mut self) -> bool {
        let exited = match self.server.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => return false,
        };
        if exited {
            warn!("streaming server exited unexpectedly");
            self.server = None;
            self.state = ServerState::Failed;
        }
        !exited
    }

    /// Fail with `Setup` if the server this session launched has exited
    ///
    /// Sessions attached to a server they did not spawn have nothing to check.
    pub fn ensure_alive(&mut self) -> Result<()> {
        if self.server.is_some() && !self.check_alive() {
            return Err(DeviceError::Setup(
                "streaming server exited after setup".to_string(),
            ));
        }
        Ok(())
    }

    /// (Re)start the server: kill the previous one, rebind the forward, spawn
    /// `command` and collect its startup output for `wait`.
    ///
    /// Returns the startup output when the server stays up, `None` when it
    /// exited straight away (usually another server already owns the socket).
    pub async fn launch(
        &mut self,
        adb: &Adb,
        binding: ForwardBinding,
        command: &str,
        wait: Duration,
    ) -> Result<Option<String>> {
        self.kill().await;

        adb.forward(&binding.local(), &binding.remote(), true).await?;
        self.forward = Some(binding);

        let mut child = adb.start_shell(command)?;
        self.state = ServerState::Starting;

        let mut stdout = child.stdout.take().map(NonBlockingStreamReader::new);
        let mut stderr = child.stderr.take().map(NonBlockingStreamReader::new);
        let banner = match stdout.as_mut() {
            Some(reader) => reader.read(wait).await,
            None => String::new(),
        };
        debug!("server startup output: {}", banner);
        let stdout_closed = stdout.as_ref().is_some_and(|r| r.reached_eof());
        for reader in [stdout.as_mut(), stderr.as_mut()].into_iter().flatten() {
            reader.kill();
        }

        // a closed stdout means the server is on its way out; reap it
        let exited = if stdout_closed {
            tokio::time::timeout(wait, child.wait()).await.is_ok()
        } else {
            !matches!(child.try_wait(), Ok(None))
        };
        if exited {
            warn!("server setup error, socket may already be served by another process");
            self.state = ServerState::Failed;
            return Ok(None);
        }

        info!("streaming server running: {}", command);
        self.server = Some(child);
        self.state = ServerState::Running;
        Ok(Some(banner))
    }
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_binding_endpoints() {
        let b = ForwardBinding::new(11111, "moa_minitouch");
        assert_eq!(b.local(), "tcp:11111");
        assert_eq!(b.remote(), "localabstract:moa_minitouch");
    }

    #[tokio::test]
    async fn test_state_transitions_without_server() {
        let mut s = StreamingSession::new();
        assert_eq!(s.state(), ServerState::Uninstalled);
        s.mark_installed();
        assert_eq!(s.state(), ServerState::Stopped);
        s.kill().await;
        s.kill().await;
        assert_eq!(s.state(), ServerState::Stopped);
        assert!(!s.check_alive());
        assert!(s.ensure_alive().is_ok());
        assert_eq!(s.state(), ServerState::Stopped);
    }
}
