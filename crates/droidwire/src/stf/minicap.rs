//! Screen capture through minicap
//!
//! Two paths: a one-shot still frame over a blocking `adb shell`, and a
//! persistent stream read from minicap's forwarded socket.
//!
//! Stream wire format (little-endian):
//! ```text
//! header: version:u8 header_size:u8 pid:u32 real_w:u32 real_h:u32 virt_w:u32 virt_h:u32 orientation:u8 quirks:u8
//! frame:  size:u32 jpeg[size]   (repeated)
//! ```

use super::install::{binary_present, binary_variant, push_executable};
use super::session::{ForwardBinding, ServerState, StreamingSession};
use crate::adb::{replace_bytes, Adb, LINE_BREAKER};
use crate::config::{DeviceConfig, Projection, StfConfig, TimingConfig};
use crate::error::{DeviceError, Result};
use futures::Stream;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const MINICAP: &str = "minicap";
const MINICAP_SO: &str = "minicap.so";
const STILL_FRAME_MARKER: &[u8] = b"for JPG encoder";
/// Refuse frame lengths beyond this; a larger prefix means the stream is out of sync
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// `minicap -i` output; only the fields used here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub rotation: u32,
}

impl DisplayInfo {
    /// Report landscape displays portrait-relative
    ///
    /// Width and height are swapped only when the rotation is sideways and
    /// the reported width exceeds the height.
    pub fn normalized(mut self) -> Self {
        if self.width > self.height && matches!(self.rotation, 90 | 270) {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self
    }
}

/// Fixed 24-byte banner minicap sends on every new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinicapHeader {
    pub version: u8,
    pub header_size: u8,
    pub pid: u32,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub orientation: u8,
    pub quirks: u8,
}

impl MinicapHeader {
    pub const SIZE: usize = 24;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(DeviceError::Protocol(format!(
                "minicap header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        if buf[1] as usize != Self::SIZE {
            return Err(DeviceError::Protocol(format!(
                "minicap header declares {} bytes, expected {}",
                buf[1],
                Self::SIZE
            )));
        }
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            version: buf[0],
            header_size: buf[1],
            pid: u32_at(2),
            real_width: u32_at(6),
            real_height: u32_at(10),
            virtual_width: u32_at(14),
            virtual_height: u32_at(18),
            orientation: buf[22],
            quirks: buf[23],
        })
    }
}

/// Item produced by a [`FrameStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Always the first item
    Header(MinicapHeader),
    /// One JPEG frame
    Frame(Vec<u8>),
    /// No frame arrived within the frame timeout (screen idle or locked)
    Stale,
}

/// Reader over a minicap socket: the header first, then frames
///
/// Bounded by `max_frames` when set. Not restartable: after EOF, a protocol
/// error or the frame limit, open a new stream.
pub struct FrameStream<S> {
    socket: S,
    header_read: bool,
    finished: bool,
    max_frames: Option<usize>,
    produced: usize,
    timeout: Option<Duration>,
    prefix: [u8; 4],
    prefix_filled: usize,
}

impl<S: AsyncRead + Unpin> FrameStream<S> {
    pub fn new(socket: S, max_frames: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            socket,
            header_read: false,
            finished: false,
            max_frames,
            produced: 0,
            timeout,
            prefix: [0; 4],
            prefix_filled: 0,
        }
    }

    /// Next item, `None` once the stream is exhausted
    pub async fn next(&mut self) -> Option<Result<StreamEvent>> {
        if self.finished {
            return None;
        }
        if self.max_frames.is_some_and(|max| self.produced >= max) {
            self.finished = true;
            return None;
        }
        let item = self.read_item().await;
        if item.is_err() {
            self.finished = true;
        }
        Some(item)
    }

    async fn read_item(&mut self) -> Result<StreamEvent> {
        if !self.header_read {
            let mut buf = [0u8; MinicapHeader::SIZE];
            self.socket
                .read_exact(&mut buf)
                .await
                .map_err(|e| DeviceError::Protocol(format!("reading minicap header: {}", e)))?;
            self.header_read = true;
            let header = MinicapHeader::parse(&buf)?;
            debug!("minicap header: {:?}", header);
            return Ok(StreamEvent::Header(header));
        }

        self.produced += 1;
        let size = match self.read_prefix().await? {
            Some(size) => size,
            None => {
                debug!("no frame within timeout, screen may be locked");
                return Ok(StreamEvent::Stale);
            }
        };
        if size > MAX_FRAME_SIZE {
            return Err(DeviceError::Protocol(format!(
                "frame length {} exceeds limit",
                size
            )));
        }
        let mut frame = vec![0u8; size as usize];
        self.socket
            .read_exact(&mut frame)
            .await
            .map_err(|e| DeviceError::Protocol(format!("reading {} byte frame: {}", size, e)))?;
        Ok(StreamEvent::Frame(frame))
    }

    /// Read the 4-byte length prefix; `None` on timeout
    ///
    /// Partial prefixes survive a timeout, so the stream stays aligned.
    async fn read_prefix(&mut self) -> Result<Option<u32>> {
        while self.prefix_filled < 4 {
            let read = self.socket.read(&mut self.prefix[self.prefix_filled..]);
            let n = match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, read).await {
                    Ok(n) => n?,
                    Err(_) => return Ok(None),
                },
                None => read.await?,
            };
            if n == 0 {
                return Err(DeviceError::Protocol(
                    "socket closed while reading frame length".to_string(),
                ));
            }
            self.prefix_filled += n;
        }
        self.prefix_filled = 0;
        Ok(Some(u32::from_le_bytes(self.prefix)))
    }

    /// Adapt into a `futures::Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent>> {
        futures::stream::unfold(self, |mut s| async move {
            let item = s.next().await?;
            Some((item, s))
        })
    }
}

/// Strip minicap's log preamble from `-s` output and undo adb newline translation
pub fn strip_still_frame(raw: &[u8]) -> Vec<u8> {
    let mut marker = STILL_FRAME_MARKER.to_vec();
    marker.extend_from_slice(LINE_BREAKER);

    let start = raw
        .windows(marker.len())
        .rposition(|w| w == marker.as_slice())
        .map(|pos| pos + marker.len())
        .unwrap_or(0);
    replace_bytes(&raw[start..], LINE_BREAKER, b"\n")
}

/// Arguments minicap takes for `-P`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameParams {
    real_width: u32,
    real_height: u32,
    virtual_width: u32,
    virtual_height: u32,
    rotation: u32,
}

impl FrameParams {
    fn arg(&self) -> String {
        format!(
            "{}x{}@{}x{}/{}",
            self.real_width, self.real_height, self.virtual_width, self.virtual_height, self.rotation
        )
    }
}

/// minicap client for one device
pub struct Minicap {
    adb: Arc<Adb>,
    stf: StfConfig,
    timing: TimingConfig,
    display: Option<DisplayInfo>,
    session: StreamingSession,
    speedy: Option<FrameStream<TcpStream>>,
}

impl Minicap {
    /// `display` can be seeded from the facade's geometry; `minicap -i` is
    /// known to crash on some devices.
    pub fn new(adb: Arc<Adb>, config: &DeviceConfig, display: Option<DisplayInfo>) -> Self {
        Self {
            adb,
            stf: config.stf.clone(),
            timing: config.timing.clone(),
            display,
            session: StreamingSession::new(),
            speedy: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.session.state()
    }

    /// Move to `Failed` and error if the spawned server has exited
    pub fn ensure_alive(&mut self) -> Result<()> {
        self.session.ensure_alive()
    }

    pub fn display(&self) -> Option<&DisplayInfo> {
        self.display.as_ref()
    }

    /// Keep the rotation handed to minicap in step with the device orientation
    pub fn set_rotation(&mut self, rotation: u32) {
        if let Some(display) = self.display.as_mut() {
            display.rotation = rotation;
        }
    }

    fn device_path(&self, name: &str) -> String {
        format!("{}/{}", self.stf.device_dir, name)
    }

    fn base_command(&self) -> String {
        format!(
            "LD_LIBRARY_PATH={dir} {dir}/{bin}",
            dir = self.stf.device_dir,
            bin = MINICAP
        )
    }

    /// Push minicap and its shared library unless both are already on the device
    pub async fn install(&mut self, force: bool) -> Result<()> {
        let listing = self.adb.shell(&format!("ls {}", self.stf.device_dir)).await?;
        if !force && binary_present(&listing, MINICAP) && binary_present(&listing, MINICAP_SO) {
            info!("install minicap skipped");
            self.session.mark_installed();
            return Ok(());
        }

        self.session.mark_uninstalled();
        if let Err(e) = self
            .adb
            .shell(&format!("rm -f {}*", self.device_path(MINICAP)))
            .await
        {
            warn!("minicap cleanup failed: {}", e);
        }
        let abi = self.adb.abi().await?;
        let sdk = self.adb.sdk_version().await?;

        let bin = self
            .stf
            .lib_dir
            .join(&abi)
            .join(binary_variant(MINICAP, sdk));
        push_executable(&self.adb, &bin, &self.device_path(MINICAP)).await?;

        let lib = self
            .stf
            .lib_dir
            .join("minicap-shared/aosp/libs")
            .join(format!("android-{}", sdk))
            .join(&abi)
            .join(MINICAP_SO);
        push_executable(&self.adb, &lib, &self.device_path(MINICAP_SO)).await?;

        self.session.mark_installed();
        info!("install minicap finished (sdk {}, abi {})", sdk, abi);
        Ok(())
    }

    /// Query width/height/rotation from `minicap -i`
    pub async fn probe_geometry(&mut self) -> Result<DisplayInfo> {
        let out = self.adb.shell(&format!("{} -i", self.base_command())).await?;
        let info: DisplayInfo = serde_json::from_str(out.trim())?;
        let info = info.normalized();
        self.display = Some(info);
        Ok(info)
    }

    async fn params(&mut self, use_original_size: bool) -> Result<FrameParams> {
        let display = match self.display {
            Some(d) => d,
            None => self.probe_geometry().await?,
        };
        let projection = if use_original_size {
            Projection::Original
        } else {
            self.stf.projection
        };
        let (virtual_width, virtual_height) = projection.apply(display.width, display.height);
        Ok(FrameParams {
            real_width: display.width,
            real_height: display.height,
            virtual_width,
            virtual_height,
            rotation: display.rotation,
        })
    }

    /// One JPEG frame via `minicap -s`
    pub async fn get_still_frame(&mut self, use_original_size: bool) -> Result<Vec<u8>> {
        let params = self.params(use_original_size).await?;
        let raw = self
            .adb
            .shell_raw(&format!(
                "{} -n 'moa_minicap' -P {} -s",
                self.base_command(),
                params.arg()
            ))
            .await?;
        Ok(strip_still_frame(&raw))
    }

    /// (Re)start the minicap server on `port` (default: configured port)
    ///
    /// Returns the bound local port, or `None` when the server exited
    /// immediately.
    pub async fn setup(&mut self, port: Option<u16>) -> Result<Option<u16>> {
        let params = self.params(false).await?;
        let port = port.unwrap_or(self.stf.minicap_port);
        let socket = format!("moa_minicap_{}", port);
        let command = format!("{} -n '{}' -P {}", self.base_command(), socket, params.arg());
        let wait = Duration::from_secs_f64(self.timing.minicap_setup_wait);
        let started = self
            .session
            .launch(&self.adb, ForwardBinding::new(port, socket), &command, wait)
            .await?;
        Ok(started.map(|_| port))
    }

    /// Start the server and open a frame stream on its socket
    pub async fn open_stream(
        &mut self,
        max_frames: Option<usize>,
        port: Option<u16>,
    ) -> Result<FrameStream<TcpStream>> {
        let port = port.unwrap_or(self.stf.minicap_port);
        if self.setup(Some(port)).await?.is_none() {
            warn!("minicap setup error, trying to attach to the existing server");
        }
        let socket = TcpStream::connect(("127.0.0.1", port)).await?;
        let timeout = self.stf.frame_timeout.map(Duration::from_secs_f64);
        Ok(FrameStream::new(socket, max_frames, timeout))
    }

    /// Next frame from a persistent stream on `minicap_port + 1`, `None` when stale
    pub async fn get_frame_speedy(&mut self) -> Result<Option<Vec<u8>>> {
        if self.speedy.is_some() {
            if let Err(e) = self.session.ensure_alive() {
                self.speedy = None;
                return Err(e);
            }
        }
        if self.speedy.is_none() {
            let port = self.stf.minicap_port.wrapping_add(1);
            let mut stream = self.open_stream(None, Some(port)).await?;
            match stream.next().await {
                Some(Ok(StreamEvent::Header(h))) => debug!("speedy stream header: {:?}", h),
                Some(Err(e)) => return Err(e),
                _ => {}
            }
            self.speedy = Some(stream);
        }

        let next = match self.speedy.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };
        match next {
            Some(Ok(StreamEvent::Frame(frame))) => Ok(Some(frame)),
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => {
                self.speedy = None;
                Err(e)
            }
            None => {
                self.speedy = None;
                Err(DeviceError::Protocol("speedy stream exhausted".to_string()))
            }
        }
    }

    /// Drop any open stream and kill the server
    pub async fn teardown(&mut self) {
        self.speedy = None;
        self.session.kill().await;
    }
}
