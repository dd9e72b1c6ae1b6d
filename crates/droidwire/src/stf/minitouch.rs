//! Touch injection through minitouch
//!
//! minitouch is started as an `adb shell` child serving an abstract socket.
//! Commands go out over one persistent connection, either written directly
//! or handed to a background worker through a FIFO queue.

use super::install::{binary_present, binary_variant, push_executable};
use super::session::{ForwardBinding, ServerState, StreamingSession};
use super::touch::{encode_batch, TouchCommand};
use crate::adb::Adb;
use crate::config::{DeviceConfig, StfConfig, TimingConfig};
use crate::error::{DeviceError, Result};
use crate::geometry::DeviceGeometry;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MINITOUCH: &str = "minitouch";

lazy_static! {
    static ref CONTACTS_RE: Regex = Regex::new(r"\((\d+)x(\d+) with \d+ contacts\)").unwrap();
    static ref GREETING_LIMITS_RE: Regex =
        Regex::new(r"(?m)^\^ \d+ (\d+) (\d+) \d+\s*$").unwrap();
}

/// Native coordinate maxima of the touch digitizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBounds {
    pub max_x: u32,
    pub max_y: u32,
}

/// Find `(<W>x<H> with <N> contacts)` in minitouch's startup output
///
/// Best effort: the banner format is not part of any contract and may change
/// between minitouch builds.
pub fn parse_contacts_banner(text: &str) -> Option<SensorBounds> {
    let caps = CONTACTS_RE.captures_iter(text).last()?;
    Some(SensorBounds {
        max_x: caps[1].parse().ok()?,
        max_y: caps[2].parse().ok()?,
    })
}

/// Read the `^ <contacts> <max_x> <max_y> <max_pressure>` line of the socket greeting
pub fn parse_greeting(text: &str) -> Option<SensorBounds> {
    let caps = GREETING_LIMITS_RE.captures(text)?;
    Some(SensorBounds {
        max_x: caps[1].parse().ok()?,
        max_y: caps[2].parse().ok()?,
    })
}

/// Scale a screen-space point into sensor space
///
/// Identity when no sensor maxima are known. Width and height swap only when
/// the device is sideways and the stored width exceeds the height.
pub fn transform_xy(
    x: f64,
    y: f64,
    geometry: Option<&DeviceGeometry>,
    bounds: Option<SensorBounds>,
) -> (f64, f64) {
    let Some(geometry) = geometry else {
        return (x, y);
    };
    let (max_x, max_y) = match bounds {
        Some(b) => (b.max_x, b.max_y),
        None => match (geometry.max_x, geometry.max_y) {
            (Some(mx), Some(my)) => (mx, my),
            _ => return (x, y),
        },
    };
    if max_x == 0 || max_y == 0 || geometry.width == 0 || geometry.height == 0 {
        return (x, y);
    }

    let (mut width, mut height) = (geometry.width as f64, geometry.height as f64);
    if width > height && geometry.orientation.is_sideways() {
        std::mem::swap(&mut width, &mut height);
    }
    (x * max_x as f64 / width, y * max_y as f64 / height)
}

struct Connection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    _reader: OwnedReadHalf,
}

struct Backend {
    tx: mpsc::UnboundedSender<String>,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Backend {
    fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.tx);
        debug!("touch backend stopping (worker finished: {})", self.worker.is_finished());
    }
}

/// Drain the queue in FIFO order onto the socket
///
/// Holds only a weak handle: once the connection is dropped the worker exits.
async fn backend_worker(
    mut rx: mpsc::UnboundedReceiver<String>,
    writer: Weak<Mutex<OwnedWriteHalf>>,
    stop: Arc<AtomicBool>,
) {
    while let Some(cmd) = rx.recv().await {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Some(writer) = writer.upgrade() else {
            break;
        };
        let mut w = writer.lock().await;
        if let Err(e) = w.write_all(cmd.as_bytes()).await {
            warn!("touch backend write failed: {}", e);
            break;
        }
    }
    debug!("touch backend worker exited");
}

/// minitouch client for one device
pub struct Minitouch {
    adb: Arc<Adb>,
    stf: StfConfig,
    timing: TimingConfig,
    local_port: u16,
    device_socket: String,
    geometry: Option<DeviceGeometry>,
    bounds: Option<SensorBounds>,
    session: StreamingSession,
    connection: Option<Connection>,
    backend: Option<Backend>,
}

impl Minitouch {
    pub fn new(adb: Arc<Adb>, config: &DeviceConfig, geometry: Option<DeviceGeometry>) -> Self {
        Self {
            adb,
            local_port: config.stf.minitouch_port,
            device_socket: config.stf.minitouch_socket.clone(),
            stf: config.stf.clone(),
            timing: config.timing.clone(),
            geometry,
            bounds: None,
            session: StreamingSession::new(),
            connection: None,
            backend: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.session.state()
    }

    /// Move to `Failed` and error if the spawned server has exited
    pub fn ensure_alive(&mut self) -> Result<()> {
        self.session.ensure_alive()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Sensor maxima learned from the server banner or socket greeting
    pub fn sensor_bounds(&self) -> Option<SensorBounds> {
        self.bounds
    }

    pub fn geometry(&self) -> Option<&DeviceGeometry> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: DeviceGeometry) {
        self.geometry = Some(geometry);
    }

    /// True when commands are queued through the background worker
    pub fn is_backend(&self) -> bool {
        self.backend.is_some()
    }

    fn device_path(&self) -> String {
        format!("{}/{}", self.stf.device_dir, MINITOUCH)
    }

    /// Push minitouch unless it is already on the device
    pub async fn install(&mut self, force: bool) -> Result<()> {
        let listing = self.adb.shell(&format!("ls {}", self.stf.device_dir)).await?;
        if !force && binary_present(&listing, MINITOUCH) {
            info!("install minitouch skipped");
            self.session.mark_installed();
            return Ok(());
        }

        let abi = self.adb.abi().await?;
        let sdk = self.adb.sdk_version().await?;
        let bin = self
            .stf
            .lib_dir
            .join(&abi)
            .join(binary_variant(MINITOUCH, sdk));
        push_executable(&self.adb, &bin, &self.device_path()).await?;

        self.session.mark_installed();
        info!("install minitouch finished (sdk {}, abi {})", sdk, abi);
        Ok(())
    }

    /// (Re)start the minitouch server and learn the sensor maxima from its banner
    ///
    /// Returns the local port, or `None` when the server exited straight away
    /// (the socket is most likely owned by another session).
    pub async fn setup_server(
        &mut self,
        port: Option<u16>,
        device_socket: Option<&str>,
    ) -> Result<Option<u16>> {
        if let Some(port) = port {
            self.local_port = port;
        }
        if let Some(name) = device_socket {
            self.device_socket = name.to_string();
        }

        let command = format!("{} -n '{}'", self.device_path(), self.device_socket);
        let binding = ForwardBinding::new(self.local_port, self.device_socket.clone());
        let wait = Duration::from_secs_f64(self.timing.minitouch_setup_wait);
        let banner = self.session.launch(&self.adb, binding, &command, wait).await?;

        let Some(banner) = banner else {
            return Ok(None);
        };
        match parse_contacts_banner(&banner) {
            Some(bounds) => {
                info!("minitouch max_x, max_y: {}, {}", bounds.max_x, bounds.max_y);
                self.bounds = Some(bounds);
            }
            None => warn!("cannot get valid max_x and max_y from minitouch banner"),
        }
        Ok(Some(self.local_port))
    }

    /// Connect to the forwarded port and discard the greeting
    pub async fn setup_client(&mut self) -> Result<()> {
        if let Some(backend) = self.backend.take() {
            backend.stop();
        }
        self.connection = None;

        let stream = TcpStream::connect(("127.0.0.1", self.local_port)).await?;
        let (mut reader, writer) = stream.into_split();

        // greeting size is not fixed; take whatever the first read returns
        let mut buf = vec![0u8; 4096];
        let wait = Duration::from_secs_f64(self.timing.minitouch_setup_wait);
        match tokio::time::timeout(wait, reader.read(&mut buf)).await {
            Ok(Ok(n)) => {
                let greeting = String::from_utf8_lossy(&buf[..n]);
                debug!("minitouch greeting: {:?}", greeting);
                if self.bounds.is_none() {
                    self.bounds = parse_greeting(&greeting);
                }
            }
            Ok(Err(e)) => return Err(DeviceError::Io(e)),
            Err(_) => warn!("no greeting from minitouch within {:.1}s", wait.as_secs_f64()),
        }

        self.connection = Some(Connection {
            writer: Arc::new(Mutex::new(writer)),
            _reader: reader,
        });
        Ok(())
    }

    /// Connect, then route all sends through a FIFO queue drained by a worker task
    pub async fn setup_client_backend(&mut self) -> Result<()> {
        self.setup_client().await?;
        let writer = match self.connection.as_ref() {
            Some(conn) => Arc::downgrade(&conn.writer),
            None => return Err(DeviceError::Setup("minitouch client not connected".to_string())),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(backend_worker(rx, writer, stop.clone()));
        self.backend = Some(Backend { tx, stop, worker });
        Ok(())
    }

    /// Send raw protocol text
    ///
    /// In backend mode this only enqueues; delivery is FIFO and never acknowledged.
    /// Fails with `Setup` once the server spawned by [`Self::setup_server`] has exited.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.session.ensure_alive()?;
        self.write(text).await
    }

    async fn write(&self, text: &str) -> Result<()> {
        if let Some(backend) = self.backend.as_ref() {
            return backend
                .tx
                .send(text.to_string())
                .map_err(|_| DeviceError::Setup("touch backend worker has stopped".to_string()));
        }
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| DeviceError::Setup("minitouch client not connected".to_string()))?;
        let mut writer = conn.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        Ok(())
    }

    fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        transform_xy(x, y, self.geometry.as_ref(), self.bounds)
    }

    /// Press at `(x, y)` for `duration` seconds
    pub async fn touch(&mut self, (x, y): (f64, f64), duration: f64) -> Result<()> {
        self.session.ensure_alive()?;
        let (x, y) = self.transform(x, y);
        self.write(&encode_batch(&[TouchCommand::down(x, y)])).await?;
        tokio::time::sleep(Duration::from_secs_f64(duration)).await;
        self.write(&encode_batch(&[TouchCommand::up()])).await
    }

    /// Drag from `from` to `to` over `duration` seconds in `steps` moves
    pub async fn swipe(
        &mut self,
        from: (f64, f64),
        to: (f64, f64),
        duration: f64,
        steps: u32,
    ) -> Result<()> {
        self.session.ensure_alive()?;
        let steps = steps.max(1);
        let (fx, fy) = self.transform(from.0, from.1);
        let (tx, ty) = self.transform(to.0, to.1);
        let interval = Duration::from_secs_f64(duration / (steps + 1) as f64);

        self.write(&encode_batch(&[TouchCommand::down(fx, fy)])).await?;
        tokio::time::sleep(interval).await;
        for i in 1..steps {
            let t = i as f64 / steps as f64;
            let step = TouchCommand::move_to(fx + (tx - fx) * t, fy + (ty - fy) * t);
            self.write(&encode_batch(&[step])).await?;
            tokio::time::sleep(interval).await;
        }
        self.write(&encode_batch(&[TouchCommand::move_to(tx, ty)])).await?;
        tokio::time::sleep(interval).await;
        self.write(&encode_batch(&[TouchCommand::up()])).await
    }

    /// Two-finger pinch around `center`
    ///
    /// Contacts sit on the diagonal at `from_offset` and travel to
    /// `to_offset`; a smaller end offset pinches in.
    pub async fn pinch(
        &mut self,
        center: (f64, f64),
        from_offset: f64,
        to_offset: f64,
        duration: f64,
        steps: u32,
    ) -> Result<()> {
        self.session.ensure_alive()?;
        let steps = steps.max(1);
        let (cx, cy) = center;
        let contacts = |offset: f64| {
            let a = self.transform(cx - offset, cy + offset);
            let b = self.transform(cx + offset, cy - offset);
            (a, b)
        };
        let interval = Duration::from_secs_f64(duration / (steps + 1) as f64);

        let (a, b) = contacts(from_offset);
        self.write(&encode_batch(&[
            TouchCommand::down(a.0, a.1),
            TouchCommand::down(b.0, b.1).with_slot(1),
        ]))
        .await?;
        tokio::time::sleep(interval).await;
        for i in 1..=steps {
            let offset = from_offset + (to_offset - from_offset) * i as f64 / steps as f64;
            let (a, b) = contacts(offset);
            self.write(&encode_batch(&[
                TouchCommand::move_to(a.0, a.1),
                TouchCommand::move_to(b.0, b.1).with_slot(1),
            ]))
            .await?;
            tokio::time::sleep(interval).await;
        }
        self.write(&encode_batch(&[TouchCommand::up(), TouchCommand::up().with_slot(1)]))
            .await
    }

    /// Send a single command, coordinates given in screen space
    pub async fn operate(&mut self, command: TouchCommand) -> Result<()> {
        self.session.ensure_alive()?;
        let command = command.map_xy(|x, y| self.transform(x, y));
        self.write(&encode_batch(&[command])).await
    }

    /// Stop the worker, close the socket and kill the server
    pub async fn teardown(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.stop();
        }
        self.connection = None;
        self.session.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Orientation;
    use tokio::net::TcpListener;

    const BANNER: &str = "Note: device /dev/input/event4 is not supported by libevdev\n\
        Type B touch device synaptics_dsx (1079x1919 with 12 contacts) detected on /dev/input/event1 (score 22000)\n";

    #[test]
    fn test_parse_contacts_banner() {
        assert_eq!(
            parse_contacts_banner(BANNER),
            Some(SensorBounds { max_x: 1079, max_y: 1919 })
        );
        assert_eq!(parse_contacts_banner("Type A touch device (score 100)"), None);
        assert_eq!(parse_contacts_banner(""), None);
    }

    #[test]
    fn test_parse_greeting() {
        let greeting = "v 1\n^ 10 1079 1919 255\n$ 1234\n";
        assert_eq!(
            parse_greeting(greeting),
            Some(SensorBounds { max_x: 1079, max_y: 1919 })
        );
        assert_eq!(parse_greeting("v 1\n$ 1234\n"), None);
    }

    #[test]
    fn test_transform_identity_without_bounds() {
        let g = DeviceGeometry::new(1080, 1920, None);
        assert_eq!(transform_xy(100.0, 200.0, Some(&g), None), (100.0, 200.0));
        assert_eq!(transform_xy(100.0, 200.0, None, None), (100.0, 200.0));
        let bounds = Some(SensorBounds { max_x: 4095, max_y: 4095 });
        assert_eq!(transform_xy(100.0, 200.0, None, bounds), (100.0, 200.0));
    }

    #[test]
    fn test_transform_scales_to_sensor() {
        let g = DeviceGeometry::new(1080, 1920, None);
        let bounds = Some(SensorBounds { max_x: 2160, max_y: 960 });
        assert_eq!(transform_xy(540.0, 960.0, Some(&g), bounds), (1080.0, 480.0));

        // geometry bounds are used when the banner gave none
        let g = g.with_sensor_bounds(Some(540), Some(3840));
        assert_eq!(transform_xy(540.0, 960.0, Some(&g), None), (270.0, 1920.0));
    }

    #[test]
    fn test_transform_swaps_only_when_sideways_and_wide() {
        let bounds = Some(SensorBounds { max_x: 1000, max_y: 2000 });
        let wide = DeviceGeometry {
            width: 2000,
            height: 1000,
            density: None,
            orientation: Orientation::Landscape,
            max_x: None,
            max_y: None,
        };
        // swapped: effective 1000x2000
        assert_eq!(transform_xy(500.0, 500.0, Some(&wide), bounds), (500.0, 500.0));

        let upright_wide = DeviceGeometry {
            orientation: Orientation::PortraitReversed,
            ..wide.clone()
        };
        assert_eq!(
            transform_xy(500.0, 500.0, Some(&upright_wide), bounds),
            (250.0, 1000.0)
        );

        let tall_sideways = DeviceGeometry::new(1000, 2000, None)
            .with_orientation(Orientation::LandscapeReversed);
        assert_eq!(
            transform_xy(500.0, 500.0, Some(&tall_sideways), bounds),
            (500.0, 500.0)
        );
    }

    /// Fake minitouch socket: sends a greeting and records everything it receives
    async fn fake_minitouch_server() -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"v 1\n^ 10 1079 1919 255\n$ 4242\n").await.unwrap();
            let mut received = String::new();
            sock.read_to_string(&mut received).await.unwrap();
            received
        });
        (port, handle)
    }

    fn client_for(port: u16) -> Minitouch {
        let mut config = DeviceConfig::new();
        config.stf.minitouch_port = port;
        config.timing.minitouch_setup_wait = 0.5;
        let adb = Arc::new(Adb::new(Some("emulator-5554".to_string()), &config));
        Minitouch::new(adb, &config, None)
    }

    #[tokio::test]
    async fn test_direct_client_sends_protocol() {
        let (port, server) = fake_minitouch_server().await;
        let mut mt = client_for(port);
        mt.setup_client().await.unwrap();
        assert_eq!(mt.sensor_bounds(), Some(SensorBounds { max_x: 1079, max_y: 1919 }));

        mt.touch((10.0, 20.0), 0.0).await.unwrap();
        mt.operate(TouchCommand::Commit).await.unwrap();
        mt.teardown().await;

        let received = server.await.unwrap();
        assert_eq!(received, "d 0 10 20 50\nc\nu 0\nc\nc\n");
    }

    #[tokio::test]
    async fn test_backend_preserves_fifo_order() {
        let (port, server) = fake_minitouch_server().await;
        let mut mt = client_for(port);
        mt.setup_client_backend().await.unwrap();
        assert!(mt.is_backend());

        let cmds = ["d 0 1 1 50\nc\n", "m 0 2 2 50\nc\n", "u 0\nc\n"];
        for c in cmds {
            mt.send(c).await.unwrap();
        }
        // let the worker drain before closing
        tokio::time::sleep(Duration::from_millis(200)).await;
        mt.teardown().await;

        let received = server.await.unwrap();
        assert_eq!(received, cmds.concat());
    }

    #[tokio::test]
    async fn test_swipe_emits_gesture_in_order() {
        let (port, server) = fake_minitouch_server().await;
        let mut mt = client_for(port);
        mt.setup_client().await.unwrap();
        // identity transform: no geometry
        mt.bounds = None;
        mt.swipe((0.0, 0.0), (100.0, 0.0), 0.0, 4).await.unwrap();
        mt.teardown().await;

        let received = server.await.unwrap();
        assert_eq!(
            received,
            "d 0 0 0 50\nc\nm 0 25 0 50\nc\nm 0 50 0 50\nc\nm 0 75 0 50\nc\nm 0 100 0 50\nc\nu 0\nc\n"
        );
    }

    #[tokio::test]
    async fn test_send_without_client_fails() {
        let mut mt = client_for(1);
        assert!(matches!(mt.send("c\n").await, Err(DeviceError::Setup(_))));
    }
}
