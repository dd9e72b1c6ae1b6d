//! Timed line reads over a subprocess pipe
//!
//! minicap and minitouch print a banner and then keep running, so their
//! stdout never reaches EOF. A pump task moves lines into a bounded queue and
//! the consumer applies its timeout on the queue instead of on the pipe.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const QUEUE_CAPACITY: usize = 1024;

pub struct NonBlockingStreamReader {
    rx: mpsc::Receiver<String>,
    pump: JoinHandle<()>,
    eof: bool,
}

impl NonBlockingStreamReader {
    /// Start pumping lines out of `stream`
    pub fn new<R>(stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let pump = tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            let mut forwarding = true;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if !forwarding {
                            continue;
                        }
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(&['\r', '\n'][..])
                            .to_string();
                        // Consumer gone: keep draining so the child never blocks on a full pipe
                        if tx.send(line).await.is_err() {
                            forwarding = false;
                        }
                    }
                    Err(e) => {
                        debug!("stream reader stopped: {}", e);
                        break;
                    }
                }
            }
        });
        Self { rx, pump, eof: false }
    }

    /// Next line, or `None` when nothing arrives within `timeout` or the stream ended
    pub async fn readline(&mut self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                self.eof = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Collect lines until the stream goes quiet for `timeout`
    pub async fn read(&mut self, timeout: Duration) -> String {
        let mut lines = Vec::new();
        while let Some(line) = self.readline(timeout).await {
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Stop delivering lines
    ///
    /// The pump keeps draining the pipe in the background and discards what
    /// it reads, so the child process is never stalled by a full pipe.
    pub fn kill(&mut self) {
        self.rx.close();
    }

    /// True once a read has drained every line and found the stream closed
    pub fn reached_eof(&self) -> bool {
        self.eof
    }

    /// True once the underlying stream hit EOF or an error
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_readline_times_out_on_silent_stream() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut nbsr = NonBlockingStreamReader::new(reader);
        assert_eq!(nbsr.readline(Duration::from_millis(50)).await, None);
        assert!(!nbsr.reached_eof());
    }

    #[tokio::test]
    async fn test_read_collects_until_quiet() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let mut nbsr = NonBlockingStreamReader::new(reader);

        writer.write_all(b"PID: 1234\r\nINFO: ready\n").await.unwrap();
        let text = nbsr.read(Duration::from_millis(200)).await;
        assert_eq!(text, "PID: 1234\nINFO: ready");

        // stream stays open and later lines are still delivered
        writer.write_all(b"late\n").await.unwrap();
        assert_eq!(
            nbsr.readline(Duration::from_millis(200)).await.as_deref(),
            Some("late")
        );
    }

    #[tokio::test]
    async fn test_kill_keeps_draining() {
        let (mut writer, reader) = tokio::io::duplex(16);
        let mut nbsr = NonBlockingStreamReader::new(reader);
        nbsr.kill();

        // far more than the duplex buffer; would stall if nobody drained it
        let payload = vec![b'x'; 4096];
        tokio::time::timeout(Duration::from_secs(2), writer.write_all(&payload))
            .await
            .expect("writer stalled after kill")
            .unwrap();
        assert_eq!(nbsr.readline(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_finished_after_eof() {
        let (writer, reader) = tokio::io::duplex(16);
        let mut nbsr = NonBlockingStreamReader::new(reader);
        drop(writer);
        assert_eq!(nbsr.readline(Duration::from_millis(200)).await, None);
        assert!(nbsr.reached_eof());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(nbsr.is_finished());
    }
}
