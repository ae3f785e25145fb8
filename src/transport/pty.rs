use super::{Transport, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;
use tracing::debug;

/// A console program running inside a PTY.
///
/// Output is read on a background thread and forwarded over a channel, so
/// [`read_nonblocking`](Transport::read_nonblocking) never blocks.
pub struct PtyTransport {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    disconnected: bool,
}

impl PtyTransport {
    /// Spawn `command` with `args` in a new 24x80 PTY.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let pty_system = portable_pty::native_pty_system();

        let pty_size = PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(command);
        for arg in args {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {command}"))?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        debug!(command, ?args, "spawned console program");

        Ok(PtyTransport {
            master: pair.master,
            child,
            writer,
            output_rx: spawn_reader(reader),
            pending: Vec::new(),
            disconnected: false,
        })
    }

    /// Check if the child process is still running
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Wait for the child process to exit
    pub fn wait(&mut self) -> Result<()> {
        self.child.wait()?;
        Ok(())
    }

    fn drain_channel(&mut self) {
        loop {
            match self.output_rx.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Transport for PtyTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
        self.drain_channel();
        if self.pending.is_empty() && self.disconnected {
            return Err(TransportError::Closed);
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn bytes_available(&mut self) -> bool {
        self.drain_channel();
        !self.pending.is_empty()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.is_running() {
            debug!("terminating console program");
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }
}

/// Reads the PTY on a background thread until EOF or error.
fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel();

    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%err, "PTY reader stopped");
                    break;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_reads_child_output() {
        let mut transport = PtyTransport::spawn("echo", &["pty_ok".to_string()]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut output = Vec::new();
        while Instant::now() < deadline {
            match transport.read_nonblocking() {
                Ok(chunk) => output.extend_from_slice(&chunk),
                Err(TransportError::Closed) => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
            if String::from_utf8_lossy(&output).contains("pty_ok") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(String::from_utf8_lossy(&output).contains("pty_ok"));
        transport.close().await.unwrap();
    }

    #[test]
    fn test_reader_forwards_chunks() {
        let rx = spawn_reader(std::io::Cursor::new(b"hello".to_vec()));
        let chunk = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(chunk, b"hello");
    }
}
