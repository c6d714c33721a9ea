//! The serial connection to the thermal actuator: a small trait so the
//! workers do not care whether they talk to a real port or the simulated
//! actuator, bounded-retry acquisition, and line assembly for the telemetry
//! stream.

use crate::config::RetryPolicy;
use log::{info, warn};
use serial2::SerialPort;
use std::{
    fmt, io,
    path::PathBuf,
    str,
    sync::Arc,
    thread::sleep,
    time::Duration,
};

/// A byte link to the thermal actuator, shared between the setpoint writer
/// and the telemetry receiver.
///
/// `receive` must not block for longer than the link's poll timeout, so
/// callers get a chance to look at their cancellation flag.
pub trait SerialLink: Send + Sync {
    /// Writes all of `bytes`.
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Reads whatever is available into `buf`. Times out with
    /// [io::ErrorKind::TimedOut] when nothing arrives.
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Throws away anything received but not yet read.
    fn discard_input(&self) -> io::Result<()>;
}

impl SerialLink for SerialPort {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn discard_input(&self) -> io::Result<()> {
        self.discard_input_buffer()
    }
}

/// Something that can open a fresh [SerialLink] on demand.
pub trait SerialConnector: Send + Sync {
    /// Makes one attempt at opening the link.
    fn connect(&self) -> io::Result<Arc<dyn SerialLink>>;

    /// A human readable name for log lines.
    fn describe(&self) -> String;
}

/// Opens a real serial device with [serial2].
#[derive(Debug, Clone)]
pub struct PortConnector {
    path: PathBuf,
    baud_rate: u32,
    poll: Duration,
}

impl PortConnector {
    /// A connector for the device at `path`. Reads on the opened port time
    /// out after `poll`.
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32, poll: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            poll,
        }
    }
}

impl SerialConnector for PortConnector {
    fn connect(&self) -> io::Result<Arc<dyn SerialLink>> {
        let mut port = SerialPort::open(&self.path, self.baud_rate)?;
        port.set_read_timeout(self.poll)?;
        Ok(Arc::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path.display(), self.baud_rate)
    }
}

/// Every attempt to open the link failed.
#[derive(Debug)]
pub struct ConnectError {
    /// Attempts made
    pub attempts: u32,
    /// The error from the last attempt
    pub last_error: io::Error,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serial link unavailable after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for ConnectError {}

/// Tries `connector` up to `policy.attempts` times, waiting between
/// failures.
pub fn acquire(
    connector: &dyn SerialConnector,
    policy: &RetryPolicy,
) -> Result<Arc<dyn SerialLink>, ConnectError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match connector.connect() {
            Ok(link) => {
                info!(
                    "Connected to {} on attempt {}",
                    connector.describe(),
                    attempt + 1
                );
                return Ok(link);
            }
            Err(e) if attempt + 1 >= attempts => {
                warn!("Could not connect to {}: {}", connector.describe(), e);
                return Err(ConnectError {
                    attempts,
                    last_error: e,
                });
            }
            Err(e) => {
                let wait = policy.delay(attempt);
                warn!(
                    "Retry {}/{} for {} in {:.1}s: {}",
                    attempt + 1,
                    attempts,
                    connector.describe(),
                    wait.as_secs_f64(),
                    e
                );
                sleep(wait);
                attempt += 1;
            }
        }
    }
}

/// Reassembles newline terminated lines from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct LineReader {
    read_buf: Vec<u8>,
}

impl LineReader {
    /// An empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Performs one read on `link` and returns every line it completed. A
    /// read that times out yields no lines. Lines that are not valid UTF-8
    /// come back as errors so the caller can count them.
    pub fn poll(&mut self, link: &dyn SerialLink) -> io::Result<Vec<Result<String, str::Utf8Error>>> {
        let mut buffer = [0; 256];
        let read_len = match link.receive(&mut buffer) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        Ok(self.feed(&buffer[..read_len]))
    }

    /// Adds raw bytes and returns the lines they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, str::Utf8Error>> {
        let mut lines = Vec::new();
        for &c in bytes {
            self.read_buf.push(c);
            if c == b'\n' {
                lines.push(str::from_utf8(&self.read_buf).map(|s| s.trim_end().to_owned()));
                self.read_buf.clear();
            }
        }
        lines
    }
}
