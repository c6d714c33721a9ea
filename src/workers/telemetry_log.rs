use super::{Worker, WorkerOutcome};
use crate::serial_link::{LineReader, SerialLink};
use crate::session::{CancelToken, ChannelRole};
use crate::telemetry::{TelemetryRecord, TELEMETRY_HEADER};
use log::{debug, info, warn};
use std::{
    fmt,
    fs::File,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

/// Records the actuator's telemetry stream to a CSV file for the length of
/// the delivery plus a grace period.
///
/// Only lines with all six fields and the `Received:` marker are kept;
/// everything else the firmware prints is dropped.
pub struct TelemetryReceiver {
    link: Arc<dyn SerialLink>,
    path: PathBuf,
    duration: Duration,
    poll: Duration,
}

impl TelemetryReceiver {
    /// A receiver reading `link` for `duration` and writing rows to `path`.
    /// `poll` is the back-off after a failed read.
    pub fn new(
        link: Arc<dyn SerialLink>,
        path: impl Into<PathBuf>,
        duration: Duration,
        poll: Duration,
    ) -> Self {
        Self {
            link,
            path: path.into(),
            duration,
            poll,
        }
    }

    fn record(&self, cancel: &CancelToken) -> Result<(usize, bool), csv::Error> {
        let mut writer = csv::Writer::from_writer(File::create(&self.path)?);
        writer.write_record(TELEMETRY_HEADER)?;

        let mut reader = LineReader::new();
        let (mut kept, mut dropped) = (0, 0);
        let deadline = Instant::now() + self.duration;
        let mut stopped = false;

        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }
            let lines = match reader.poll(self.link.as_ref()) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("{} : read failed: {}", self, e);
                    spin_sleep::sleep(self.poll);
                    continue;
                }
            };
            for line in lines {
                match line.ok().and_then(|l| l.parse::<TelemetryRecord>().ok()) {
                    Some(record) => {
                        writer.write_record(record.fields())?;
                        kept += 1;
                    }
                    None => dropped += 1,
                }
            }
        }

        writer.flush()?;
        if dropped > 0 {
            debug!("{} : dropped {} non telemetry lines", self, dropped);
        }
        Ok((kept, stopped))
    }
}

impl fmt::Display for TelemetryReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TelemetryReceiver[{}]", self.path.display())
    }
}

impl Worker for TelemetryReceiver {
    fn role(&self) -> ChannelRole {
        ChannelRole::Telemetry
    }

    fn run(self: Box<Self>, cancel: &CancelToken) -> WorkerOutcome {
        match self.record(cancel) {
            Ok((kept, stopped)) => {
                info!("{} : logged {} rows", self, kept);
                if stopped {
                    WorkerOutcome::Stopped
                } else {
                    WorkerOutcome::Completed
                }
            }
            Err(e) => WorkerOutcome::Failed(e.to_string()),
        }
    }
}
