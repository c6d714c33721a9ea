use super::{Worker, WorkerOutcome};
use crate::daq::{DaqBackend, DaqError, Frame, ACCEL_HEADER};
use crate::session::{CancelToken, ChannelRole};
use log::{info, warn};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Samples the three accelerometer channels for the length of the delivery
/// and writes them as `X,Y,Z` rows.
///
/// The file only appears once acquisition is over. A stopped delivery keeps
/// the frames read so far; a failed read leaves no file at all.
pub struct AccelerometerSampler {
    daq: Arc<dyn DaqBackend>,
    channels: String,
    path: PathBuf,
    samples_per_channel: usize,
    sample_rate: u32,
    poll: Duration,
}

impl AccelerometerSampler {
    /// A sampler reading `samples_per_channel` frames from `channels` at
    /// `sample_rate` into `path`.
    pub fn new(
        daq: Arc<dyn DaqBackend>,
        channels: impl Into<String>,
        path: impl Into<PathBuf>,
        samples_per_channel: usize,
        sample_rate: u32,
    ) -> Self {
        Self {
            daq,
            channels: channels.into(),
            path: path.into(),
            samples_per_channel,
            sample_rate,
            poll: Duration::from_millis(50),
        }
    }

    fn acquire(&self, cancel: &CancelToken) -> Result<(Vec<Frame>, bool), DaqError> {
        let mut task = self.daq.analog_input(&self.channels)?;
        task.start_finite(self.samples_per_channel, self.sample_rate)?;

        let mut frames = Vec::with_capacity(self.samples_per_channel);
        while frames.len() < self.samples_per_channel {
            if cancel.is_cancelled() {
                task.abort()?;
                return Ok((frames, true));
            }
            frames.extend(task.read_available(self.poll)?);
        }
        frames.truncate(self.samples_per_channel);
        Ok((frames, false))
    }

    fn write(&self, frames: &[Frame]) -> Result<(), csv::Error> {
        let partial = partial_path(&self.path);
        let mut writer = csv::Writer::from_path(&partial)?;
        writer.write_record(ACCEL_HEADER)?;
        for frame in frames {
            writer.write_record(frame.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&partial, &self.path)?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl fmt::Display for AccelerometerSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccelerometerSampler[{}]", self.channels)
    }
}

impl Worker for AccelerometerSampler {
    fn role(&self) -> ChannelRole {
        ChannelRole::AnalogIn
    }

    fn run(self: Box<Self>, cancel: &CancelToken) -> WorkerOutcome {
        let (frames, stopped) = match self.acquire(cancel) {
            Ok(acquired) => acquired,
            Err(e) => return WorkerOutcome::Failed(e.to_string()),
        };
        if stopped {
            warn!(
                "{} : stopped after {} of {} frames",
                self,
                frames.len(),
                self.samples_per_channel
            );
        }
        if let Err(e) = self.write(&frames) {
            let _ = fs::remove_file(partial_path(&self.path));
            return WorkerOutcome::Failed(e.to_string());
        }
        info!("{} : wrote {} frames", self, frames.len());

        if stopped {
            WorkerOutcome::Stopped
        } else {
            WorkerOutcome::Completed
        }
    }
}
