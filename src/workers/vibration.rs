use super::{Worker, WorkerOutcome};
use crate::daq::{DaqBackend, DaqError};
use crate::session::{CancelToken, ChannelRole};
use log::warn;
use std::{fmt, sync::Arc, time::Duration};

/// Clocks the synthesized waveform out of the analog output and waits for it
/// to finish, aborting the task if the delivery is stopped.
pub struct VibrationDriver {
    daq: Arc<dyn DaqBackend>,
    channel: String,
    waveform: Arc<[f64]>,
    sample_rate: u32,
    poll: Duration,
}

impl VibrationDriver {
    /// A driver writing `waveform` to `channel` at `sample_rate`, checking for
    /// completion every 10 ms.
    pub fn new(
        daq: Arc<dyn DaqBackend>,
        channel: impl Into<String>,
        waveform: Arc<[f64]>,
        sample_rate: u32,
    ) -> Self {
        Self {
            daq,
            channel: channel.into(),
            waveform,
            sample_rate,
            poll: Duration::from_millis(10),
        }
    }

    fn drive(&self, cancel: &CancelToken) -> Result<WorkerOutcome, DaqError> {
        let mut task = self.daq.analog_output(&self.channel)?;
        task.start_finite(&self.waveform, self.sample_rate)?;
        loop {
            if task.is_done()? {
                return Ok(WorkerOutcome::Completed);
            }
            if cancel.sleep(self.poll, self.poll) {
                task.abort()?;
                warn!("{} : output aborted", self);
                return Ok(WorkerOutcome::Stopped);
            }
        }
    }
}

impl fmt::Display for VibrationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VibrationDriver[{}, {} samples @ {} Hz]",
            self.channel,
            self.waveform.len(),
            self.sample_rate
        )
    }
}

impl Worker for VibrationDriver {
    fn role(&self) -> ChannelRole {
        ChannelRole::AnalogOut
    }

    fn run(self: Box<Self>, cancel: &CancelToken) -> WorkerOutcome {
        self.drive(cancel)
            .unwrap_or_else(|e| WorkerOutcome::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_rig::SimulatedDaq;
    use std::{thread, time::Instant};

    #[test]
    fn runs_for_the_waveform_length() {
        let daq = Arc::new(SimulatedDaq::new());
        let driver = VibrationDriver::new(daq.clone(), "Dev1/ao0", Arc::from(vec![0.1; 1000]), 10000);

        let start = Instant::now();
        assert_eq!(
            Box::new(driver).run(&CancelToken::new()),
            WorkerOutcome::Completed
        );
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(daq.samples_written(), 1000);
    }

    #[test]
    fn stop_aborts_the_output() {
        let daq = Arc::new(SimulatedDaq::new());
        let driver = VibrationDriver::new(daq, "Dev1/ao0", Arc::from(vec![0.0; 100_000]), 10000);
        let token = CancelToken::new();

        let th = {
            let token = token.clone();
            thread::spawn(move || Box::new(driver).run(&token))
        };
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        assert_eq!(th.join().unwrap(), WorkerOutcome::Stopped);
    }

    #[test]
    fn missing_channel_is_a_failure() {
        let daq = Arc::new(SimulatedDaq::new());
        let driver = VibrationDriver::new(daq, "Dev9/ai7", Arc::from(vec![0.0; 10]), 10000);
        assert!(matches!(
            Box::new(driver).run(&CancelToken::new()),
            WorkerOutcome::Failed(_)
        ));
    }
}
