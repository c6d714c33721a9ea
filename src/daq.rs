//! Analog I/O seams for the vibration actuator and the accelerometer.
//!
//! Both transfers are finite and clocked at the vibration sample rate. A
//! [DaqBackend] hands out a fresh device task per delivery, the way a
//! DAQmx-style driver opens one task per transfer.

use std::{borrow::Cow, fmt, time::Duration};

/// One accelerometer frame: X, Y, Z.
pub type Frame = [f64; 3];

/// Column names of the accelerometer log.
pub const ACCEL_HEADER: [&str; 3] = ["X", "Y", "Z"];

/// Hardware level failures. Workers log these and terminate; they never
/// reach sibling workers.
#[derive(Debug, Clone, PartialEq)]
pub enum DaqError {
    /// The named channel does not exist or could not be reserved.
    NoSuchChannel(String),

    /// The driver rejected the transfer.
    Device(String),

    /// Called out of order, e.g. polling before starting.
    NotStarted,
}

impl fmt::Display for DaqError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            DaqError::NoSuchChannel(name) => Cow::from(format!("no such channel {:?}", name)),
            DaqError::Device(what) => Cow::from(format!("device error: {}", what)),
            DaqError::NotStarted => Cow::from("transfer was never started"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DaqError {}

/// A finite, clocked analog output task.
pub trait AnalogOutput: Send {
    /// Loads `samples` and starts clocking them out at `sample_rate`.
    fn start_finite(&mut self, samples: &[f64], sample_rate: u32) -> Result<(), DaqError>;

    /// Whether every sample has been generated. Never blocks.
    fn is_done(&mut self) -> Result<bool, DaqError>;

    /// Stops generation early.
    fn abort(&mut self) -> Result<(), DaqError>;
}

/// A finite, clocked analog input task over three channels.
pub trait AnalogInput: Send {
    /// Starts acquiring `samples_per_channel` frames at `sample_rate`.
    fn start_finite(&mut self, samples_per_channel: usize, sample_rate: u32)
        -> Result<(), DaqError>;

    /// Returns the frames acquired since the last call, waiting at most
    /// `timeout` for some to arrive. An empty result is not an error.
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<Frame>, DaqError>;

    /// Stops acquisition early.
    fn abort(&mut self) -> Result<(), DaqError>;
}

/// Opens analog tasks by channel name.
pub trait DaqBackend: Send + Sync {
    /// An output task on `channel`, e.g. `Dev1/ao0`.
    fn analog_output(&self, channel: &str) -> Result<Box<dyn AnalogOutput>, DaqError>;

    /// An input task on `channels`, e.g. `Dev1/ai0:2`.
    fn analog_input(&self, channels: &str) -> Result<Box<dyn AnalogInput>, DaqError>;
}
