//! The four hardware channel workers of a delivery and the harness that runs
//! each of them on its own thread.
//!
//! A worker owns one hardware resource for the length of a delivery. It
//! checks the shared [CancelToken] at every suspension point and reports how
//! it ended; hardware errors end the worker that hit them and nothing else.

mod accelerometer;
mod telemetry_log;
mod thermal;
mod vibration;

pub use accelerometer::AccelerometerSampler;
pub use telemetry_log::TelemetryReceiver;
pub use thermal::ThermalWriter;
pub use vibration::VibrationDriver;

use crate::session::{CancelToken, ChannelRole};
use log::{error, info, warn};
use std::{
    fmt, io,
    thread::{self, JoinHandle},
};

/// How a worker finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Ran for its whole duration
    Completed,
    /// Noticed the cancellation flag and wound down
    Stopped,
    /// Hit a hardware error, which was logged
    Failed(String),
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerOutcome::Completed => write!(f, "completed"),
            WorkerOutcome::Stopped => write!(f, "stopped"),
            WorkerOutcome::Failed(why) => write!(f, "failed ({})", why),
        }
    }
}

///
/// One hardware channel of a delivery. Every worker runs on its own thread
/// via [run_worker] and terminates on its own once its duration is up.
///
pub trait Worker: fmt::Display + Send {
    /// The channel this worker drives or records.
    fn role(&self) -> ChannelRole;

    /// Whether the worker ever looks at the cancellation flag.
    fn polls_cancellation(&self) -> bool {
        true
    }

    /// Does the work. Must not panic on hardware errors.
    fn run(self: Box<Self>, cancel: &CancelToken) -> WorkerOutcome;
}

/// Runs the given worker on its own named thread.
pub fn run_worker(
    worker: Box<dyn Worker>,
    cancel: CancelToken,
) -> io::Result<JoinHandle<WorkerOutcome>> {
    let name = format!("thermovib-{}", worker.role());
    thread::Builder::new().name(name).spawn(move || {
        let label = worker.to_string();
        info!("{} : started.", label);
        let outcome = worker.run(&cancel);
        match &outcome {
            WorkerOutcome::Failed(why) => error!("{} : terminated with error {}.", label, why),
            WorkerOutcome::Stopped => warn!("{} : stopped on request.", label),
            WorkerOutcome::Completed => info!("{} : terminated.", label),
        }
        outcome
    })
}

/// Waits for a worker thread, turning a panic into a failure.
pub fn join_worker(role: ChannelRole, handle: JoinHandle<WorkerOutcome>) -> WorkerOutcome {
    handle.join().unwrap_or_else(|_| {
        error!("{} worker panicked", role);
        WorkerOutcome::Failed("panicked".to_owned())
    })
}
