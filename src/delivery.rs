//! The delivery orchestrator. Turns a request into a waveform and a setpoint
//! schedule, then plays both across the rig's four hardware channels at
//! once and reports how each of them ended.
//!
//! A delivery that cannot reach the thermal actuator starts nothing. Once
//! the workers are running, a failure in one of them is logged and leaves
//! the others alone.

use crate::audit::{persist_request, AuditError, LogPaths};
use crate::config::RigConfig;
use crate::daq::DaqBackend;
use crate::request::{RequestError, StimulusRequest};
use crate::serial_link::{acquire, ConnectError, SerialConnector, SerialLink};
use crate::session::{CancelToken, ChannelRole, DeliverySession};
use crate::status::{self, StatusEvent, StatusReceiver, StatusSender};
use crate::synthesizer::{sample_count, FrequencyScale, GeneratedSignal, Synthesizer};
use crate::workers::{
    join_worker, run_worker, AccelerometerSampler, TelemetryReceiver, ThermalWriter,
    VibrationDriver, Worker, WorkerOutcome,
};
use log::{debug, error, info, warn};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt, io,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Why a delivery never got going, or could not be collected.
#[derive(Debug)]
pub enum DeliveryError {
    /// The request was refused before any synthesis or hardware access.
    InvalidRequest(RequestError),

    /// The audit copy of the request could not be written.
    Audit(AuditError),

    /// The thermal actuator could not be reached; no worker was started.
    HardwareUnavailable(ConnectError),

    /// The orchestrator thread could not be spawned.
    Spawn(io::Error),

    /// The orchestrator thread panicked.
    Panicked,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DeliveryError as DE;
        let msg = match self {
            DE::InvalidRequest(error) => Cow::from(format!("invalid request: {}", error)),
            DE::Audit(error) => Cow::from(format!("could not save request: {}", error)),
            DE::HardwareUnavailable(error) => Cow::from(format!("hardware unavailable: {}", error)),
            DE::Spawn(error) => Cow::from(format!("could not start delivery: {}", error)),
            DE::Panicked => Cow::from("delivery thread panicked"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DeliveryError {}

impl From<RequestError> for DeliveryError {
    fn from(error: RequestError) -> Self {
        DeliveryError::InvalidRequest(error)
    }
}

impl From<AuditError> for DeliveryError {
    fn from(error: AuditError) -> Self {
        DeliveryError::Audit(error)
    }
}

impl From<ConnectError> for DeliveryError {
    fn from(error: ConnectError) -> Self {
        DeliveryError::HardwareUnavailable(error)
    }
}

/// How a finished delivery went, channel by channel.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Outcome of every worker that was started
    pub outcomes: BTreeMap<ChannelRole, WorkerOutcome>,
    /// Files the delivery wrote
    pub paths: LogPaths,
}

impl DeliveryReport {
    /// Whether every channel ran to completion.
    pub fn all_completed(&self) -> bool {
        self.outcomes.len() == ChannelRole::ALL.len()
            && self
                .outcomes
                .values()
                .all(|o| *o == WorkerOutcome::Completed)
    }
}

/// A running delivery.
pub struct DeliveryHandle {
    session: Arc<DeliverySession>,
    thread: JoinHandle<DeliveryReport>,
}

impl DeliveryHandle {
    /// Asks every worker of this delivery to wind down and returns at once.
    /// Does nothing if the delivery has already finished.
    pub fn stop(&self) -> Vec<ChannelRole> {
        self.session.stop()
    }

    /// Whether the orchestrator has joined every worker.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Channels that are registered and not yet stopped or finished.
    pub fn active_roles(&self) -> Vec<ChannelRole> {
        self.session.active_roles()
    }

    /// Waits for the delivery to finish.
    pub fn join(self) -> Result<DeliveryReport, DeliveryError> {
        self.thread.join().map_err(|_| DeliveryError::Panicked)
    }
}

///
/// A stimulation rig: the synthesizer and the hardware it delivers through.
///
/// Each call to [Rig::deliver] gets its own [DeliverySession], so stopping
/// one delivery can never touch another.
///
pub struct Rig {
    config: RigConfig,
    synthesizer: Synthesizer,
    serial: Box<dyn SerialConnector>,
    daq: Arc<dyn DaqBackend>,
    latest: Mutex<Option<Arc<DeliverySession>>>,
}

impl Rig {
    /// Assembles a rig from its parts.
    pub fn new(
        config: RigConfig,
        synthesizer: Synthesizer,
        serial: Box<dyn SerialConnector>,
        daq: Arc<dyn DaqBackend>,
    ) -> Self {
        Self {
            config,
            synthesizer,
            serial,
            daq,
            latest: Mutex::new(None),
        }
    }

    /// The rig's configuration.
    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// The rig's synthesizer.
    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    /// Synthesizes `request` without touching any hardware.
    pub fn synthesize(&self, request: &StimulusRequest) -> Result<GeneratedSignal, RequestError> {
        self.synthesizer
            .generate(request, FrequencyScale::from_log(self.config.log_scale))
    }

    /// Starts delivering `request`.
    ///
    /// Synthesis, the audit write and the serial connection all happen
    /// before this returns, so any error here means no worker ran. The
    /// returned receiver sees `start` once the thermal writer is on the wire
    /// and `end` once every worker has been joined.
    pub fn deliver(
        &self,
        request: &StimulusRequest,
    ) -> Result<(DeliveryHandle, StatusReceiver), DeliveryError> {
        let signal = self.synthesize(request)?;
        info!(
            "Synthesized {} samples @ {} Hz and {} setpoints for {}",
            signal.vibration.len(),
            signal.sample_rate,
            signal.setpoints.len(),
            request.user_id
        );

        let paths = persist_request(&self.config.save_dir, request)?;
        debug!("Saved request to {}", paths.request_json.display());

        let link = acquire(self.serial.as_ref(), &self.config.retry)?;

        let (status_tx, status_rx) =
            status::channel(self.config.status_capacity, self.config.keep_alive());
        let status = Arc::new(status_tx);
        let workers = self.workers(request.duration, &signal, &link, &paths, &status);

        let session = Arc::new(DeliverySession::new());
        for worker in &workers {
            session.register(worker.role(), worker.polls_cancellation());
        }

        let plan = Plan {
            settle: self.config.settle(),
            link,
            workers,
            paths,
            status,
        };
        let token = session.token();
        let thread = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name("thermovib-delivery".to_owned())
                .spawn(move || plan.run(&session, token))
                .map_err(DeliveryError::Spawn)?
        };
        *self.lock_latest() = Some(Arc::clone(&session));

        Ok((DeliveryHandle { session, thread }, status_rx))
    }

    /// One worker per channel, in start order.
    fn workers(
        &self,
        total_duration: f64,
        signal: &GeneratedSignal,
        link: &Arc<dyn SerialLink>,
        paths: &LogPaths,
        status: &Arc<StatusSender>,
    ) -> [Box<dyn Worker>; 4] {
        let rate = signal.sample_rate;
        let accel_samples = sample_count(total_duration, rate as f64);
        let telemetry_for =
            Duration::from_secs_f64(total_duration) + self.config.telemetry_grace();

        [
            Box::new(ThermalWriter::new(
                Arc::clone(link),
                Arc::from(signal.setpoints.as_slice()),
                self.config.thermal_rate,
                Some(Arc::clone(status)),
            )),
            Box::new(TelemetryReceiver::new(
                Arc::clone(link),
                &paths.telemetry_csv,
                telemetry_for,
                self.config.serial_poll(),
            )),
            Box::new(VibrationDriver::new(
                Arc::clone(&self.daq),
                self.config.ao_channel.as_str(),
                Arc::from(signal.vibration.as_slice()),
                rate,
            )),
            Box::new(AccelerometerSampler::new(
                Arc::clone(&self.daq),
                self.config.ai_channels.as_str(),
                &paths.accel_csv,
                accel_samples,
                rate,
            )),
        ]
    }

    /// Stops the most recently started delivery, if it is still running.
    pub fn stop_latest(&self) -> Vec<ChannelRole> {
        match self.lock_latest().as_ref() {
            Some(session) => session.stop(),
            None => Vec::new(),
        }
    }

    fn lock_latest(&self) -> std::sync::MutexGuard<'_, Option<Arc<DeliverySession>>> {
        match self.latest.lock() {
            Ok(latest) => latest,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Everything the orchestrator thread needs, moved onto it.
struct Plan {
    settle: Duration,
    link: Arc<dyn SerialLink>,
    workers: [Box<dyn Worker>; 4],
    paths: LogPaths,
    status: Arc<StatusSender>,
}

impl Plan {
    fn run(self, session: &DeliverySession, token: CancelToken) -> DeliveryReport {
        // the actuator resets when the port opens
        if token.sleep(self.settle, Duration::from_millis(50)) {
            warn!("Stopped while waiting for the actuator to settle");
        }
        if let Err(e) = self.link.discard_input() {
            warn!("Could not discard stale serial input: {}", e);
        }

        let mut handles = Vec::new();
        let mut outcomes = BTreeMap::new();
        for worker in self.workers {
            let role = worker.role();
            match run_worker(worker, token.clone()) {
                Ok(handle) => handles.push((role, handle)),
                Err(e) => {
                    error!("Could not start {} worker: {}", role, e);
                    outcomes.insert(role, WorkerOutcome::Failed(e.to_string()));
                }
            }
        }

        for (role, handle) in handles {
            let outcome = join_worker(role, handle);
            debug!("{} worker {}", role, outcome);
            outcomes.insert(role, outcome);
        }

        self.status.publish(StatusEvent::End);
        session.clear();
        info!("Delivery finished: {:?}", outcomes);

        DeliveryReport {
            outcomes,
            paths: self.paths,
        }
    }
}
