use super::{Worker, WorkerOutcome};
use crate::serial_link::SerialLink;
use crate::session::{CancelToken, ChannelRole};
use crate::status::{StatusEvent, StatusSender};
use crate::telemetry::setpoint_line;
use log::{debug, error, warn};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// Gap between the `start` marker and the first setpoint.
const ARM_DELAY: Duration = Duration::from_millis(50);

/// How often the flag is checked while waiting for the next tick.
const TICK_POLL: Duration = Duration::from_millis(10);

/// Streams the quantized setpoints to the thermal actuator, one per tick.
///
/// However the loop ends, the actuator is sent `0.0` and `end` so it heads
/// back to baseline.
pub struct ThermalWriter {
    link: Arc<dyn SerialLink>,
    setpoints: Arc<[f64]>,
    interval: Duration,
    on_start: Option<Arc<StatusSender>>,
}

impl ThermalWriter {
    /// A writer sending `setpoints` over `link` at `thermal_rate` per second.
    /// `on_start` receives [StatusEvent::Start] once the `start` marker is on
    /// the wire.
    pub fn new(
        link: Arc<dyn SerialLink>,
        setpoints: Arc<[f64]>,
        thermal_rate: u32,
        on_start: Option<Arc<StatusSender>>,
    ) -> Self {
        Self {
            link,
            setpoints,
            interval: Duration::from_secs_f64(1.0 / thermal_rate.max(1) as f64),
            on_start,
        }
    }

    fn stream(&self, cancel: &CancelToken) -> WorkerOutcome {
        if let Err(e) = self.link.send(b"start\n") {
            return WorkerOutcome::Failed(format!("could not send start: {}", e));
        }
        if let Some(status) = &self.on_start {
            status.publish(StatusEvent::Start);
            debug!("Published start event");
        }
        if cancel.sleep(ARM_DELAY, TICK_POLL) {
            return WorkerOutcome::Stopped;
        }

        let first_tick = Instant::now();
        for (i, &delta) in self.setpoints.iter().enumerate() {
            if cancel.is_cancelled() {
                return WorkerOutcome::Stopped;
            }
            if let Err(e) = self.link.send(setpoint_line(delta).as_bytes()) {
                return WorkerOutcome::Failed(format!("setpoint {}: {}", i, e));
            }
            debug!("[Thermal {:04}] Sent dT: {:.2}", i, delta);

            let next_tick = first_tick + self.interval * (i as u32 + 1);
            let wait = next_tick.saturating_duration_since(Instant::now());
            if cancel.sleep(wait, TICK_POLL) {
                return WorkerOutcome::Stopped;
            }
        }
        WorkerOutcome::Completed
    }

    fn return_to_baseline(&self) -> Result<(), std::io::Error> {
        self.link.send(b"0.0\n")?;
        self.link.send(b"end\n")
    }
}

impl fmt::Display for ThermalWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThermalWriter[{} setpoints]", self.setpoints.len())
    }
}

impl Worker for ThermalWriter {
    fn role(&self) -> ChannelRole {
        ChannelRole::Thermal
    }

    fn run(self: Box<Self>, cancel: &CancelToken) -> WorkerOutcome {
        let outcome = self.stream(cancel);

        if let Err(e) = self.return_to_baseline() {
            error!("{} : could not return actuator to baseline: {}", self, e);
            if outcome == WorkerOutcome::Completed {
                return WorkerOutcome::Failed(format!("baseline: {}", e));
            }
        } else if outcome == WorkerOutcome::Stopped {
            warn!("{} : stopped early, actuator sent back to baseline", self);
        }
        outcome
    }
}
