//! The state one delivery shares with its workers: a set-once cancellation
//! flag and the registry of workers that are currently running.
//!
//! Each delivery owns its own [DeliverySession]; nothing here is process
//! wide, so two deliveries can never see each other's workers.

use log::{debug, info, warn};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

/// A cooperative cancellation flag. Workers poll it; only an external stop
/// sets it, and once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `total`, waking every `poll` to check the flag. Returns
    /// `true` if the sleep was cut short by cancellation.
    pub fn sleep(&self, total: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            spin_sleep::sleep(poll.min(deadline - now));
        }
    }
}

/// The hardware channel a worker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelRole {
    /// Serial setpoint writer to the thermal actuator
    Thermal,
    /// Serial telemetry log receiver
    Telemetry,
    /// Analog output driving the vibration actuator
    AnalogOut,
    /// Analog input sampling the accelerometer
    AnalogIn,
}

impl ChannelRole {
    /// Every role, in the order workers are started.
    pub const ALL: [ChannelRole; 4] = [
        ChannelRole::Thermal,
        ChannelRole::Telemetry,
        ChannelRole::AnalogOut,
        ChannelRole::AnalogIn,
    ];
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelRole::Thermal => "thermal",
            ChannelRole::Telemetry => "telemetry",
            ChannelRole::AnalogOut => "analog-out",
            ChannelRole::AnalogIn => "analog-in",
        };
        write!(f, "{}", name)
    }
}

/// A registry entry. Workers that never poll the flag are registered
/// without one, and a stop can only log them.
#[derive(Debug, Clone)]
struct Registration {
    token: Option<CancelToken>,
    since: Instant,
}

/// One delivery's cancellation flag and worker registry.
#[derive(Debug, Default)]
pub struct DeliverySession {
    cancel: CancelToken,
    registry: Mutex<BTreeMap<ChannelRole, Registration>>,
}

impl DeliverySession {
    /// A session with an unset flag and no workers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag shared by every worker of this session.
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Records that a worker for `role` is about to start. `polls_cancel`
    /// says whether the worker will ever look at the flag.
    pub fn register(&self, role: ChannelRole, polls_cancel: bool) {
        let token = polls_cancel.then(|| self.cancel.clone());
        let mut registry = self.lock();
        if registry
            .insert(
                role,
                Registration {
                    token,
                    since: Instant::now(),
                },
            )
            .is_some()
        {
            warn!("Replaced an existing {} worker registration", role);
        }
        debug!("Registered {} worker", role);
    }

    /// Roles currently registered.
    pub fn active_roles(&self) -> Vec<ChannelRole> {
        self.lock().keys().copied().collect()
    }

    /// Whether a worker for `role` is registered.
    pub fn is_active(&self, role: ChannelRole) -> bool {
        self.lock().contains_key(&role)
    }

    /// Asks every registered worker to stop and empties the registry. Does not
    /// wait for anything to exit. Returns the roles that were asked to stop.
    pub fn stop(&self) -> Vec<ChannelRole> {
        let drained = std::mem::take(&mut *self.lock());
        if drained.is_empty() {
            debug!("Stop requested with no active workers");
            return Vec::new();
        }

        drained
            .into_iter()
            .map(|(role, reg)| {
                match reg.token {
                    Some(token) => {
                        token.cancel();
                        info!(
                            "Requested stop of {} worker after {:.2}s",
                            role,
                            reg.since.elapsed().as_secs_f64()
                        );
                    }
                    None => warn!("Cannot stop {} worker, leaving it to finish", role),
                }
                role
            })
            .collect()
    }

    /// Empties the registry after a normal finish.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ChannelRole, Registration>> {
        match self.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_sets_flag_and_clears_registry() {
        let session = DeliverySession::new();
        let token = session.token();
        for role in ChannelRole::ALL {
            session.register(role, true);
        }
        assert_eq!(session.active_roles(), ChannelRole::ALL.to_vec());
        assert!(session.is_active(ChannelRole::Thermal));

        let stopped = session.stop();
        assert_eq!(stopped.len(), 4);
        assert!(token.is_cancelled());
        assert!(session.active_roles().is_empty());
        assert!(!session.is_active(ChannelRole::Thermal));
    }

    #[test]
    fn stop_after_completion_is_a_no_op() {
        let session = DeliverySession::new();
        session.register(ChannelRole::Thermal, true);
        assert!(!session.is_active(ChannelRole::AnalogOut));
        session.clear();
        assert!(!session.is_active(ChannelRole::Thermal));

        assert!(session.stop().is_empty());
        assert!(!session.token().is_cancelled());
    }

    #[test]
    fn unpollable_worker_is_only_noted() {
        let session = DeliverySession::new();
        session.register(ChannelRole::AnalogIn, false);
        assert_eq!(session.stop(), vec![ChannelRole::AnalogIn]);
        assert!(!session.token().is_cancelled());
    }

    #[test]
    fn cancellable_sleep_returns_early() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(30), Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(30));

        token.cancel();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10), Duration::from_millis(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn roles_print_like_the_wire_names() {
        let names: Vec<String> = ChannelRole::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, ["thermal", "telemetry", "analog-out", "analog-in"]);
    }
}
