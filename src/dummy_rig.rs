//! A software stand-in for the whole rig: a thermal actuator that answers on
//! a fake serial link, a vibration output that takes as long as the real one
//! would, and a noisy accelerometer. Used by the tests and by `--simulate`.

use crate::daq::{AnalogInput, AnalogOutput, DaqBackend, DaqError, Frame};
use crate::serial_link::{SerialConnector, SerialLink};
use crate::telemetry::RECEIVED_MARKER;
use log::debug;
use rand::prelude::*;
use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

#[derive(Debug)]
struct ActuatorState {
    pending: Vec<u8>,
    outgoing: VecDeque<u8>,
    sent: Vec<String>,
    temperature: f64,
    delta: f64,
}

/// A thermal actuator living behind a fake serial link.
///
/// Every complete line it is sent is recorded, and every numeric setpoint
/// nudges a first order temperature model and produces a telemetry line in
/// the firmware's format.
#[derive(Debug)]
pub struct SimulatedActuator {
    state: Mutex<ActuatorState>,
    readable: Condvar,
    baseline: f64,
    poll: Duration,
    booted: Instant,
    broken: AtomicBool,
}

impl SimulatedActuator {
    /// An actuator resting at `baseline` degrees whose reads time out after
    /// `poll`.
    pub fn new(baseline: f64, poll: Duration) -> Self {
        Self {
            state: Mutex::new(ActuatorState {
                pending: Vec::new(),
                outgoing: VecDeque::new(),
                sent: Vec::new(),
                temperature: baseline,
                delta: 0.0,
            }),
            readable: Condvar::new(),
            baseline,
            poll,
            booted: Instant::now(),
            broken: AtomicBool::new(false),
        }
    }

    /// Every line received so far, without the newline.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Queues raw bytes as if the firmware had printed them.
    pub fn inject(&self, raw: &str) {
        self.lock().outgoing.extend(raw.as_bytes());
        self.readable.notify_all();
    }

    /// Makes every later write fail, like a cable pulled mid-run.
    pub fn unplug(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActuatorState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn respond(&self, state: &mut ActuatorState, line: &str) {
        if let Ok(delta) = line.parse::<f64>() {
            state.delta = delta;
        }
        let setpoint = self.baseline + state.delta;
        state.temperature += (setpoint - state.temperature) * 0.3;
        let pwm = ((setpoint - state.temperature) * 100.0).clamp(0.0, 255.0) as u8;

        let telemetry = format!(
            "{},{:.2},{:.2},{:.2},{},{} {}\n",
            self.booted.elapsed().as_millis(),
            state.temperature,
            setpoint,
            state.delta,
            pwm,
            RECEIVED_MARKER,
            line
        );
        state.outgoing.extend(telemetry.as_bytes());
    }
}

impl SerialLink for SimulatedActuator {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let mut state = self.lock();
        for &c in bytes {
            if c != b'\n' {
                state.pending.push(c);
                continue;
            }
            let line = String::from_utf8_lossy(&state.pending).into_owned();
            state.pending.clear();
            debug!("Simulated actuator got {:?}", line);
            self.respond(&mut state, &line);
            state.sent.push(line);
        }
        self.readable.notify_all();
        Ok(())
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.outgoing.is_empty() {
            state = match self.readable.wait_timeout(state, self.poll) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        if state.outgoing.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(state.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&self) -> io::Result<()> {
        self.lock().outgoing.clear();
        Ok(())
    }
}

/// Hands out the same [SimulatedActuator], optionally refusing the first few
/// attempts.
#[derive(Debug)]
pub struct SimulatedConnector {
    actuator: Arc<SimulatedActuator>,
    refusals: AtomicU32,
    attempts: AtomicU32,
}

impl SimulatedConnector {
    /// A connector that succeeds after `refusals` failed attempts.
    pub fn new(actuator: Arc<SimulatedActuator>, refusals: u32) -> Self {
        Self {
            actuator,
            refusals: AtomicU32::new(refusals),
            attempts: AtomicU32::new(0),
        }
    }

    /// Connection attempts seen so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SerialConnector for SimulatedConnector {
    fn connect(&self) -> io::Result<Arc<dyn SerialLink>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .is_ok();
        if refused {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "simulated actuator not ready",
            ));
        }
        Ok(Arc::clone(&self.actuator) as Arc<dyn SerialLink>)
    }

    fn describe(&self) -> String {
        "simulated actuator".to_owned()
    }
}

/// Analog tasks that keep real time but touch no hardware.
#[derive(Debug, Default)]
pub struct SimulatedDaq {
    noise: f64,
    fail_reads: bool,
    written: Arc<AtomicUsize>,
}

impl SimulatedDaq {
    /// A backend whose accelerometer reads gravity on Z plus a little noise.
    pub fn new() -> Self {
        Self {
            noise: 0.01,
            ..Self::default()
        }
    }

    /// Sets the accelerometer noise amplitude.
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Makes every accelerometer read fail.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Number of samples handed to the most recent output task.
    pub fn samples_written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

impl DaqBackend for SimulatedDaq {
    fn analog_output(&self, channel: &str) -> Result<Box<dyn AnalogOutput>, DaqError> {
        if !channel.contains("ao") {
            return Err(DaqError::NoSuchChannel(channel.to_owned()));
        }
        Ok(Box::new(SimulatedOutput {
            run: None,
            written: Arc::clone(&self.written),
        }))
    }

    fn analog_input(&self, channels: &str) -> Result<Box<dyn AnalogInput>, DaqError> {
        if !channels.contains("ai") {
            return Err(DaqError::NoSuchChannel(channels.to_owned()));
        }
        Ok(Box::new(SimulatedAccelerometer {
            noise: self.noise,
            fail_reads: self.fail_reads,
            run: None,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    started: Instant,
    length: Duration,
}

struct SimulatedOutput {
    run: Option<Run>,
    written: Arc<AtomicUsize>,
}

impl AnalogOutput for SimulatedOutput {
    fn start_finite(&mut self, samples: &[f64], sample_rate: u32) -> Result<(), DaqError> {
        if sample_rate == 0 {
            return Err(DaqError::Device("sample rate must be positive".to_owned()));
        }
        self.written.store(samples.len(), Ordering::SeqCst);
        self.run = Some(Run {
            started: Instant::now(),
            length: Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64),
        });
        Ok(())
    }

    fn is_done(&mut self) -> Result<bool, DaqError> {
        let run = self.run.ok_or(DaqError::NotStarted)?;
        Ok(run.started.elapsed() >= run.length)
    }

    fn abort(&mut self) -> Result<(), DaqError> {
        self.run = None;
        Ok(())
    }
}

struct SimulatedAccelerometer {
    noise: f64,
    fail_reads: bool,
    run: Option<(Run, usize, usize, u32)>,
}

impl AnalogInput for SimulatedAccelerometer {
    fn start_finite(
        &mut self,
        samples_per_channel: usize,
        sample_rate: u32,
    ) -> Result<(), DaqError> {
        if sample_rate == 0 {
            return Err(DaqError::Device("sample rate must be positive".to_owned()));
        }
        let run = Run {
            started: Instant::now(),
            length: Duration::from_secs_f64(samples_per_channel as f64 / sample_rate as f64),
        };
        self.run = Some((run, samples_per_channel, 0, sample_rate));
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<Frame>, DaqError> {
        let (run, total, produced, rate) = self.run.ok_or(DaqError::NotStarted)?;
        if self.fail_reads {
            return Err(DaqError::Device("simulated read failure".to_owned()));
        }

        let remaining = run.length.saturating_sub(run.started.elapsed());
        spin_sleep::sleep(timeout.min(remaining));

        let due = ((run.started.elapsed().as_secs_f64() * rate as f64) as usize).min(total);
        let mut rng = thread_rng();
        let noise = self.noise.max(f64::MIN_POSITIVE);
        let frames = (produced..due)
            .map(|_| {
                [
                    rng.gen_range(-noise..noise),
                    rng.gen_range(-noise..noise),
                    1.0 + rng.gen_range(-noise..noise),
                ]
            })
            .collect();
        self.run = Some((run, total, due.max(produced), rate));
        Ok(frames)
    }

    fn abort(&mut self) -> Result<(), DaqError> {
        self.run = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_link::LineReader;
    use crate::telemetry::TelemetryRecord;

    #[test]
    fn actuator_echoes_telemetry() {
        let actuator = SimulatedActuator::new(32.5, Duration::from_millis(10));
        actuator.send(b"start\n2.00\n").unwrap();

        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        while lines.len() < 2 {
            lines.extend(reader.poll(&actuator).unwrap());
        }
        let record: TelemetryRecord = lines[1].as_deref().unwrap().parse().unwrap();
        assert_eq!(record.setpoint, "34.50");
        assert_eq!(record.delta, "2.00");
        assert_eq!(record.received, "Received: 2.00");
        assert_eq!(actuator.sent_lines(), vec!["start", "2.00"]);
    }

    #[test]
    fn empty_link_times_out() {
        let actuator = SimulatedActuator::new(32.5, Duration::from_millis(5));
        let mut buf = [0; 16];
        let err = actuator.receive(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn connector_refuses_then_connects() {
        let actuator = Arc::new(SimulatedActuator::new(32.5, Duration::from_millis(5)));
        let connector = SimulatedConnector::new(actuator, 2);
        assert!(connector.connect().is_err());
        assert!(connector.connect().is_err());
        assert!(connector.connect().is_ok());
        assert_eq!(connector.attempts(), 3);
    }

    #[test]
    fn output_takes_real_time() {
        let daq = SimulatedDaq::new();
        let mut out = daq.analog_output("Dev1/ao0").unwrap();
        out.start_finite(&[0.0; 200], 10000).unwrap();
        assert!(!out.is_done().unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(out.is_done().unwrap());
        assert_eq!(daq.samples_written(), 200);
    }

    #[test]
    fn accelerometer_delivers_every_frame() {
        let daq = SimulatedDaq::new().noise(0.05);
        let mut input = daq.analog_input("Dev1/ai0:2").unwrap();
        input.start_finite(50, 1000).unwrap();

        let mut frames = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while frames.len() < 50 && Instant::now() < deadline {
            frames.extend(input.read_available(Duration::from_millis(10)).unwrap());
        }
        assert_eq!(frames.len(), 50);
        assert!(frames.iter().all(|f| (f[2] - 1.0).abs() <= 0.05));
    }

    #[test]
    fn unknown_channels_are_refused() {
        let daq = SimulatedDaq::new();
        assert!(daq.analog_output("Dev1/ai0").is_err());
        assert!(daq.analog_input("Dev1/ao0").is_err());
    }
}
