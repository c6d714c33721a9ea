//! ThermoVib drives a psychophysics rig that presents combined vibrotactile
//! and thermal stimuli to a participant's skin.
//!
//! A stimulus arrives as a small JSON request: sparse amplitude and
//! frequency envelopes for the vibration actuator, an optional thermal
//! offset envelope, and how long to play. The [synthesizer] turns that into
//! a full-rate, calibration-corrected drive waveform plus a schedule of
//! thermal setpoints. The [delivery] orchestrator then plays both at once:
//! setpoints go to the thermal actuator over a serial link, the waveform is
//! clocked out of an analog output, and the actuator's telemetry and an
//! accelerometer are logged alongside as ground truth.
//!
//! Every delivery runs four workers that share one cancellation flag, and
//! reports `start` and `end` on a [status] stream for whoever is watching.

#![warn(missing_docs)]
pub mod args;
pub mod audit;
pub mod calibration;
pub mod config;
pub mod daq;
pub mod delivery;
pub mod dummy_rig;
pub mod gui;
pub mod request;
pub mod resample;
pub mod serial_link;
pub mod session;
pub mod status;
pub mod synthesizer;
pub mod telemetry;
pub mod wav_export;
pub mod workers;
