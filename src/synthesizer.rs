//! Turns sparse, normalized envelopes into the full-rate vibration drive
//! signal and the low-rate thermal setpoint sequence.
//!
//! Envelopes are resampled by index fraction: an envelope of any length is
//! laid over `[0, 1]`, and each output sample looks up its position along the
//! *full* signal timeline, even when only a prefix of it is played. Phase is
//! accumulated across the whole loop so frequency changes never click.

use crate::calibration::CalibrationTable;
use crate::request::{validate_durations, validate_envelope, RequestError, StimulusRequest};
use crate::resample::{interp_index, resample_fourier, stretch_linear};
use log::debug;
use std::f64::consts::TAU;

/// How a normalized frequency value is spread over the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyScale {
    /// `min + (max - min) * v`
    Linear,
    /// Equal steps in `v` are equal ratios in Hz
    Logarithmic,
}

impl FrequencyScale {
    /// Picks the scale from a `log_scale` switch.
    pub fn from_log(log_scale: bool) -> Self {
        if log_scale {
            Self::Logarithmic
        } else {
            Self::Linear
        }
    }
}

/// Maps `value` in `[0, 1]` into `[min, max]` Hz. The result is clamped to
/// the band, so the endpoints land exactly on `min` and `max`.
pub fn map_frequency(value: f64, min: f64, max: f64, scale: FrequencyScale) -> f64 {
    let freq = match scale {
        FrequencyScale::Linear => min + (max - min) * value,
        FrequencyScale::Logarithmic => {
            let (log_min, log_max) = (min.log10(), max.log10());
            10f64.powf(log_min + (log_max - log_min) * value)
        }
    };
    freq.clamp(min, max)
}

/// Whole samples that fit in `duration` seconds at `rate` Hz. Partial
/// samples are dropped; the epsilon absorbs products like `0.29 * 10000`
/// landing just under an integer.
pub fn sample_count(duration: f64, rate: f64) -> usize {
    (duration * rate + 1e-9).floor() as usize
}

/// A running oscillator phase. It is advanced once per sample and never
/// reset, so the waveform stays continuous however the frequency moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseAccumulator {
    phase: f64,
}

impl PhaseAccumulator {
    /// Advances by one sample at `freq` and returns the new phase.
    pub fn advance(&mut self, freq: f64, sample_rate: f64) -> f64 {
        self.phase += TAU * freq / sample_rate;
        self.phase
    }
}

/// Both outputs of a synthesis run. Produced once per delivery and only read
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSignal {
    /// Vibration drive samples at the vibration sample rate
    pub vibration: Vec<f64>,
    /// Thermal setpoints at the thermal update rate, quantized to 0.01
    pub setpoints: Vec<f64>,
    /// Sample rate the vibration waveform was rendered at
    pub sample_rate: u32,
}

/// Rounds a setpoint to two decimals, the resolution the actuator accepts.
pub fn quantize_setpoint(value: f64) -> f64 {
    let q = (value * 100.0).round() / 100.0;
    // keeps "-0.00" off the wire
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

/// Renders stimuli for one rig: a calibration table, the vibration sample
/// rate, and the thermal update rate.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    calibration: CalibrationTable,
    sample_rate: u32,
    thermal_rate: u32,
}

impl Synthesizer {
    /// Builds a synthesizer. Both rates must be positive.
    pub fn new(
        calibration: CalibrationTable,
        sample_rate: u32,
        thermal_rate: u32,
    ) -> Result<Self, RequestError> {
        if sample_rate == 0 {
            return Err(RequestError::BadRate("sample_rate"));
        }
        if thermal_rate == 0 {
            return Err(RequestError::BadRate("thermal_rate"));
        }
        Ok(Self {
            calibration,
            sample_rate,
            thermal_rate,
        })
    }

    /// The same rig rendering at a different vibration sample rate.
    pub fn with_sample_rate(&self, sample_rate: u32) -> Result<Self, RequestError> {
        Self::new(self.calibration.clone(), sample_rate, self.thermal_rate)
    }

    /// Vibration sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Thermal update rate in Hz.
    pub fn thermal_rate(&self) -> u32 {
        self.thermal_rate
    }

    /// The calibration table in use.
    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Renders `play_duration * sample_rate` vibration samples.
    pub fn synthesize(
        &self,
        amp_env: &[f64],
        freq_env: &[f64],
        total_duration: f64,
        play_duration: f64,
        scale: FrequencyScale,
    ) -> Result<Vec<f64>, RequestError> {
        validate_durations(total_duration, play_duration)?;
        validate_envelope("amplitude", amp_env)?;
        validate_envelope("frequency", freq_env)?;

        let rate = self.sample_rate as f64;
        let total_samples = sample_count(total_duration, rate) as f64;
        let n_out = sample_count(play_duration, rate);
        let (min, max) = (
            self.calibration.min_freq() as f64,
            self.calibration.max_freq() as f64,
        );

        let mut phase = PhaseAccumulator::default();
        let mut signal = Vec::with_capacity(n_out);
        for i in 0..n_out {
            let perc = i as f64 / total_samples;
            let s_freq = interp_index(freq_env, perc * (freq_env.len() - 1) as f64);
            let s_amp = interp_index(amp_env, perc * (amp_env.len() - 1) as f64);

            let freq = map_frequency(s_freq, min, max, scale);
            let correction = self
                .calibration
                .factor(freq.floor() as u32)
                .ok_or(RequestError::Uncalibrated(freq))?;

            signal.push(s_amp * phase.advance(freq, rate).sin() * correction);
        }

        debug!(
            "Synthesized {} samples ({}s of {}s)",
            signal.len(),
            play_duration,
            total_duration
        );
        Ok(signal)
    }

    /// Renders the vibration waveform and the matching thermal setpoints.
    ///
    /// `thermal_env` is stretched linearly onto the waveform's sample count,
    /// then brought down to `play_duration * thermal_rate` points with
    /// band-limited resampling. The last setpoint is pinned to the baseline
    /// zero that closes every thermal envelope.
    pub fn synthesize_with_thermal(
        &self,
        amp_env: &[f64],
        freq_env: &[f64],
        thermal_env: &[f64],
        total_duration: f64,
        play_duration: f64,
        scale: FrequencyScale,
    ) -> Result<(Vec<f64>, Vec<f64>), RequestError> {
        validate_durations(total_duration, play_duration)?;
        let n_thermal = sample_count(play_duration, self.thermal_rate as f64);
        if n_thermal == 0 {
            return Err(RequestError::ShorterThanThermalTick {
                play: play_duration,
                thermal_rate: self.thermal_rate,
            });
        }

        let vibration =
            self.synthesize(amp_env, freq_env, total_duration, play_duration, scale)?;

        let dense = stretch_linear(thermal_env, vibration.len());
        let mut thermal = resample_fourier(&dense, n_thermal);
        if let Some(last) = thermal.last_mut() {
            *last = 0.0;
        }

        Ok((vibration, thermal))
    }

    /// Full synthesis for a request, with setpoints quantized for the wire.
    pub fn generate(
        &self,
        request: &StimulusRequest,
        scale: FrequencyScale,
    ) -> Result<GeneratedSignal, RequestError> {
        request.validate()?;

        let rig = match request.sample_rate {
            Some(rate) if rate != self.sample_rate => self.with_sample_rate(rate)?,
            _ => self.clone(),
        };

        let (vibration, thermal) = rig.synthesize_with_thermal(
            &request.vib_amp,
            &request.vib_freq,
            &request.thermal_envelope(),
            request.duration,
            request.play_duration(),
            scale,
        )?;

        Ok(GeneratedSignal {
            vibration,
            setpoints: thermal.into_iter().map(quantize_setpoint).collect(),
            sample_rate: rig.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> Synthesizer {
        // 1.0 at 50 Hz rising linearly, so the lookup is observable
        let denominators: Vec<f64> = (50..=500).map(|f| 10000.0 / f as f64).collect();
        let table = CalibrationTable::from_denominators(&denominators, 50, 500, 10000.0).unwrap();
        Synthesizer::new(table, 10000, 10).unwrap()
    }

    #[test]
    fn sample_count_matches_playback() {
        let rig = rig();
        let cases: [(&[f64], &[f64], f64, f64); 4] = [
            (&[1.0, 1.0], &[0.0, 0.0], 2.0, 2.0),
            (&[0.2, 0.9, 0.4], &[0.5], 2.0, 1.5),
            (&[1.0], &[0.0, 0.3, 1.0, 0.7, 0.1], 1.0, 0.25),
            (&[0.0, 1.0, 0.0, 1.0], &[1.0, 0.0], 0.5, 0.5),
        ];
        for (amp, freq, total, play) in cases {
            let out = rig
                .synthesize(amp, freq, total, play, FrequencyScale::Logarithmic)
                .unwrap();
            assert_eq!(out.len(), (play * 10000.0) as usize);
        }
    }

    #[test]
    fn playback_past_total_is_an_error() {
        let res = rig().synthesize(&[1.0], &[0.5], 1.0, 1.5, FrequencyScale::Linear);
        assert_eq!(
            res,
            Err(RequestError::PlaybackExceedsTotal {
                play: 1.5,
                total: 1.0
            })
        );
    }

    #[test]
    fn log_mapping_hits_band_edges() {
        let lo = map_frequency(0.0, 50.0, 500.0, FrequencyScale::Logarithmic);
        let hi = map_frequency(1.0, 50.0, 500.0, FrequencyScale::Logarithmic);
        assert!((lo - 50.0).abs() < 1e-9);
        assert!((hi - 500.0).abs() < 1e-9);

        // geometric midpoint
        let mid = map_frequency(0.5, 50.0, 500.0, FrequencyScale::Logarithmic);
        assert!((mid - (50.0f64 * 500.0).sqrt()).abs() < 1e-9);

        let mid = map_frequency(0.5, 50.0, 500.0, FrequencyScale::Linear);
        assert_eq!(mid, 275.0);
    }

    #[test]
    fn phase_steps_are_constant() {
        let mut acc = PhaseAccumulator::default();
        let step = TAU * 120.0 / 10000.0;
        let mut prev = 0.0;
        for _ in 0..5000 {
            let phase = acc.advance(120.0, 10000.0);
            assert!((phase - prev - step).abs() < 1e-9);
            prev = phase;
        }
    }

    #[test]
    fn phase_is_continuous_across_envelope_points() {
        // many envelope points, all at the same frequency, so every sample
        // crosses an interpolation boundary somewhere
        let rig = rig();
        let freq = vec![0.25; 37];
        let out = rig
            .synthesize(&[1.0; 11], &freq, 1.0, 1.0, FrequencyScale::Linear)
            .unwrap();

        let f = 50.0 + 450.0 * 0.25;
        let correction = rig.calibration().factor(f as u32).unwrap();
        for (i, s) in out.iter().enumerate() {
            let expected = (TAU * f * (i + 1) as f64 / 10000.0).sin() * correction;
            assert!((s - expected).abs() < 1e-6, "sample {} diverged", i);
        }
    }

    #[test]
    fn flat_minimum_frequency_is_a_pure_calibrated_sine() {
        let rig = rig();
        let out = rig
            .synthesize(&[1.0, 1.0], &[0.0, 0.0], 2.0, 2.0, FrequencyScale::Logarithmic)
            .unwrap();

        assert_eq!(out.len(), 20000);
        let correction = rig.calibration().factor(50).unwrap();
        for (i, s) in out.iter().enumerate() {
            let expected = (TAU * 50.0 * (i + 1) as f64 / 10000.0).sin() * correction;
            assert!((s - expected).abs() < 1e-6, "sample {} diverged", i);
        }
    }

    #[test]
    fn envelope_uses_the_full_timeline() {
        // amplitude ramps 0 -> 1 over 2s, only the first second is played, so
        // the last sample should sit near the middle of the ramp
        let rig = rig();
        let out = rig
            .synthesize(&[0.0, 1.0], &[0.0], 2.0, 1.0, FrequencyScale::Linear)
            .unwrap();
        let peak = out[9800..].iter().fold(0.0f64, |m, s| m.max(s.abs()));
        let correction = rig.calibration().factor(50).unwrap();
        assert!(peak < 0.5 * correction + 1e-6);
        assert!(peak > 0.45 * correction);
    }

    #[test]
    fn thermal_setpoints_end_at_baseline() {
        let rig = rig();
        let req = StimulusRequest::from_json(
            r#"{
                "vib_amp": [0.5, 0.5],
                "vib_freq": [0.3, 0.6],
                "thr_amp": [1.0, 3.0, 3.0, 2.0],
                "duration": 3,
                "timestamp": 1,
                "user_id": "P01"
            }"#,
        )
        .unwrap();

        let signal = rig.generate(&req, FrequencyScale::Logarithmic).unwrap();
        assert_eq!(signal.vibration.len(), 30000);
        assert_eq!(signal.setpoints.len(), 30);
        assert_eq!(*signal.setpoints.last().unwrap(), 0.0);
        assert!(signal
            .setpoints
            .iter()
            .all(|s| (s * 100.0 - (s * 100.0).round()).abs() < 1e-9));
        // the plateau is visible in the middle of the sequence
        assert!(signal.setpoints[12] > 2.0);
    }

    #[test]
    fn request_sample_rate_overrides_rig() {
        let mut req = StimulusRequest::from_json(
            r#"{"vib_amp":[1],"vib_freq":[0],"duration":1,"timestamp":1,"user_id":"P01"}"#,
        )
        .unwrap();
        req.sample_rate = Some(2000);

        let signal = rig().generate(&req, FrequencyScale::Linear).unwrap();
        assert_eq!(signal.sample_rate, 2000);
        assert_eq!(signal.vibration.len(), 2000);
        assert_eq!(signal.setpoints.len(), 10);
    }

    #[test]
    fn partial_ticks_are_dropped() {
        let rig = rig();
        let (vibration, thermal) = rig
            .synthesize_with_thermal(
                &[1.0],
                &[0.5],
                &[2.0, 0.0],
                0.15,
                0.15,
                FrequencyScale::Linear,
            )
            .unwrap();
        assert_eq!(vibration.len(), 1500);
        assert_eq!(thermal, vec![0.0]);

        let out = rig
            .synthesize(&[1.0], &[0.5], 0.29, 0.29, FrequencyScale::Linear)
            .unwrap();
        assert_eq!(out.len(), 2900);
        assert_eq!(sample_count(0.3, 10.0), 3);
        assert_eq!(sample_count(0.299, 10.0), 2);
    }

    #[test]
    fn playback_shorter_than_a_thermal_tick_is_refused() {
        let res = rig().synthesize_with_thermal(
            &[1.0],
            &[0.5],
            &[2.0, 0.0],
            0.04,
            0.04,
            FrequencyScale::Linear,
        );
        assert_eq!(
            res,
            Err(RequestError::ShorterThanThermalTick {
                play: 0.04,
                thermal_rate: 10
            })
        );

        // one tick exactly is enough, and it is the baseline
        let (_, thermal) = rig()
            .synthesize_with_thermal(&[1.0], &[0.5], &[2.0, 0.0], 0.1, 0.1, FrequencyScale::Linear)
            .unwrap();
        assert_eq!(thermal, vec![0.0]);
    }

    #[test]
    fn quantization_rounds_to_hundredths() {
        assert_eq!(quantize_setpoint(1.234), 1.23);
        assert_eq!(quantize_setpoint(-2.345_1), -2.35);
        assert_eq!(quantize_setpoint(-0.001), 0.0);
        assert!(quantize_setpoint(-0.001).is_sign_positive());
    }
}
