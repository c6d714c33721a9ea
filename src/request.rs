//! The stimulus request as it arrives from the experiment front end, and the
//! checks that decide whether it can be played at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{borrow::Cow, fmt};

/// Baseline skin temperature assumed when the request does not carry one.
pub const DEFAULT_INIT_SETPOINT: f64 = 32.5;

/// Reasons a request is refused. These are raised before any synthesis or
/// hardware access happens.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// The requested playback is longer than the timeline it is cut from.
    PlaybackExceedsTotal {
        /// Requested playback duration in seconds
        play: f64,
        /// Total signal duration in seconds
        total: f64,
    },

    /// A duration was zero, negative, or not a number.
    BadDuration(f64),

    /// An envelope had no points.
    EmptyEnvelope(&'static str),

    /// An envelope point was outside `[0, 1]` or not finite.
    EnvelopeOutOfRange {
        /// Which envelope
        envelope: &'static str,
        /// Position of the bad point
        index: usize,
        /// The bad value
        value: f64,
    },

    /// The thermal envelope contained a value that is not finite.
    BadThermalValue(usize),

    /// A sample or update rate of zero.
    BadRate(&'static str),

    /// The mapped frequency fell outside the calibrated band.
    Uncalibrated(f64),

    /// The owning identifier is empty or could escape the save directory.
    BadUserId(String),

    /// The playback is too short to hold a single thermal setpoint.
    ShorterThanThermalTick {
        /// Requested playback duration in seconds
        play: f64,
        /// Thermal update rate in Hz
        thermal_rate: u32,
    },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RequestError as RE;
        let msg = match self {
            RE::PlaybackExceedsTotal { play, total } => Cow::from(format!(
                "playback duration {}s exceeds total duration {}s",
                play, total
            )),
            RE::BadDuration(d) => Cow::from(format!("invalid duration {}", d)),
            RE::EmptyEnvelope(name) => Cow::from(format!("{} envelope is empty", name)),
            RE::EnvelopeOutOfRange {
                envelope,
                index,
                value,
            } => Cow::from(format!(
                "{} envelope point {} is {}, expected a value in [0, 1]",
                envelope, index, value
            )),
            RE::BadThermalValue(index) => {
                Cow::from(format!("thermal envelope point {} is not finite", index))
            }
            RE::BadRate(name) => Cow::from(format!("{} must be positive", name)),
            RE::Uncalibrated(freq) => {
                Cow::from(format!("{} Hz is outside the calibrated band", freq))
            }
            RE::BadUserId(id) => Cow::from(format!("invalid user id {:?}", id)),
            RE::ShorterThanThermalTick { play, thermal_rate } => Cow::from(format!(
                "playback duration {}s is shorter than one thermal update at {} Hz",
                play, thermal_rate
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RequestError {}

/// A request to play one combined vibrotactile and thermal stimulus.
///
/// Field names follow the JSON the front end posts. Fields this crate does not
/// know about are kept in `extra` so the audit copy is faithful.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StimulusRequest {
    /// Normalized vibration amplitude envelope
    pub vib_amp: Vec<f64>,

    /// Normalized vibration frequency envelope
    pub vib_freq: Vec<f64>,

    /// Thermal offset envelope in degrees, zeros when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thr_amp: Option<Vec<f64>>,

    /// Total signal duration in seconds
    pub duration: f64,

    /// Portion of the timeline to actually play, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_duration: Option<f64>,

    /// Vibration sample rate override in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,

    /// Actuator baseline temperature in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_setpoint: Option<f64>,

    /// Unix time the request was made
    pub timestamp: i64,

    /// Participant the request belongs to
    pub user_id: String,

    /// Anything else the front end sent along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StimulusRequest {
    /// Parses a request from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Playback duration, defaulting to the whole signal.
    pub fn play_duration(&self) -> f64 {
        self.play_duration.unwrap_or(self.duration)
    }

    /// The actuator baseline temperature.
    pub fn init_setpoint(&self) -> f64 {
        self.init_setpoint.unwrap_or(DEFAULT_INIT_SETPOINT)
    }

    /// The thermal envelope with a trailing zero, so the actuator always
    /// returns to baseline at the end of the stimulus.
    pub fn thermal_envelope(&self) -> Vec<f64> {
        let mut env = match &self.thr_amp {
            Some(thr) => thr.clone(),
            None => vec![0.0; self.vib_amp.len()],
        };
        env.push(0.0);
        env
    }

    /// Checks everything that can be checked without the rig configuration.
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_durations(self.duration, self.play_duration())?;
        validate_envelope("amplitude", &self.vib_amp)?;
        validate_envelope("frequency", &self.vib_freq)?;

        if let Some(index) = self
            .thr_amp
            .iter()
            .flatten()
            .position(|v| !v.is_finite())
        {
            return Err(RequestError::BadThermalValue(index));
        }

        if self.sample_rate == Some(0) {
            return Err(RequestError::BadRate("sample_rate"));
        }

        let id = self.user_id.trim();
        if id.is_empty()
            || id == "."
            || id.contains("..")
            || id.contains(|c| c == '/' || c == '\\')
        {
            return Err(RequestError::BadUserId(self.user_id.clone()));
        }

        Ok(())
    }
}

/// Both durations must be positive, and playback may not run past the end of
/// the signal.
pub fn validate_durations(total: f64, play: f64) -> Result<(), RequestError> {
    for d in [total, play] {
        if !d.is_finite() || d <= 0.0 {
            return Err(RequestError::BadDuration(d));
        }
    }
    if play > total {
        return Err(RequestError::PlaybackExceedsTotal { play, total });
    }
    Ok(())
}

/// A normalized envelope has at least one point and every point in `[0, 1]`.
pub fn validate_envelope(envelope: &'static str, points: &[f64]) -> Result<(), RequestError> {
    if points.is_empty() {
        return Err(RequestError::EmptyEnvelope(envelope));
    }
    match points
        .iter()
        .position(|v| !v.is_finite() || !(0.0..=1.0).contains(v))
    {
        Some(index) => Err(RequestError::EnvelopeOutOfRange {
            envelope,
            index,
            value: points[index],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "vib_amp": [0.0, 1.0, 0.5],
        "vib_freq": [0.2, 0.8],
        "duration": 5,
        "timestamp": 1712345678,
        "user_id": "P07",
        "body_site": "forearm"
    }"#;

    #[test]
    fn parses_front_end_payload() {
        let req = StimulusRequest::from_json(PAYLOAD).unwrap();

        assert_eq!(req.vib_amp, vec![0.0, 1.0, 0.5]);
        assert_eq!(req.duration, 5.0);
        assert_eq!(req.play_duration(), 5.0);
        assert_eq!(req.init_setpoint(), DEFAULT_INIT_SETPOINT);
        assert_eq!(req.sample_rate, None);
        assert_eq!(req.extra.get("body_site"), Some(&Value::from("forearm")));
        assert_eq!(req.validate(), Ok(()));
    }

    #[test]
    fn audit_copy_keeps_unknown_fields() {
        let req = StimulusRequest::from_json(PAYLOAD).unwrap();
        let echoed: Value = serde_json::to_value(&req).unwrap();
        assert_eq!(echoed["body_site"], "forearm");
        assert!(echoed.get("thr_amp").is_none());
    }

    #[test]
    fn thermal_envelope_gets_trailing_zero() {
        let mut req = StimulusRequest::from_json(PAYLOAD).unwrap();
        assert_eq!(req.thermal_envelope(), vec![0.0, 0.0, 0.0, 0.0]);

        req.thr_amp = Some(vec![2.0, 3.0]);
        assert_eq!(req.thermal_envelope(), vec![2.0, 3.0, 0.0]);
    }

    #[test]
    fn playback_longer_than_total_is_rejected() {
        let mut req = StimulusRequest::from_json(PAYLOAD).unwrap();
        req.play_duration = Some(6.0);
        assert_eq!(
            req.validate(),
            Err(RequestError::PlaybackExceedsTotal {
                play: 6.0,
                total: 5.0
            })
        );
    }

    #[test]
    fn envelope_values_must_be_normalized() {
        let mut req = StimulusRequest::from_json(PAYLOAD).unwrap();
        req.vib_freq = vec![0.5, 1.2];
        assert!(matches!(
            req.validate(),
            Err(RequestError::EnvelopeOutOfRange { index: 1, .. })
        ));

        req.vib_freq = vec![];
        assert_eq!(req.validate(), Err(RequestError::EmptyEnvelope("frequency")));
    }

    #[test]
    fn user_id_cannot_escape_save_dir() {
        let mut req = StimulusRequest::from_json(PAYLOAD).unwrap();
        for bad in ["", "../etc", "a/b", "a\\b"] {
            req.user_id = bad.to_owned();
            assert!(matches!(req.validate(), Err(RequestError::BadUserId(_))));
        }
    }
}
