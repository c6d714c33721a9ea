//! The per-frequency correction table that flattens the vibration actuator's
//! response across the frequency band.
//!
//! The file on disk holds one raw scale denominator per integer frequency,
//! starting at the bottom of the band. Each value `v` becomes `K / v`, and the
//! whole table is then divided by its mean so that the average correction is
//! exactly 1.0.

use log::{debug, info};
use std::{borrow::Cow, fmt, fs, path::Path};

/// The reference constant the raw denominators are divided into.
pub const DEFAULT_REFERENCE: f64 = 10000.0;

/// Things that can go wrong while loading a [CalibrationTable]. All of these
/// are configuration problems, a rig with a broken table cannot run.
#[derive(Debug)]
pub enum CalibrationError {
    /// The table does not have one entry per integer frequency in the band.
    LengthMismatch {
        /// `max_freq - min_freq + 1`
        expected: usize,
        /// Number of entries actually found
        found: usize,
    },

    /// A line in the file could not be read as a number.
    BadValue {
        /// 1-based line number
        line: usize,
        /// The offending text
        text: String,
    },

    /// A denominator was zero or negative, so `K / v` is meaningless.
    NonPositive {
        /// 1-based line number
        line: usize,
    },

    /// The band itself is empty or inverted.
    BadBand {
        /// Lower bound in Hz
        min_freq: u32,
        /// Upper bound in Hz
        max_freq: u32,
    },

    /// The file could not be read at all.
    IoError(std::io::Error),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use CalibrationError as CE;
        let msg = match self {
            CE::LengthMismatch { expected, found } => Cow::from(format!(
                "calibration table has {} entries, expected {}",
                found, expected
            )),
            CE::BadValue { line, text } => {
                Cow::from(format!("line {}: cannot parse {:?} as a number", line, text))
            }
            CE::NonPositive { line } => {
                Cow::from(format!("line {}: denominator must be positive", line))
            }
            CE::BadBand { min_freq, max_freq } => Cow::from(format!(
                "frequency band {}..={} Hz is empty",
                min_freq, max_freq
            )),
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for CalibrationError {}

impl From<std::io::Error> for CalibrationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

/// Normalized correction factors, one per integer Hz between `min_freq` and
/// `max_freq` inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    min_freq: u32,
    max_freq: u32,
    factors: Vec<f64>,
}

impl CalibrationTable {
    /// Reads and normalizes the table stored at `path`.
    pub fn from_path(
        path: impl AsRef<Path>,
        min_freq: u32,
        max_freq: u32,
        reference: f64,
    ) -> Result<Self, CalibrationError> {
        let text = fs::read_to_string(path.as_ref())?;
        let table = Self::from_text(&text, min_freq, max_freq, reference)?;
        info!(
            "Loaded {} calibration factors from {}",
            table.factors.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Parses a table from the contents of a calibration file.
    pub fn from_text(
        text: &str,
        min_freq: u32,
        max_freq: u32,
        reference: f64,
    ) -> Result<Self, CalibrationError> {
        let denominators = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty())
            .map(|(line, l)| {
                let v: f64 = l.parse().map_err(|_| CalibrationError::BadValue {
                    line,
                    text: l.to_owned(),
                })?;
                if v <= 0.0 || !v.is_finite() {
                    return Err(CalibrationError::NonPositive { line });
                }
                Ok(v)
            })
            .collect::<Result<Vec<f64>, CalibrationError>>()?;

        Self::from_denominators(&denominators, min_freq, max_freq, reference)
    }

    /// Builds a table from raw denominators that are already in memory.
    pub fn from_denominators(
        denominators: &[f64],
        min_freq: u32,
        max_freq: u32,
        reference: f64,
    ) -> Result<Self, CalibrationError> {
        let expected = band_len(min_freq, max_freq)?;
        if denominators.len() != expected {
            return Err(CalibrationError::LengthMismatch {
                expected,
                found: denominators.len(),
            });
        }

        let raw: Vec<f64> = denominators.iter().map(|v| reference / v).collect();
        let mean = raw.iter().sum::<f64>() / raw.len() as f64;
        debug!("Raw calibration mean is {}", mean);

        Ok(Self {
            min_freq,
            max_freq,
            factors: raw.into_iter().map(|v| v / mean).collect(),
        })
    }

    /// A table with every factor set to 1.0, for rigs without a measured
    /// calibration.
    pub fn flat(min_freq: u32, max_freq: u32) -> Result<Self, CalibrationError> {
        let len = band_len(min_freq, max_freq)?;
        Ok(Self {
            min_freq,
            max_freq,
            factors: vec![1.0; len],
        })
    }

    /// The correction factor for an integer frequency, or `None` outside the
    /// band.
    pub fn factor(&self, freq: u32) -> Option<f64> {
        if freq < self.min_freq || freq > self.max_freq {
            return None;
        }
        self.factors.get((freq - self.min_freq) as usize).copied()
    }

    /// Lowest calibrated frequency in Hz.
    pub fn min_freq(&self) -> u32 {
        self.min_freq
    }

    /// Highest calibrated frequency in Hz.
    pub fn max_freq(&self) -> u32 {
        self.max_freq
    }

    /// All factors, lowest frequency first.
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }
}

fn band_len(min_freq: u32, max_freq: u32) -> Result<usize, CalibrationError> {
    if min_freq == 0 || max_freq < min_freq {
        return Err(CalibrationError::BadBand { min_freq, max_freq });
    }
    Ok((max_freq - min_freq + 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lines(values: &[f64]) -> String {
        values
            .iter()
            .map(|v| format!("{}\n", v))
            .collect::<String>()
    }

    #[test]
    fn normalizes_to_unit_mean() {
        let table =
            CalibrationTable::from_text(&lines(&[100.0, 200.0, 400.0]), 10, 12, 10000.0).unwrap();

        let mean = table.factors().iter().sum::<f64>() / 3.0;
        assert!((mean - 1.0).abs() < 1e-12);
        // 100, 50, 25 over a mean of 175/3
        assert!((table.factor(10).unwrap() - 100.0 / (175.0 / 3.0)).abs() < 1e-12);
        assert!(table.factor(10).unwrap() > table.factor(12).unwrap());
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let res = CalibrationTable::from_text(&lines(&[1.0; 450]), 50, 500, 10000.0);
        match res {
            Err(CalibrationError::LengthMismatch { expected, found }) => {
                assert_eq!(expected, 451);
                assert_eq!(found, 450);
            }
            other => panic!("expected a length mismatch, got {:?}", other),
        }

        let res = CalibrationTable::from_text(&lines(&[1.0; 452]), 50, 500, 10000.0);
        assert!(matches!(res, Err(CalibrationError::LengthMismatch { .. })));
    }

    #[test]
    fn lookup_is_bounds_checked() {
        let table = CalibrationTable::flat(50, 500).unwrap();
        assert_eq!(table.factor(49), None);
        assert_eq!(table.factor(50), Some(1.0));
        assert_eq!(table.factor(500), Some(1.0));
        assert_eq!(table.factor(501), None);
    }

    #[test]
    fn rejects_garbage_and_zero() {
        let res = CalibrationTable::from_text("1.0\nabc\n", 1, 2, 1.0);
        assert!(matches!(res, Err(CalibrationError::BadValue { line: 2, .. })));

        let res = CalibrationTable::from_text("1.0\n0\n", 1, 2, 1.0);
        assert!(matches!(res, Err(CalibrationError::NonPositive { line: 2 })));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", lines(&[5000.0; 451])).unwrap();

        let table = CalibrationTable::from_path(file.path(), 50, 500, DEFAULT_REFERENCE).unwrap();
        assert_eq!(table.factors().len(), 451);
        assert!(table.factors().iter().all(|f| (f - 1.0).abs() < 1e-12));
    }
}
