//! Where a delivery leaves its records: the verbatim request, the thermal
//! telemetry log and the accelerometer log, all under
//! `<save_dir>/<user_id>/logs/` and stamped with the request's timestamp.

use crate::request::StimulusRequest;
use std::{
    borrow::Cow,
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// A failure to write the audit copy of a request.
#[derive(Debug)]
pub enum AuditError {
    /// Returned when the log directory or file cannot be written.
    IoError(std::io::Error),

    /// Returned when the request cannot be serialized.
    JsonError(serde_json::Error),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            AuditError::IoError(error) => Cow::from(format!("io error: {}", error)),
            AuditError::JsonError(error) => Cow::from(format!("json error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for AuditError {}

impl From<std::io::Error> for AuditError {
    fn from(error: std::io::Error) -> Self {
        AuditError::IoError(error)
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(error: serde_json::Error) -> Self {
        AuditError::JsonError(error)
    }
}

/// The three files one delivery produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// Audit copy of the request
    pub request_json: PathBuf,
    /// Thermal actuator telemetry
    pub telemetry_csv: PathBuf,
    /// Accelerometer frames
    pub accel_csv: PathBuf,
}

impl LogPaths {
    /// The log paths for `request` under `save_dir`. Nothing is created.
    pub fn for_request(save_dir: &Path, request: &StimulusRequest) -> Self {
        let dir = log_dir(save_dir, &request.user_id);
        let ts = request.timestamp;
        Self {
            request_json: dir.join(format!("collected_data_{}.json", ts)),
            telemetry_csv: dir.join(format!("arduino_log_{}.csv", ts)),
            accel_csv: dir.join(format!("accel_log_{}.csv", ts)),
        }
    }
}

/// `<save_dir>/<user_id>/logs`
pub fn log_dir(save_dir: &Path, user_id: &str) -> PathBuf {
    save_dir.join(user_id.trim()).join("logs")
}

/// Creates the log directory and writes the request there exactly as
/// received, including fields this crate does not interpret.
pub fn persist_request(
    save_dir: &Path,
    request: &StimulusRequest,
) -> Result<LogPaths, AuditError> {
    let paths = LogPaths::for_request(save_dir, request);
    if let Some(dir) = paths.request_json.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = BufWriter::new(File::create(&paths.request_json)?);
    serde_json::to_writer(&mut file, request)?;
    file.flush()?;
    Ok(paths)
}
