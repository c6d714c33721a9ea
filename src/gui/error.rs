use std::{error::Error, fmt::Display};

/// Failures of the terminal device selector.
#[derive(Debug)]
pub enum StimGuiError {
    /// The terminal could not be set up, drawn to, or read from
    IOError(std::io::Error),
    /// There was nothing to choose from
    NoPorts,
}

impl Display for StimGuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IOError(e) => write!(f, "terminal error: {}", e),
            Self::NoPorts => write!(f, "no serial devices found"),
        }
    }
}

impl Error for StimGuiError {}

impl From<std::io::Error> for StimGuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
