//! Commandline argument parser using clap for ThermoVib

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Synthesize and deliver combined vibrotactile and thermal stimuli
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct StimArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform: synthesis only, a full delivery, or listing ports
    pub command: CommandTask,

    /// Rig description in RON. Defaults are used when omitted
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Calibration file with one scale denominator per line, overriding the rig file
    #[arg(long = "calibration")]
    pub calibration: Option<PathBuf>,

    /// Serial device of the thermal actuator, overriding the rig file
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Directory that per-user logs are written under, overriding the rig file
    #[arg(long = "save-dir")]
    pub save_dir: Option<PathBuf>,
}

/// The task to run
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Render a request's vibration waveform to a WAV file
    #[command(about)]
    Synthesize(SynthesizeCommand),

    /// Play a request on the rig, streaming status events to stdout
    #[command(about)]
    Deliver(DeliverCommand),

    /// List the serial devices that could be the thermal actuator
    #[command(about)]
    Ports,
}

/// Render a request to WAV
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SynthesizeCommand {
    /// JSON stimulus request
    #[arg(short = 'r', long = "request")]
    pub request: PathBuf,

    /// Filename for the 32-bit float WAV to be written to
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,
}

/// Play a request on the rig
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct DeliverCommand {
    /// JSON stimulus request
    #[arg(short = 'r', long = "request")]
    pub request: PathBuf,

    /// Use the simulated actuator and analog I/O instead of real hardware
    #[arg(long)]
    pub simulate: bool,

    /// Stop the delivery after this many seconds
    #[arg(long = "stop-after")]
    pub stop_after: Option<f64>,
}
