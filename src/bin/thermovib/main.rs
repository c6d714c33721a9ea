//! The ThermoVib command line: synthesize a stimulus to a WAV file, deliver
//! it on the rig while streaming status events, or list serial devices.

use clap::Parser;
use log::{error, info, warn};
use serial2::SerialPort;
use std::{
    error::Error,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Instant,
};
use thermovib::{
    args::{CommandTask, DeliverCommand, StimArgs, SynthesizeCommand},
    calibration::CalibrationTable,
    config::RigConfig,
    daq::DaqBackend,
    delivery::Rig,
    dummy_rig::{SimulatedActuator, SimulatedConnector, SimulatedDaq},
    gui::device_selector,
    request::StimulusRequest,
    serial_link::{PortConnector, SerialConnector},
    synthesizer::{FrequencyScale, Synthesizer},
    wav_export::write_vibration,
};

// Example:
// cargo run --bin thermovib -- --config rig.ron
//                              deliver
//                              --request trial.json
//                              --simulate
//                              --stop-after 3

fn main() -> ExitCode {
    env_logger::init();
    let args = StimArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("thermovib: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: StimArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;

    match args.command {
        CommandTask::Ports => {
            for port in SerialPort::available_ports()? {
                println!("{}", port.to_string_lossy());
            }
            Ok(())
        }
        CommandTask::Synthesize(cmd) => synthesize(config, cmd),
        CommandTask::Deliver(cmd) => deliver(config, cmd),
    }
}

fn load_config(args: &StimArgs) -> Result<RigConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => RigConfig::from_path(path)?,
        None => RigConfig::default(),
    };
    if let Some(port) = &args.port {
        config.thermal_port = Some(port.clone());
    }
    if let Some(path) = &args.calibration {
        config.calibration_path = Some(path.clone());
    }
    if let Some(dir) = &args.save_dir {
        config.save_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_synthesizer(config: &RigConfig) -> Result<Synthesizer, Box<dyn Error>> {
    let table = match &config.calibration_path {
        Some(path) => CalibrationTable::from_path(
            path,
            config.min_freq,
            config.max_freq,
            config.calibration_reference,
        )?,
        None => {
            warn!("No calibration file configured, using a flat table");
            CalibrationTable::flat(config.min_freq, config.max_freq)?
        }
    };
    Ok(Synthesizer::new(table, config.sample_rate, config.thermal_rate)?)
}

fn read_request(path: &Path) -> Result<StimulusRequest, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    Ok(StimulusRequest::from_json(&text)?)
}

fn synthesize(config: RigConfig, cmd: SynthesizeCommand) -> Result<(), Box<dyn Error>> {
    let request = read_request(&cmd.request)?;
    let synthesizer = build_synthesizer(&config)?;
    let signal = synthesizer.generate(&request, FrequencyScale::from_log(config.log_scale))?;

    write_vibration(&cmd.outfile, &signal.vibration, signal.sample_rate)?;
    println!(
        "Wrote {} samples @ {} Hz to {}, {} thermal setpoints",
        signal.vibration.len(),
        signal.sample_rate,
        cmd.outfile.display(),
        signal.setpoints.len()
    );
    Ok(())
}

fn deliver(config: RigConfig, cmd: DeliverCommand) -> Result<(), Box<dyn Error>> {
    let request = read_request(&cmd.request)?;
    let synthesizer = build_synthesizer(&config)?;

    let (serial, daq): (Box<dyn SerialConnector>, Arc<dyn DaqBackend>) = if cmd.simulate {
        let actuator = Arc::new(SimulatedActuator::new(
            request.init_setpoint(),
            config.serial_poll(),
        ));
        (
            Box::new(SimulatedConnector::new(actuator, 0)),
            Arc::new(SimulatedDaq::new()),
        )
    } else {
        let port = match &config.thermal_port {
            Some(port) => PathBuf::from(port),
            None => match device_selector(SerialPort::available_ports()?)? {
                Some(port) => port,
                None => return Err("no serial device selected".into()),
            },
        };
        warn!("No analog I/O driver is linked in, vibration and accelerometer are simulated");
        (
            Box::new(PortConnector::new(
                port,
                config.baud_rate,
                config.serial_poll(),
            )),
            Arc::new(SimulatedDaq::new()),
        )
    };

    let rig = Rig::new(config, synthesizer, serial, daq);
    let (handle, events) = rig.deliver(&request)?;

    let started = Instant::now();
    let mut stop_sent = false;
    let mut stdout = io::stdout();
    loop {
        let message = events.next_message();
        match message.to_sse_frame() {
            Some(frame) => {
                stdout.write_all(frame.as_bytes())?;
                stdout.flush()?;
            }
            None => break,
        }
        if let Some(limit) = cmd.stop_after {
            if !stop_sent && started.elapsed().as_secs_f64() >= limit {
                info!("Stopping after {:.1}s", limit);
                handle.stop();
                stop_sent = true;
            }
        }
    }

    let report = handle.join()?;
    for (role, outcome) in &report.outcomes {
        info!("{}: {}", role, outcome);
    }
    info!("Telemetry log: {}", report.paths.telemetry_csv.display());
    info!("Accelerometer log: {}", report.paths.accel_csv.display());
    Ok(())
}
