use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use luxlink::{
    logging, AcquisitionController, DeviceConfig, Event, SerialOpener,
};

#[derive(Parser, Debug)]
#[command(name = "luxlink-demo", about = "Connect to a luxmeter and stream readings")]
struct Args {
    /// Serial port of the luxmeter (e.g., /dev/ttyUSB0)
    port: String,
    /// Number of sensor heads attached
    #[arg(long, default_value_t = 1)]
    sensors: usize,
    /// Sampling frequency in Hz
    #[arg(long, default_value_t = 2.0)]
    frequency: f64,
    /// Number of readings to print before stopping
    #[arg(long, default_value_t = 10)]
    readings: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    logging::init_logging();
    let args = Args::parse();

    let config = DeviceConfig {
        locator: args.port.clone(),
        sensors: args.sensors,
        frequency: args.frequency,
        ..DeviceConfig::default()
    };
    let interval = config.sampling_interval();

    let (mut controller, events) =
        AcquisitionController::new(Box::new(SerialOpener::default()), config)
            .context("failed to allocate acquisition buffers")?;

    println!("Opening {} ({} sensors)...", args.port, args.sensors);
    controller.connect().context("failed to open device")?;

    println!("Sampling at {} Hz...", args.frequency);
    controller.start_sampling()?;

    let mut printed = 0usize;
    let deadline = interval * 4 + Duration::from_secs(2);
    while printed < args.readings {
        match events
            .recv_timeout(deadline)
            .context("no event from the device in time")?
        {
            Event::NewReading(reading) => {
                println!(
                    "[{:>8.3}s] {:?}",
                    reading.timestamp.as_secs_f64(),
                    reading.values
                );
                printed += 1;
            }
            Event::Error { operation, message } => {
                eprintln!("{operation}: {message}");
            }
            Event::StateChanged(state) => {
                eprintln!("state: {state}");
            }
            _ => {}
        }
    }

    controller.stop_sampling();
    let stats = controller.stats();
    println!(
        "Done: {} frames, {} skipped ({} decode failures).",
        stats.frames, stats.skipped, stats.decode_failures
    );
    controller.disconnect();
    Ok(())
}
