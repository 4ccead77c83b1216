// I-V sweep on a SCPI source-measure unit
//
// Connects to a SCPI instrument on a serial port and runs a single voltage or
// current sweep, printing each point as it arrives.

use clap::Parser;
use ivsweep_rs::{
    range, Averaged, FilterMode, Instrument, IvTable, ScpiSmu, SingleChannel, Source, SweepRun,
    SweepStepConfig,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "scpi_sweep")]
#[command(version = "1.0")]
#[command(about = "I-V sweep on a SCPI source-measure unit")]
struct Args {
    /// Serial port of the instrument, e.g. /dev/ttyUSB0
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Source current instead of voltage
    #[arg(long)]
    current: bool,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start: f64,

    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    stop: f64,

    /// Increment between points
    #[arg(long, default_value_t = 0.1)]
    step: f64,

    /// Settle delay in milliseconds
    #[arg(short, long, default_value_t = 50)]
    delay: u64,

    /// Median of this many readings per point
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Write results to this CSV file
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut scpi = ScpiSmu::connect(&args.port, args.baud)?;
    println!("Connected to {}", scpi.identify()?);

    let mut smu = Averaged::new(SingleChannel::new(scpi));
    smu.set_averaging(0, FilterMode::MedianRepeat, args.count)?;

    let source = if args.current { Source::Current } else { Source::Voltage };
    let values = range::step(args.start, args.stop, args.step);
    if values.is_empty() {
        return Err(format!(
            "cannot step from {} to {} by {}",
            args.start, args.stop, args.step
        )
        .into());
    }
    let step = SweepStepConfig::new(0, source, values)
        .delay(Duration::from_millis(args.delay));
    let mut run = SweepRun::single(step).turn_off_after(true);

    let points = run.run_multi(&mut smu, |i, point| {
        if let Some(p) = point.get(0) {
            println!("{:4}  {}", i, p);
        }
        Ok(())
    })?;

    if let Some(path) = args.output {
        IvTable::from_points(&points)?.write_csv(&path)?;
        println!("Saved {} points to {}", points.len(), path);
    }

    Ok(())
}
