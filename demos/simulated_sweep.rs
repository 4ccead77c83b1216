// Sweep a simulated diode with noisy readings
//
// This demo runs a voltage sweep against the built-in simulated SMU, shows the
// effect of the averaging filters and optionally stores the result as CSV.

use clap::Parser;
use ivsweep_rs::{
    range, sink_callback, Averaged, FilterMode, IvPoint, IvTable, McIvPoint, ProgressCallback,
    SimulatedSmu, SweepRun, SweepStepConfig,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "simulated_sweep")]
#[command(version = "1.0")]
#[command(about = "I-V sweep of a simulated diode")]
struct Args {
    /// First voltage of the sweep
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start: f64,

    /// Last voltage of the sweep
    #[arg(long, default_value_t = 0.8, allow_negative_numbers = true)]
    stop: f64,

    /// Number of points
    #[arg(short = 'n', long, default_value_t = 17)]
    steps: usize,

    /// Settle delay in milliseconds
    #[arg(short, long, default_value_t = 5)]
    delay: u64,

    /// Sweep back down after reaching the last voltage
    #[arg(short, long)]
    symmetric: bool,

    /// Averaging mode: none, mean-repeat, mean-moving, median-repeat, median-moving
    #[arg(short, long, default_value = "none")]
    filter: FilterMode,

    /// Samples per averaged value
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Amplitude of the simulated measurement noise in amps
    #[arg(long, default_value_t = 1e-6)]
    noise: f64,

    /// Write results to this CSV file
    #[arg(short, long)]
    output: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    // Shockley diode, 1 nA saturation current
    let noise = vec![args.noise, -args.noise, 0.5 * args.noise, -0.5 * args.noise];
    let sim = SimulatedSmu::new(1, |v| 1e-9 * ((v / 0.02585).exp() - 1.0)).with_noise(noise);
    let mut smu = Averaged::new(sim);
    smu.set_averaging(0, args.filter, args.count)?;

    let step = SweepStepConfig::voltage(0, range::linear(args.start, args.stop, args.steps))
        .delay(Duration::from_millis(args.delay))
        .symmetric(args.symmetric);
    let mut run = SweepRun::single(step).turn_off_after(true);

    println!("Simulated diode sweep");
    println!("=====================");
    println!("Range: {} V -> {} V, {} points", args.start, args.stop, run.total_points());
    println!("Averaging: {} x{}\n", args.filter, args.count);

    let table = Arc::new(Mutex::new(IvTable::default()));
    let mut store = sink_callback::<McIvPoint, _>(Arc::clone(&table));
    let progress: ProgressCallback<McIvPoint> = Box::new(move |i: usize, point: &McIvPoint| {
        if let Some(p) = point.get(0) {
            print_point(i, p);
        }
        store(i, point)
    });

    let start = Instant::now();
    let points = run.run_multi(&mut smu, progress)?;
    println!(
        "\n{} points in {:.2} s, {} raw reads",
        points.len(),
        start.elapsed().as_secs_f64(),
        smu.inner().raw_reads()
    );

    if let Some(path) = args.output {
        let table = table.lock().map_err(|_| "result table lock poisoned")?;
        table.write_csv(&path)?;
        println!("Saved to {}", path);
    }

    Ok(())
}

fn print_point(index: usize, point: &IvPoint) {
    println!("{:4}  {:+.4} V  {:+.4e} A", index, point.voltage, point.current);
}
