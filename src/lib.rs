//! # ivsweep RS
//!
//! Measurement averaging and multi-channel I-V sweeps for source-measure units.
//!
//! Instrument drivers only need to expose a small capability surface (output on/off,
//! source selection, bias, raw voltage/current reads). On top of that this crate
//! provides stabilised readings and sweep orchestration with ordered progress
//! reporting that never blocks the hardware loop.
//!
//! ## Features
//!
//! - **Capability traits**: [`Smu`] for single-channel instruments, [`MultiChannelSmu`]
//!   for mainframes, with [`ChannelView`] and [`SingleChannel`] adapting between them
//! - **Averaging filters**: bypass, repeated and moving mean/median ([`Filter`]),
//!   held per channel by [`Averaged`]
//! - **Sweeps**: single-channel, nested, combo (lock-step) and pulsed runs ([`SweepRun`])
//! - **Progress delivery**: callbacks run on a dedicated thread, strictly in step order
//! - **Cancellation**: stop a running sweep from another thread ([`CancellationToken`])
//! - **DataFrame output**: results collected into `polars` tables and CSV ([`IvTable`])
//! - **SCPI over serial**: a generic SCPI SMU using `serialport` ([`ScpiSmu`])
//!
//! ## Examples
//!
//! ### Averaged single-channel sweep
//!
//! ```rust
//! use ivsweep_rs::{range, Averaged, FilterMode, SimulatedSmu, SweepRun, SweepStepConfig};
//! use std::time::Duration;
//!
//! // 1 kOhm resistor with some measurement noise
//! let sim = SimulatedSmu::resistor(1, 1_000.0).with_noise(vec![1e-6, -1e-6]);
//! let mut smu = Averaged::new(sim);
//! smu.set_averaging(0, FilterMode::MeanRepeat, 4)?;
//!
//! let step = SweepStepConfig::voltage(0, range::linear(0.0, 1.0, 5))
//!     .delay(Duration::from_millis(1))
//!     .symmetric(true);
//! let mut run = SweepRun::single(step);
//! let points = run.run_multi(&mut smu, |i, point| {
//!     println!("step {}: {:?}", i, point);
//!     Ok(())
//! })?;
//! assert_eq!(points.len(), 9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Two channels in lock-step, collected into a table
//!
//! ```rust
//! use ivsweep_rs::{sink_callback, IvTable, McIvPoint, SimulatedSmu, SweepRun, SweepStepConfig};
//! use std::sync::{Arc, Mutex};
//!
//! let mut smu = SimulatedSmu::resistor(2, 100.0);
//! let table = Arc::new(Mutex::new(IvTable::for_channels(&[0, 1])));
//!
//! let mut run = SweepRun::combo(vec![
//!     SweepStepConfig::voltage(0, vec![0.0, 0.5, 1.0]),
//!     SweepStepConfig::current(1, vec![0.0, 1e-3, 2e-3]),
//! ]);
//! run.run_multi(&mut smu, sink_callback::<McIvPoint, _>(Arc::clone(&table)))?;
//!
//! let df = table.lock().unwrap().to_data_frame()?;
//! assert_eq!(df.height(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Real hardware
//!
//! ```rust,no_run
//! use ivsweep_rs::{range, ScpiSmu, SweepRun, SweepStepConfig};
//!
//! let mut smu = ScpiSmu::connect("/dev/ttyUSB0", 9600)?;
//! let mut run = SweepRun::single(SweepStepConfig::voltage(0, range::step(0.0, 2.0, 0.1)))
//!     .turn_off_after(true);
//! let points = run.run(&mut smu, |i, p| {
//!     println!("{i}: {p}");
//!     Ok(())
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod averaging;
pub mod cancel;
pub mod filter;
pub mod instrument;
pub mod points;
pub mod progress;
pub mod range;
pub mod scpi;
pub mod sim;
pub mod sink;
pub mod sweep;
pub mod sweep_config;

// Re-export the main types for convenience
pub use averaging::{Averaged, ChannelRecord};
pub use cancel::CancellationToken;
pub use filter::{Filter, FilterMode, SampleSource};
pub use instrument::{
    ChannelView, Instrument, InstrumentError, InstrumentResult, IvMeter, IvSource,
    MultiChannelSmu, Quantity, SingleChannel, Smu, Source, Switch,
};
pub use points::{IvPoint, McIvPoint, TabularPoint};
pub use progress::{CallbackError, ProgressCallback, ProgressNotifier};
pub use scpi::{ScpiSmu, ScpiTerminal};
pub use sim::{SimEvent, SimulatedSmu};
pub use sink::{sink_callback, IvTable, ResultSink, SinkError};
pub use sweep::{RunState, SweepError, SweepRun};
pub use sweep_config::{PulseConfig, SweepConfigError, SweepMode, SweepStepConfig};
