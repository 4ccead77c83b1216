//! Sweep execution.
//!
//! A [`SweepRun`] drives one or more channels through their configured value
//! sequences on the calling thread, which keeps exclusive use of the
//! instrument for the whole run. Each completed step is appended to the
//! result list and handed to a [`ProgressNotifier`], so the user callback runs
//! on its own thread and can never hold up the hardware loop.
//!
//! Whatever way the run ends, the notifier is drained and joined before the
//! run returns. When a step fails, the callbacks for all earlier steps have
//! therefore already run, and none runs for the failed step or any later one.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::instrument::{InstrumentError, InstrumentResult, MultiChannelSmu, SingleChannel, Smu};
use crate::points::{IvPoint, McIvPoint};
use crate::progress::{CallbackError, ProgressNotifier};
use crate::sweep_config::{validate_steps, PulseConfig, SweepConfigError, SweepMode, SweepStepConfig};

/// Result buffers are pre-sized up to this many points and grow beyond it.
const MAX_PREALLOCATED_POINTS: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Invalid sweep configuration: {0}")]
    Config(#[from] SweepConfigError),

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Sweep cancelled after {completed} steps")]
    Cancelled { completed: usize },

    #[error("Failed to start progress notifier: {0}")]
    Notifier(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A configured sweep over one or more channels.
///
/// ```rust
/// use ivsweep_rs::{range, SimulatedSmu, SweepRun, SweepStepConfig};
///
/// let mut smu = SimulatedSmu::resistor(1, 1_000.0);
/// let mut run = SweepRun::single(SweepStepConfig::voltage(0, range::linear(0.0, 1.0, 11)));
/// let points = run.run_multi(&mut smu, |i, p| {
///     println!("step {i}: {p:?}");
///     Ok(())
/// })?;
/// assert_eq!(points.len(), 11);
/// # Ok::<(), ivsweep_rs::SweepError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SweepRun {
    steps: Vec<SweepStepConfig>,
    mode: SweepMode,
    pulse: Option<PulseConfig>,
    state: RunState,
    cancel: CancellationToken,
    turn_off_after: bool,
}

impl SweepRun {
    pub fn new(steps: Vec<SweepStepConfig>, mode: SweepMode) -> Self {
        Self {
            steps,
            mode,
            pulse: None,
            state: RunState::Configured,
            cancel: CancellationToken::new(),
            turn_off_after: false,
        }
    }

    pub fn single(step: SweepStepConfig) -> Self {
        Self::new(vec![step], SweepMode::Nested)
    }

    /// Later channels run a full sweep for every value of earlier ones.
    pub fn nested(steps: Vec<SweepStepConfig>) -> Self {
        Self::new(steps, SweepMode::Nested)
    }

    /// All channels step together; their sequences must be equally long.
    pub fn combo(steps: Vec<SweepStepConfig>) -> Self {
        Self::new(steps, SweepMode::Combo)
    }

    /// Each value is applied as a pulse, returning to `pulse.off_value` in between.
    ///
    /// The step's settle delay is measured from the start of each pulse and may
    /// not exceed either dwell time.
    pub fn pulsed(step: SweepStepConfig, pulse: PulseConfig) -> Self {
        let mut run = Self::single(step);
        run.pulse = Some(pulse);
        run
    }

    /// Use an externally owned token to stop the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Switch the swept outputs off after a successful run.
    pub fn turn_off_after(mut self, turn_off: bool) -> Self {
        self.turn_off_after = turn_off;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn mode(&self) -> SweepMode {
        self.mode
    }

    pub fn steps(&self) -> &[SweepStepConfig] {
        &self.steps
    }

    pub fn pulse(&self) -> Option<&PulseConfig> {
        self.pulse.as_ref()
    }

    /// A handle that cancels this run from any thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of measurements a complete run produces, saturating at `usize::MAX`.
    pub fn total_points(&self) -> usize {
        if self.steps.is_empty() {
            return 0;
        }
        match (self.mode, self.pulse) {
            (SweepMode::Nested, None) => self
                .steps
                .iter()
                .map(SweepStepConfig::len)
                .fold(1, usize::saturating_mul),
            _ => self.steps[0].len(),
        }
    }

    /// Sweep a single-channel instrument. The step must target channel 0.
    pub fn run<S, F>(&mut self, smu: &mut S, on_progress: F) -> Result<Vec<IvPoint>, SweepError>
    where
        S: Smu + ?Sized,
        F: FnMut(usize, &IvPoint) -> Result<(), CallbackError> + Send + 'static,
    {
        let mut lifted = SingleChannel::new(smu);
        self.execute(&mut lifted, on_progress, |m| measure_channel(m, 0))
    }

    /// Sweep channels of a multi-channel instrument, measuring every configured
    /// channel at each step.
    pub fn run_multi<M, F>(
        &mut self,
        smu: &mut M,
        on_progress: F,
    ) -> Result<Vec<McIvPoint>, SweepError>
    where
        M: MultiChannelSmu + ?Sized,
        F: FnMut(usize, &McIvPoint) -> Result<(), CallbackError> + Send + 'static,
    {
        let channels: Vec<usize> = self.steps.iter().map(|s| s.channel).collect();
        self.execute(smu, on_progress, |m| measure_channels(m, &channels))
    }

    /// Sweep through the instrument's multi-channel interface when it has one,
    /// treating it as a one-channel instrument otherwise.
    pub fn run_any<S, F>(&mut self, smu: &mut S, on_progress: F) -> Result<Vec<McIvPoint>, SweepError>
    where
        S: Smu + ?Sized,
        F: FnMut(usize, &McIvPoint) -> Result<(), CallbackError> + Send + 'static,
    {
        if let Some(multi) = smu.as_multi_channel() {
            return self.run_multi(multi, on_progress);
        }
        self.run_multi(&mut SingleChannel::new(smu), on_progress)
    }

    fn execute<M, T, F, G>(
        &mut self,
        smu: &mut M,
        on_progress: F,
        measure: G,
    ) -> Result<Vec<T>, SweepError>
    where
        M: MultiChannelSmu + ?Sized,
        T: Clone + Send + 'static,
        F: FnMut(usize, &T) -> Result<(), CallbackError> + Send + 'static,
        G: FnMut(&mut M) -> InstrumentResult<T>,
    {
        // Nothing touches the instrument before the configuration is accepted.
        validate_steps(&self.steps, self.mode, smu.channel_count())?;
        if let Some(pulse) = &self.pulse {
            validate_pulse(&self.steps[0], pulse)?;
        }

        let span = tracing::info_span!(
            "sweep",
            mode = ?self.mode,
            pulsed = self.pulse.is_some(),
            points = self.total_points()
        );
        let _enter = span.enter();

        let notifier = ProgressNotifier::start(on_progress).map_err(SweepError::Notifier)?;
        log::debug!(
            "Starting {:?} sweep over channels {:?}, {} points",
            self.mode,
            self.steps.iter().map(|s| s.channel).collect::<Vec<_>>(),
            self.total_points()
        );

        self.state = RunState::Running;
        let mut acquisition = Acquisition {
            smu,
            measure,
            notifier,
            results: Vec::with_capacity(self.total_points().min(MAX_PREALLOCATED_POINTS)),
            cancel: self.cancel.clone(),
        };
        let outcome = drive(
            &self.steps,
            self.mode,
            self.pulse.as_ref(),
            self.turn_off_after,
            &mut acquisition,
        );
        let Acquisition {
            notifier, results, ..
        } = acquisition;
        let delivered = notifier.end();

        match outcome {
            Ok(()) => {
                log::debug!("Sweep completed, {} points, {} delivered", results.len(), delivered);
                self.state = RunState::Completed;
                Ok(results)
            }
            Err(e @ SweepError::Cancelled { .. }) => {
                log::info!("{}", e);
                self.state = RunState::Cancelled;
                Err(e)
            }
            Err(e) => {
                log::warn!("Sweep failed after {} points: {}", results.len(), e);
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }
}

fn validate_pulse(step: &SweepStepConfig, pulse: &PulseConfig) -> Result<(), InstrumentError> {
    if step.delay > pulse.on_time || step.delay > pulse.off_time {
        return Err(InstrumentError::Incompatible(format!(
            "settle delay {:?} exceeds pulse dwell (on {:?}, off {:?})",
            step.delay, pulse.on_time, pulse.off_time
        )));
    }
    Ok(())
}

/// Per-run state of the hardware loop.
struct Acquisition<'a, M: ?Sized, T: Send + 'static, G> {
    smu: &'a mut M,
    measure: G,
    notifier: ProgressNotifier<T>,
    results: Vec<T>,
    cancel: CancellationToken,
}

impl<M, T, G> Acquisition<'_, M, T, G>
where
    M: MultiChannelSmu + ?Sized,
    T: Clone + Send + 'static,
    G: FnMut(&mut M) -> InstrumentResult<T>,
{
    fn cancelled(&self) -> SweepError {
        SweepError::Cancelled {
            completed: self.results.len(),
        }
    }

    fn check_cancelled(&self) -> Result<(), SweepError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn settle(&self, delay: Duration) -> Result<(), SweepError> {
        if self.cancel.sleep(delay) {
            Ok(())
        } else {
            Err(self.cancelled())
        }
    }

    /// Measure, store, then publish. The point is in `results` before the
    /// notifier sees it.
    fn capture(&mut self) -> Result<(), SweepError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("sweep step"), 0));

        let point = (self.measure)(&mut *self.smu)?;
        self.results.push(point.clone());
        let index = self.notifier.notify(point);
        log::trace!("Captured step {}", index);
        Ok(())
    }
}

fn drive<M, T, G>(
    steps: &[SweepStepConfig],
    mode: SweepMode,
    pulse: Option<&PulseConfig>,
    turn_off_after: bool,
    acq: &mut Acquisition<'_, M, T, G>,
) -> Result<(), SweepError>
where
    M: MultiChannelSmu + ?Sized,
    T: Clone + Send + 'static,
    G: FnMut(&mut M) -> InstrumentResult<T>,
{
    let sequences: Vec<Vec<f64>> = steps.iter().map(SweepStepConfig::sequence).collect();

    for (step, sequence) in steps.iter().zip(&sequences) {
        let initial = pulse.map_or(sequence[0], |p| p.off_value);
        log::debug!(
            "Channel {}: sourcing {} from {}",
            step.channel,
            step.source,
            initial
        );
        acq.smu.turn_off(step.channel)?;
        acq.smu.set_source(step.channel, step.source)?;
        acq.smu.set_bias(step.channel, initial)?;
        acq.smu.turn_on(step.channel)?;
    }

    match (pulse, mode) {
        (Some(pulse), _) => run_pulsed(&steps[0], &sequences[0], pulse, acq)?,
        (None, SweepMode::Nested) => run_nested(steps, &sequences, 0, acq)?,
        (None, SweepMode::Combo) => run_combo(steps, &sequences, acq)?,
    }

    if turn_off_after {
        for step in steps {
            acq.smu.turn_off(step.channel)?;
        }
    }
    Ok(())
}

fn run_nested<M, T, G>(
    steps: &[SweepStepConfig],
    sequences: &[Vec<f64>],
    level: usize,
    acq: &mut Acquisition<'_, M, T, G>,
) -> Result<(), SweepError>
where
    M: MultiChannelSmu + ?Sized,
    T: Clone + Send + 'static,
    G: FnMut(&mut M) -> InstrumentResult<T>,
{
    let step = &steps[level];
    let innermost = level + 1 == steps.len();

    for &value in &sequences[level] {
        acq.check_cancelled()?;
        acq.smu.set_bias(step.channel, value)?;
        acq.settle(step.delay)?;

        if innermost {
            acq.capture()?;
        } else {
            run_nested(steps, sequences, level + 1, acq)?;
        }
    }
    Ok(())
}

fn run_combo<M, T, G>(
    steps: &[SweepStepConfig],
    sequences: &[Vec<f64>],
    acq: &mut Acquisition<'_, M, T, G>,
) -> Result<(), SweepError>
where
    M: MultiChannelSmu + ?Sized,
    T: Clone + Send + 'static,
    G: FnMut(&mut M) -> InstrumentResult<T>,
{
    // All channels share one settle period, long enough for the slowest.
    let delay = steps.iter().map(|s| s.delay).max().unwrap_or_default();
    let len = sequences.first().map_or(0, Vec::len);

    for i in 0..len {
        acq.check_cancelled()?;
        for (step, sequence) in steps.iter().zip(sequences) {
            acq.smu.set_bias(step.channel, sequence[i])?;
        }
        acq.settle(delay)?;
        acq.capture()?;
    }
    Ok(())
}

fn run_pulsed<M, T, G>(
    step: &SweepStepConfig,
    sequence: &[f64],
    pulse: &PulseConfig,
    acq: &mut Acquisition<'_, M, T, G>,
) -> Result<(), SweepError>
where
    M: MultiChannelSmu + ?Sized,
    T: Clone + Send + 'static,
    G: FnMut(&mut M) -> InstrumentResult<T>,
{
    let remaining_on = pulse.on_time.saturating_sub(step.delay);

    for &value in sequence {
        acq.check_cancelled()?;
        acq.smu.set_bias(step.channel, pulse.off_value)?;
        acq.settle(pulse.off_time)?;

        acq.smu.set_bias(step.channel, value)?;
        acq.settle(step.delay)?;
        acq.capture()?;
        acq.settle(remaining_on)?;
    }

    acq.smu.set_bias(step.channel, pulse.off_value)?;
    Ok(())
}

fn measure_channel<M: MultiChannelSmu + ?Sized>(smu: &mut M, channel: usize) -> InstrumentResult<IvPoint> {
    let voltage = smu.get_voltage(channel)?;
    let current = smu.get_current(channel)?;
    Ok(IvPoint::new(voltage, current))
}

fn measure_channels<M: MultiChannelSmu + ?Sized>(
    smu: &mut M,
    channels: &[usize],
) -> InstrumentResult<McIvPoint> {
    let mut point = McIvPoint::new();
    for &channel in channels {
        point.insert(channel, measure_channel(smu, channel)?);
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averaging::Averaged;
    use crate::filter::FilterMode;
    use crate::instrument::Source;
    use crate::range;
    use crate::sim::{SimEvent, SimulatedSmu};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Instant;

    type Recorded<T> = Arc<Mutex<Vec<(usize, T)>>>;

    fn recorder<T: Clone + Send + 'static>(
    ) -> (Recorded<T>, impl FnMut(usize, &T) -> Result<(), CallbackError> + Send + 'static) {
        let seen: Recorded<T> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |i: usize, p: &T| -> Result<(), CallbackError> {
            sink.lock().unwrap().push((i, p.clone()));
            Ok(())
        })
    }

    #[test]
    fn test_linear_voltage_sweep_scenario() {
        let mut sim = SimulatedSmu::new(1, |v| 2.0 * v);
        let mut channel = sim.channel(0).unwrap();
        let (seen, callback) = recorder::<IvPoint>();
        let mut run = SweepRun::single(SweepStepConfig::linear(0, Source::Voltage, 0.0, 1.0, 3));
        assert_eq!(run.state(), RunState::Configured);

        let points = run.run(&mut channel, callback).unwrap();

        let expected = vec![
            IvPoint::new(0.0, 0.0),
            IvPoint::new(0.5, 1.0),
            IvPoint::new(1.0, 2.0),
        ];
        assert_eq!(points, expected);
        assert_eq!(
            *seen.lock().unwrap(),
            expected.into_iter().enumerate().collect::<Vec<_>>()
        );
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn test_multi_channel_run_of_one_channel() {
        let mut smu = SimulatedSmu::new(2, |v| 2.0 * v);
        let (seen, callback) = recorder::<McIvPoint>();
        let mut run = SweepRun::single(SweepStepConfig::voltage(1, vec![0.0, 0.5, 1.0]));
        let points = run.run_multi(&mut smu, callback).unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[2].get(1), Some(&IvPoint::new(1.0, 2.0)));
        assert!(points[2].get(0).is_none());
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(smu.bias_writes(0).is_empty());
    }

    #[test]
    fn test_hardware_sequence_of_single_sweep() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![0.1, 0.2]));
        run.run_multi(&mut smu, |_, _| Ok(())).unwrap();

        assert_eq!(
            &smu.events()[..4],
            &[
                SimEvent::TurnOff(0),
                SimEvent::SetSource(0, Source::Voltage),
                SimEvent::SetBias(0, 0.1),
                SimEvent::TurnOn(0),
            ]
        );
        assert!(smu.is_on(0).unwrap());
    }

    #[test]
    fn test_turn_off_after() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![0.1])).turn_off_after(true);
        run.run_multi(&mut smu, |_, _| Ok(())).unwrap();
        assert_eq!(smu.events().last(), Some(&SimEvent::TurnOff(0)));
        assert!(!smu.is_on(0).unwrap());
    }

    #[test]
    fn test_symmetric_sweep_bias_order() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let values = vec![0.0, 0.5, 1.0];
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, values).symmetric(true));
        let points = run.run_multi(&mut smu, |_, _| Ok(())).unwrap();

        // The first write is the initial bias programmed before the output is enabled.
        assert_eq!(smu.bias_writes(0), vec![0.0, 0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn test_nested_sweep_is_cartesian_product() {
        let mut smu = SimulatedSmu::new(2, |v| v);
        let mut run = SweepRun::nested(vec![
            SweepStepConfig::voltage(0, vec![1.0, 2.0]),
            SweepStepConfig::voltage(1, vec![10.0, 20.0, 30.0]),
        ]);
        assert_eq!(run.total_points(), 6);

        let points = run.run_multi(&mut smu, |_, _| Ok(())).unwrap();
        let pairs: Vec<(f64, f64)> = points
            .iter()
            .map(|p| (p.get(0).unwrap().voltage, p.get(1).unwrap().voltage))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (1.0, 10.0),
                (1.0, 20.0),
                (1.0, 30.0),
                (2.0, 10.0),
                (2.0, 20.0),
                (2.0, 30.0)
            ]
        );
    }

    #[test]
    fn test_combo_sweep_steps_in_lockstep() {
        let mut smu = SimulatedSmu::new(2, |v| -v);
        let mut run = SweepRun::combo(vec![
            SweepStepConfig::voltage(1, vec![1.0, 2.0, 3.0]),
            SweepStepConfig::current(0, vec![0.1, 0.2, 0.3]),
        ]);
        let points = run.run_multi(&mut smu, |_, _| Ok(())).unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[2].get(1), Some(&IvPoint::new(3.0, -3.0)));
        assert_eq!(points[2].get(0), Some(&IvPoint::new(-0.3, 0.3)));
    }

    #[test]
    fn test_combo_length_mismatch_touches_no_hardware() {
        let mut smu = SimulatedSmu::new(2, |v| v);
        let (seen, callback) = recorder::<McIvPoint>();
        let mut run = SweepRun::combo(vec![
            SweepStepConfig::voltage(0, vec![1.0, 2.0]),
            SweepStepConfig::voltage(1, vec![1.0, 2.0, 3.0]),
        ]);

        let err = run.run_multi(&mut smu, callback).unwrap_err();
        assert!(matches!(
            err,
            SweepError::Config(SweepConfigError::LengthMismatch { channel: 1, .. })
        ));
        assert!(smu.events().is_empty());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(run.state(), RunState::Configured);
    }

    #[test]
    fn test_callbacks_in_order_under_slow_consumer() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, range::linear(0.0, 1.0, 25)));

        run.run_multi(&mut smu, move |i, _| {
            thread::sleep(Duration::from_millis(if i % 2 == 0 { 3 } else { 0 }));
            sink.lock().unwrap().push(i);
            Ok(())
        })
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_at_step_k_stops_callbacks() {
        // Bypass filter: two reads per step, so step 3 fails on its first read.
        let mut smu = SimulatedSmu::new(1, |v| v).fail_after_reads(6);
        let (seen, callback) = recorder::<McIvPoint>();
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, range::linear(0.0, 1.0, 10)));

        let err = run.run_multi(&mut smu, callback).unwrap_err();
        assert!(matches!(err, SweepError::Instrument(ref e) if e.is_communication()));
        assert_eq!(run.state(), RunState::Failed);

        // The run has returned, so the notifier is already joined.
        let indices: Vec<usize> = seen.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_unsupported_bias_mid_sweep_fails_run() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let (seen, callback) = recorder::<McIvPoint>();
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![0.0, 1.0, f64::NAN, 2.0]));

        let err = run.run_multi(&mut smu, callback).unwrap_err();
        assert!(matches!(err, SweepError::Instrument(ref e) if e.is_incompatible()));
        assert_eq!(run.state(), RunState::Failed);

        let indices: Vec<usize> = seen.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(smu.bias_writes(0), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_callback_error_does_not_abort_sweep() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![0.0, 1.0, 2.0]));
        let points = run
            .run_multi(&mut smu, |i, _| {
                if i == 1 {
                    Err("sink unavailable".into())
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn test_filters_apply_during_sweep() {
        let sim = SimulatedSmu::new(1, |v| 2.0 * v).with_noise(vec![0.1, -0.1]);
        let mut smu = Averaged::new(sim);
        smu.set_averaging(0, FilterMode::MeanRepeat, 2).unwrap();

        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![1.0, 2.0]));
        let points = run.run_multi(&mut smu, |_, _| Ok(())).unwrap();

        // Voltage reads are exact, current reads see the noise cancel out.
        assert!((points[0].get(0).unwrap().current - 2.0).abs() < 1e-9);
        assert!((points[1].get(0).unwrap().current - 4.0).abs() < 1e-9);
        assert_eq!(smu.inner().raw_reads(), 8);
    }

    #[test]
    fn test_pulsed_sweep_returns_to_base_between_pulses() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let step = SweepStepConfig::voltage(0, vec![1.0, 2.0]).delay(Duration::from_millis(1));
        let pulse = PulseConfig::new(0.0, Duration::from_millis(2), Duration::from_millis(2));
        let mut run = SweepRun::pulsed(step, pulse);

        let points = run.run_multi(&mut smu, |_, _| Ok(())).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].get(0).unwrap().voltage, 2.0);
        assert_eq!(smu.bias_writes(0), vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_pulsed_sweep_rejects_long_delay_up_front() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let step = SweepStepConfig::voltage(0, vec![1.0]).delay(Duration::from_millis(5));
        let pulse = PulseConfig::new(0.0, Duration::from_millis(10), Duration::from_millis(2));
        let mut run = SweepRun::pulsed(step, pulse);

        let err = run.run_multi(&mut smu, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, SweepError::Instrument(ref e) if e.is_incompatible()));
        assert!(smu.events().is_empty());
    }

    #[test]
    fn test_pulsed_sweep_rejects_delay_longer_than_pulse() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let step = SweepStepConfig::voltage(0, vec![1.0]).delay(Duration::from_millis(5));
        let pulse = PulseConfig::new(0.0, Duration::from_millis(2), Duration::from_millis(10));
        let mut run = SweepRun::pulsed(step, pulse);

        let err = run.run_multi(&mut smu, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, SweepError::Instrument(ref e) if e.is_incompatible()));
        assert!(smu.events().is_empty());
        assert_eq!(run.state(), RunState::Configured);
    }

    #[test]
    fn test_total_points_saturates() {
        let steps = (0..4)
            .map(|ch| SweepStepConfig::voltage(ch, vec![0.0; 65_536]))
            .collect();
        let run = SweepRun::nested(steps);
        assert_eq!(run.total_points(), usize::MAX);
    }

    #[test]
    fn test_cancellation_stops_and_drains() {
        let mut smu = SimulatedSmu::new(1, |v| v);
        let step = SweepStepConfig::voltage(0, range::linear(0.0, 1.0, 1000))
            .delay(Duration::from_millis(5));
        let mut run = SweepRun::single(step);
        let token = run.cancellation_token();
        let (seen, callback) = recorder::<McIvPoint>();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let started = Instant::now();
        let err = run.run_multi(&mut smu, callback).unwrap_err();
        canceller.join().unwrap();

        let completed = match err {
            SweepError::Cancelled { completed } => completed,
            other => unreachable!("expected cancellation, got {other}"),
        };
        assert!(completed < 1000);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(seen.lock().unwrap().len(), completed);
        assert_eq!(run.state(), RunState::Cancelled);
    }

    #[test]
    fn test_run_any_prefers_multi_channel_access() {
        struct Mainframe(SimulatedSmu);

        impl crate::instrument::Instrument for Mainframe {
            fn identify(&mut self) -> InstrumentResult<String> {
                self.0.identify()
            }
            fn as_multi_channel(&mut self) -> Option<&mut dyn MultiChannelSmu> {
                Some(&mut self.0)
            }
        }
        impl crate::instrument::Switch for Mainframe {
            fn turn_on(&mut self) -> InstrumentResult<()> {
                self.0.turn_on(0)
            }
            fn turn_off(&mut self) -> InstrumentResult<()> {
                self.0.turn_off(0)
            }
            fn is_on(&mut self) -> InstrumentResult<bool> {
                self.0.is_on(0)
            }
        }
        impl crate::instrument::IvSource for Mainframe {
            fn set_source(&mut self, source: Source) -> InstrumentResult<()> {
                self.0.set_source(0, source)
            }
            fn get_source(&mut self) -> InstrumentResult<Source> {
                self.0.get_source(0)
            }
            fn set_bias(&mut self, value: f64) -> InstrumentResult<()> {
                self.0.set_bias(0, value)
            }
            fn get_bias(&mut self) -> InstrumentResult<f64> {
                self.0.get_bias(0)
            }
        }
        impl crate::instrument::IvMeter for Mainframe {
            fn get_voltage(&mut self) -> InstrumentResult<f64> {
                self.0.get_voltage(0)
            }
            fn get_current(&mut self) -> InstrumentResult<f64> {
                self.0.get_current(0)
            }
        }

        let mut frame = Mainframe(SimulatedSmu::new(2, |v| v));
        let mut run = SweepRun::combo(vec![
            SweepStepConfig::voltage(0, vec![1.0]),
            SweepStepConfig::voltage(1, vec![2.0]),
        ]);
        let points = run.run_any(&mut frame, |_, _| Ok(())).unwrap();
        assert_eq!(points[0].len(), 2);

        let mut sim = SimulatedSmu::new(2, |v| v);
        let mut single = sim.channel(1).unwrap();
        let mut run = SweepRun::single(SweepStepConfig::voltage(0, vec![3.0]));
        let points = run.run_any(&mut single, |_, _| Ok(())).unwrap();
        assert_eq!(points[0].get(0), Some(&IvPoint::new(3.0, 3.0)));
    }
}
