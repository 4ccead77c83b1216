//! Averaging policies that turn noisy single-shot reads into one stable value.

use std::collections::VecDeque;
use std::fmt;

use crate::instrument::InstrumentResult;

/// Something that can hand out one raw sample at a time.
///
/// Closures `FnMut() -> InstrumentResult<f64>` are sample sources with no
/// preparation step.
pub trait SampleSource {
    /// Take one fresh sample from the hardware.
    fn read_raw(&mut self) -> InstrumentResult<f64>;

    /// Instrument-side preparation for the given mode, e.g. disabling an
    /// on-board filter so that `read_raw` really returns single shots.
    fn prepare(&mut self, _mode: FilterMode) -> InstrumentResult<()> {
        Ok(())
    }
}

impl<F> SampleSource for F
where
    F: FnMut() -> InstrumentResult<f64>,
{
    fn read_raw(&mut self) -> InstrumentResult<f64> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    /// One raw read per value.
    #[default]
    Bypass,
    /// Mean of `count` fresh reads.
    MeanRepeat,
    /// Mean of the last `count` reads, one new read per value.
    MeanMoving,
    /// Median of `count` fresh reads.
    MedianRepeat,
    /// Median of the last `count` reads, one new read per value.
    MedianMoving,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bypass => "none",
            Self::MeanRepeat => "mean-repeat",
            Self::MeanMoving => "mean-moving",
            Self::MedianRepeat => "median-repeat",
            Self::MedianMoving => "median-moving",
        }
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, Self::MeanMoving | Self::MedianMoving)
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown filter mode '{0}'")]
pub struct ParseFilterModeError(String);

impl std::str::FromStr for FilterMode {
    type Err = ParseFilterModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "bypass" => Ok(Self::Bypass),
            "mean-repeat" => Ok(Self::MeanRepeat),
            "mean-moving" => Ok(Self::MeanMoving),
            "median-repeat" => Ok(Self::MedianRepeat),
            "median-moving" => Ok(Self::MedianMoving),
            _ => Err(ParseFilterModeError(s.to_string())),
        }
    }
}

/// Averaging state for one measured quantity.
///
/// `count` is always at least 1 and the moving buffer never holds more than
/// `count` samples. Reconfiguring never clears the buffer, call [`Filter::clear`]
/// for that.
#[derive(Debug, Clone)]
pub struct Filter {
    mode: FilterMode,
    count: usize,
    buffer: VecDeque<f64>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::bypass()
    }
}

impl Filter {
    pub fn new(mode: FilterMode, count: usize) -> Self {
        let count = count.max(1);
        Self {
            mode,
            count,
            buffer: VecDeque::with_capacity(count),
        }
    }

    pub fn bypass() -> Self {
        Self::new(FilterMode::Bypass, 1)
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of samples currently held by a moving filter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Switch policy. [`Filter::set_up`] must be run again before the next read.
    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
    }

    /// Change the averaging window. A count of 0 is treated as 1.
    ///
    /// Shrinking the window drops the oldest buffered samples.
    pub fn set_count(&mut self, count: usize) {
        let count = count.max(1);
        if count != self.count {
            log::debug!("Filter count {} -> {}", self.count, count);
        }
        self.count = count;
        while self.buffer.len() > self.count {
            self.buffer.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn set_up<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> InstrumentResult<()> {
        source.prepare(self.mode)
    }

    /// Produce one filtered value. Raw read failures are returned unchanged.
    pub fn get_value<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> InstrumentResult<f64> {
        match self.mode {
            FilterMode::Bypass => source.read_raw(),
            FilterMode::MeanRepeat => Ok(mean(&self.read_batch(source)?)),
            FilterMode::MedianRepeat => Ok(median(&self.read_batch(source)?)),
            FilterMode::MeanMoving => {
                self.push(source.read_raw()?);
                Ok(mean(self.buffer.make_contiguous()))
            }
            FilterMode::MedianMoving => {
                self.push(source.read_raw()?);
                Ok(median(self.buffer.make_contiguous()))
            }
        }
    }

    fn read_batch<S: SampleSource + ?Sized>(&self, source: &mut S) -> InstrumentResult<Vec<f64>> {
        (0..self.count).map(|_| source.read_raw()).collect()
    }

    fn push(&mut self, sample: f64) {
        while self.buffer.len() >= self.count {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
    }
}

/// Arithmetic mean; `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median; the average of the two central values for even lengths.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentError;

    /// Hands out a fixed sequence and counts reads and preparations.
    struct Scripted {
        samples: Vec<f64>,
        reads: usize,
        prepared: Vec<FilterMode>,
    }

    impl Scripted {
        fn new(samples: &[f64]) -> Self {
            Self {
                samples: samples.to_vec(),
                reads: 0,
                prepared: Vec::new(),
            }
        }
    }

    impl SampleSource for Scripted {
        fn read_raw(&mut self) -> InstrumentResult<f64> {
            let value = self.samples.get(self.reads).copied().ok_or_else(|| {
                InstrumentError::Timeout {
                    command: "read".to_string(),
                }
            })?;
            self.reads += 1;
            Ok(value)
        }

        fn prepare(&mut self, mode: FilterMode) -> InstrumentResult<()> {
            self.prepared.push(mode);
            Ok(())
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_bypass_reads_once() {
        let mut source = Scripted::new(&[4.2, 9.9]);
        let mut filter = Filter::bypass();
        assert_eq!(filter.get_value(&mut source).unwrap(), 4.2);
        assert_eq!(source.reads, 1);
    }

    #[test]
    fn test_mean_repeat_consumes_count_samples() {
        for n in 1..=6 {
            let samples: Vec<f64> = (0..n).map(|i| f64::from(i) * 1.5 + 0.25).collect();
            let expected = samples.iter().sum::<f64>() / f64::from(n);
            let mut source = Scripted::new(&samples);
            let mut filter = Filter::new(FilterMode::MeanRepeat, n as usize);
            assert!(close(filter.get_value(&mut source).unwrap(), expected));
            assert_eq!(source.reads, n as usize);
            assert_eq!(filter.buffered(), 0);
        }
    }

    #[test]
    fn test_mean_moving_window() {
        let samples = [1.0, 2.0, 6.0, 3.0, 10.0, -4.0];
        let k = 3;
        let mut source = Scripted::new(&samples);
        let mut filter = Filter::new(FilterMode::MeanMoving, k);

        for j in 0..samples.len() {
            let start = (j + 1).saturating_sub(k);
            let window = &samples[start..=j];
            let expected = window.iter().sum::<f64>() / window.len() as f64;
            assert!(close(filter.get_value(&mut source).unwrap(), expected));
            assert!(filter.buffered() <= k);
        }
        assert_eq!(source.reads, samples.len());
    }

    #[test]
    fn test_median_repeat_odd_and_even() {
        let mut odd = Scripted::new(&[5.0, 1.0, 3.0]);
        let mut filter = Filter::new(FilterMode::MedianRepeat, 3);
        assert_eq!(filter.get_value(&mut odd).unwrap(), 3.0);

        let mut even = Scripted::new(&[8.0, 1.0, 4.0, 2.0]);
        filter.set_count(4);
        assert_eq!(filter.get_value(&mut even).unwrap(), 3.0);
    }

    #[test]
    fn test_median_moving_fills_then_slides() {
        let mut source = Scripted::new(&[10.0, 0.0, 4.0, 100.0]);
        let mut filter = Filter::new(FilterMode::MedianMoving, 3);
        assert_eq!(filter.get_value(&mut source).unwrap(), 10.0);
        assert_eq!(filter.get_value(&mut source).unwrap(), 5.0);
        assert_eq!(filter.get_value(&mut source).unwrap(), 4.0);
        // window is now [0, 4, 100]
        assert_eq!(filter.get_value(&mut source).unwrap(), 4.0);
    }

    #[test]
    fn test_set_count_keeps_buffer_and_clamps() {
        let mut source = Scripted::new(&[1.0, 2.0, 3.0, 4.0]);
        let mut filter = Filter::new(FilterMode::MeanMoving, 4);
        for _ in 0..4 {
            filter.get_value(&mut source).unwrap();
        }
        filter.set_count(4);
        assert_eq!(filter.buffered(), 4);

        filter.set_count(2);
        assert_eq!(filter.buffered(), 2);

        filter.set_count(0);
        assert_eq!(filter.count(), 1);
        assert_eq!(filter.buffered(), 1);

        filter.clear();
        assert_eq!(filter.buffered(), 0);
    }

    #[test]
    fn test_set_up_prepares_current_mode() {
        let mut source = Scripted::new(&[]);
        let mut filter = Filter::new(FilterMode::MeanRepeat, 2);
        filter.set_up(&mut source).unwrap();
        filter.set_mode(FilterMode::Bypass);
        filter.set_up(&mut source).unwrap();
        assert_eq!(source.prepared, vec![FilterMode::MeanRepeat, FilterMode::Bypass]);
    }

    #[test]
    fn test_read_failure_propagates() {
        let mut source = Scripted::new(&[1.0]);
        let mut filter = Filter::new(FilterMode::MeanRepeat, 3);
        assert!(matches!(
            filter.get_value(&mut source),
            Err(InstrumentError::Timeout { .. })
        ));
    }

    #[test]
    fn test_closure_source() {
        let mut calls = 0;
        let mut read = || -> InstrumentResult<f64> {
            calls += 1;
            Ok(2.0)
        };
        let mut filter = Filter::new(FilterMode::MeanRepeat, 5);
        assert_eq!(filter.get_value(&mut read).unwrap(), 2.0);
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("median-moving".parse::<FilterMode>().unwrap(), FilterMode::MedianMoving);
        assert_eq!("NONE".parse::<FilterMode>().unwrap(), FilterMode::Bypass);
        assert!("boxcar".parse::<FilterMode>().is_err());
    }
}
