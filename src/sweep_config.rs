use std::collections::HashSet;
use std::time::Duration;

use crate::instrument::Source;
use crate::range;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SweepConfigError {
    #[error("No channels configured")]
    NoChannels,

    #[error("Channel {channel} has an empty value sequence")]
    EmptySequence { channel: usize },

    #[error("Channel {channel} is configured more than once")]
    DuplicateChannel { channel: usize },

    #[error("Channel {channel} does not exist (instrument has {available})")]
    ChannelOutOfRange { channel: usize, available: usize },

    #[error("Combo sweep needs equal lengths: channel {channel} has {found} steps, expected {expected}")]
    LengthMismatch {
        channel: usize,
        expected: usize,
        found: usize,
    },
}

/// How several channel sequences are combined into one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SweepMode {
    /// Every later channel completes a full sweep per value of an earlier one.
    #[default]
    Nested,
    /// All channels advance together, one index per step.
    Combo,
}

/// The sequence one channel is driven through.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SweepStepConfig {
    pub channel: usize,
    pub source: Source,
    pub values: Vec<f64>,
    pub delay: Duration,
    pub symmetric: bool,
}

impl SweepStepConfig {
    pub fn new(channel: usize, source: Source, values: Vec<f64>) -> Self {
        Self {
            channel,
            source,
            values,
            delay: Duration::ZERO,
            symmetric: false,
        }
    }

    /// Source voltage on `channel`, measure current.
    pub fn voltage(channel: usize, values: Vec<f64>) -> Self {
        Self::new(channel, Source::Voltage, values)
    }

    /// Source current on `channel`, measure voltage.
    pub fn current(channel: usize, values: Vec<f64>) -> Self {
        Self::new(channel, Source::Current, values)
    }

    /// Linear sequence of `steps` points from `start` to `stop`.
    pub fn linear(channel: usize, source: Source, start: f64, stop: f64, steps: usize) -> Self {
        Self::new(channel, source, range::linear(start, stop, steps))
    }

    /// Settle time between setting a value and measuring.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sweep back down after reaching the last value.
    pub fn symmetric(mut self, symmetric: bool) -> Self {
        self.symmetric = symmetric;
        self
    }

    /// Values in the order they are applied.
    pub fn sequence(&self) -> Vec<f64> {
        if self.symmetric {
            range::mirrored(&self.values)
        } else {
            self.values.clone()
        }
    }

    pub fn len(&self) -> usize {
        let n = self.values.len();
        if self.symmetric && n > 0 {
            2 * n - 1
        } else {
            n
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn validate(&self, available: usize) -> Result<(), SweepConfigError> {
        if self.channel >= available {
            return Err(SweepConfigError::ChannelOutOfRange {
                channel: self.channel,
                available,
            });
        }
        if self.values.is_empty() {
            return Err(SweepConfigError::EmptySequence {
                channel: self.channel,
            });
        }
        Ok(())
    }
}

/// Dwell times of a pulsed sweep.
///
/// Every value is applied for `on_time` with the output held at `off_value`
/// for `off_time` before it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PulseConfig {
    pub off_value: f64,
    pub on_time: Duration,
    pub off_time: Duration,
}

impl PulseConfig {
    pub fn new(off_value: f64, on_time: Duration, off_time: Duration) -> Self {
        Self {
            off_value,
            on_time,
            off_time,
        }
    }
}

/// Checks a set of channel configurations against each other and the instrument.
pub(crate) fn validate_steps(
    steps: &[SweepStepConfig],
    mode: SweepMode,
    available: usize,
) -> Result<(), SweepConfigError> {
    let first = steps.first().ok_or(SweepConfigError::NoChannels)?;

    let mut seen = HashSet::new();
    for step in steps {
        step.validate(available)?;
        if !seen.insert(step.channel) {
            return Err(SweepConfigError::DuplicateChannel {
                channel: step.channel,
            });
        }
    }

    if mode == SweepMode::Combo {
        let expected = first.len();
        if let Some(bad) = steps.iter().find(|s| s.len() != expected) {
            return Err(SweepConfigError::LengthMismatch {
                channel: bad.channel,
                expected,
                found: bad.len(),
            });
        }
    }

    Ok(())
}
