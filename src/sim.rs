//! A simulated multi-channel source-measure unit.
//!
//! Responds deterministically, records every hardware operation in order and
//! can be told to fail, which makes it the stand-in instrument for tests and
//! demos.

use crate::instrument::{InstrumentError, InstrumentResult, MultiChannelSmu, Quantity, Source};

/// Maps a channel's sourced value to the complementary measured value.
pub type Response = Box<dyn Fn(usize, Source, f64) -> f64 + Send>;

/// One hardware operation, as seen by the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    TurnOn(usize),
    TurnOff(usize),
    SetSource(usize, Source),
    SetBias(usize, f64),
    Read(usize, Quantity),
    PrepareRawRead(usize),
}

#[derive(Debug, Clone)]
struct SimChannel {
    on: bool,
    source: Source,
    bias: f64,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            on: false,
            source: Source::Voltage,
            bias: 0.0,
        }
    }
}

pub struct SimulatedSmu {
    channels: Vec<SimChannel>,
    response: Response,
    noise: Vec<f64>,
    reads: usize,
    fail_after_reads: Option<usize>,
    events: Vec<SimEvent>,
}

impl SimulatedSmu {
    /// `response` turns a sourced value into the measured one, identically on
    /// every channel.
    pub fn new<F>(channels: usize, response: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + 'static,
    {
        Self::with_response(channels, move |_, _, value| response(value))
    }

    pub fn with_response<F>(channels: usize, response: F) -> Self
    where
        F: Fn(usize, Source, f64) -> f64 + Send + 'static,
    {
        Self {
            channels: vec![SimChannel::default(); channels],
            response: Box::new(response),
            noise: Vec::new(),
            reads: 0,
            fail_after_reads: None,
            events: Vec::new(),
        }
    }

    /// A resistor of `ohms` on every channel.
    pub fn resistor(channels: usize, ohms: f64) -> Self {
        Self::with_response(channels, move |_, source, value| match source {
            Source::Voltage => value / ohms,
            Source::Current => value * ohms,
        })
    }

    /// Added to successive measured values of the complementary quantity,
    /// cycling through the list.
    pub fn with_noise(mut self, noise: Vec<f64>) -> Self {
        self.noise = noise;
        self
    }

    /// Every read after the first `reads` fails with a timeout.
    pub fn fail_after_reads(mut self, reads: usize) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Values written to the bias of `channel`, in order.
    pub fn bias_writes(&self, channel: usize) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::SetBias(ch, v) if *ch == channel => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Number of operations that changed instrument state.
    pub fn writes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| !matches!(e, SimEvent::Read(..)))
            .count()
    }

    pub fn raw_reads(&self) -> usize {
        self.reads
    }

    fn slot(&mut self, channel: usize) -> InstrumentResult<&mut SimChannel> {
        let available = self.channels.len();
        self.channels
            .get_mut(channel)
            .ok_or(InstrumentError::ChannelOutOfRange { channel, available })
    }

    fn read(&mut self, channel: usize, quantity: Quantity) -> InstrumentResult<f64> {
        let state = self.slot(channel)?.clone();
        if self.fail_after_reads.is_some_and(|limit| self.reads >= limit) {
            return Err(InstrumentError::Timeout {
                command: format!("read {quantity:?} on channel {channel}"),
            });
        }

        self.events.push(SimEvent::Read(channel, quantity));
        let noise = if self.noise.is_empty() {
            0.0
        } else {
            self.noise[self.reads % self.noise.len()]
        };
        self.reads += 1;

        // Outputs that are off neither source nor sink anything.
        let bias = if state.on { state.bias } else { 0.0 };
        let sourced = match state.source {
            Source::Voltage => Quantity::Voltage,
            Source::Current => Quantity::Current,
        };
        if quantity == sourced {
            Ok(bias)
        } else {
            Ok((self.response)(channel, state.source, bias) + noise)
        }
    }
}

impl MultiChannelSmu for SimulatedSmu {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn turn_on(&mut self, channel: usize) -> InstrumentResult<()> {
        self.slot(channel)?.on = true;
        self.events.push(SimEvent::TurnOn(channel));
        Ok(())
    }

    fn turn_off(&mut self, channel: usize) -> InstrumentResult<()> {
        self.slot(channel)?.on = false;
        self.events.push(SimEvent::TurnOff(channel));
        Ok(())
    }

    fn is_on(&mut self, channel: usize) -> InstrumentResult<bool> {
        Ok(self.slot(channel)?.on)
    }

    fn set_source(&mut self, channel: usize, source: Source) -> InstrumentResult<()> {
        self.slot(channel)?.source = source;
        self.events.push(SimEvent::SetSource(channel, source));
        Ok(())
    }

    fn get_source(&mut self, channel: usize) -> InstrumentResult<Source> {
        Ok(self.slot(channel)?.source)
    }

    fn set_bias(&mut self, channel: usize, value: f64) -> InstrumentResult<()> {
        if !value.is_finite() {
            return Err(InstrumentError::Incompatible(format!(
                "cannot source {value} on channel {channel}"
            )));
        }
        self.slot(channel)?.bias = value;
        self.events.push(SimEvent::SetBias(channel, value));
        Ok(())
    }

    fn get_bias(&mut self, channel: usize) -> InstrumentResult<f64> {
        Ok(self.slot(channel)?.bias)
    }

    fn get_voltage(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.read(channel, Quantity::Voltage)
    }

    fn get_current(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.read(channel, Quantity::Current)
    }

    fn prepare_raw_read(&mut self, channel: usize) -> InstrumentResult<()> {
        self.slot(channel)?;
        self.events.push(SimEvent::PrepareRawRead(channel));
        Ok(())
    }

    fn identify(&mut self) -> InstrumentResult<String> {
        Ok(format!("Simulated SMU, {} channels", self.channels.len()))
    }
}
