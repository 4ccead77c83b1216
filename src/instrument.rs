//! Capability surface of a source-measure instrument.
//!
//! Drivers implement the small single-channel traits ([`Switch`], [`IvSource`],
//! [`IvMeter`]) or the index-parameterised [`MultiChannelSmu`]. [`ChannelView`]
//! turns one channel of a multi-channel instrument into a plain [`Smu`], and
//! [`SingleChannel`] goes the other way.

use std::fmt;

/// Quantity sourced on an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Source {
    Voltage,
    Current,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voltage => "VOLT",
            Self::Current => "CURR",
        }
    }

    /// The quantity measured while this one is sourced.
    pub fn complement(&self) -> Quantity {
        match self {
            Self::Voltage => Quantity::Current,
            Self::Current => Quantity::Voltage,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voltage => write!(f, "voltage"),
            Self::Current => write!(f, "current"),
        }
    }
}

/// Quantity read back from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Voltage,
    Current,
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for reply to '{command}'")]
    Timeout { command: String },

    #[error("Unexpected reply to '{command}': '{response}'")]
    InvalidResponse { command: String, response: String },

    #[error("Device incompatibility: {0}")]
    Incompatible(String),

    #[error("Channel {channel} does not exist (instrument has {available})")]
    ChannelOutOfRange { channel: usize, available: usize },
}

impl InstrumentError {
    /// True for failures of the link to the instrument.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Self::SerialPort(_) | Self::Io(_) | Self::Timeout { .. } | Self::InvalidResponse { .. }
        )
    }

    /// True when the instrument cannot do what was asked of it.
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Self::Incompatible(_) | Self::ChannelOutOfRange { .. })
    }
}

pub type InstrumentResult<T> = Result<T, InstrumentError>;

pub trait Instrument {
    /// Identification string reported by the device.
    fn identify(&mut self) -> InstrumentResult<String>;

    /// Access to per-channel control, if the instrument has more than one output.
    fn as_multi_channel(&mut self) -> Option<&mut dyn MultiChannelSmu> {
        None
    }
}

pub trait Switch {
    fn turn_on(&mut self) -> InstrumentResult<()>;
    fn turn_off(&mut self) -> InstrumentResult<()>;
    fn is_on(&mut self) -> InstrumentResult<bool>;
}

pub trait IvSource {
    fn set_source(&mut self, source: Source) -> InstrumentResult<()>;
    fn get_source(&mut self) -> InstrumentResult<Source>;
    fn set_bias(&mut self, value: f64) -> InstrumentResult<()>;
    fn get_bias(&mut self) -> InstrumentResult<f64>;
}

pub trait IvMeter {
    fn get_voltage(&mut self) -> InstrumentResult<f64>;
    fn get_current(&mut self) -> InstrumentResult<f64>;

    /// Instrument-side preparation before raw samples are taken, e.g. turning
    /// off an on-board averaging filter.
    fn prepare_raw_read(&mut self) -> InstrumentResult<()> {
        Ok(())
    }
}

/// A single-channel source-measure unit.
pub trait Smu: Instrument + Switch + IvSource + IvMeter {}

impl<T: Instrument + Switch + IvSource + IvMeter + ?Sized> Smu for T {}

impl<T: Instrument + ?Sized> Instrument for &mut T {
    fn identify(&mut self) -> InstrumentResult<String> {
        (**self).identify()
    }

    fn as_multi_channel(&mut self) -> Option<&mut dyn MultiChannelSmu> {
        (**self).as_multi_channel()
    }
}

impl<T: Switch + ?Sized> Switch for &mut T {
    fn turn_on(&mut self) -> InstrumentResult<()> {
        (**self).turn_on()
    }

    fn turn_off(&mut self) -> InstrumentResult<()> {
        (**self).turn_off()
    }

    fn is_on(&mut self) -> InstrumentResult<bool> {
        (**self).is_on()
    }
}

impl<T: IvSource + ?Sized> IvSource for &mut T {
    fn set_source(&mut self, source: Source) -> InstrumentResult<()> {
        (**self).set_source(source)
    }

    fn get_source(&mut self) -> InstrumentResult<Source> {
        (**self).get_source()
    }

    fn set_bias(&mut self, value: f64) -> InstrumentResult<()> {
        (**self).set_bias(value)
    }

    fn get_bias(&mut self) -> InstrumentResult<f64> {
        (**self).get_bias()
    }
}

impl<T: IvMeter + ?Sized> IvMeter for &mut T {
    fn get_voltage(&mut self) -> InstrumentResult<f64> {
        (**self).get_voltage()
    }

    fn get_current(&mut self) -> InstrumentResult<f64> {
        (**self).get_current()
    }

    fn prepare_raw_read(&mut self) -> InstrumentResult<()> {
        (**self).prepare_raw_read()
    }
}

/// Index-parameterised control of an instrument with several outputs.
pub trait MultiChannelSmu {
    fn channel_count(&self) -> usize;

    fn turn_on(&mut self, channel: usize) -> InstrumentResult<()>;
    fn turn_off(&mut self, channel: usize) -> InstrumentResult<()>;
    fn is_on(&mut self, channel: usize) -> InstrumentResult<bool>;

    fn set_source(&mut self, channel: usize, source: Source) -> InstrumentResult<()>;
    fn get_source(&mut self, channel: usize) -> InstrumentResult<Source>;
    fn set_bias(&mut self, channel: usize, value: f64) -> InstrumentResult<()>;
    fn get_bias(&mut self, channel: usize) -> InstrumentResult<f64>;

    fn get_voltage(&mut self, channel: usize) -> InstrumentResult<f64>;
    fn get_current(&mut self, channel: usize) -> InstrumentResult<f64>;

    fn prepare_raw_read(&mut self, _channel: usize) -> InstrumentResult<()> {
        Ok(())
    }

    fn identify(&mut self) -> InstrumentResult<String>;

    /// Fails with [`InstrumentError::ChannelOutOfRange`] for unknown channels.
    fn check_channel(&self, channel: usize) -> InstrumentResult<()> {
        let available = self.channel_count();
        if channel < available {
            Ok(())
        } else {
            Err(InstrumentError::ChannelOutOfRange { channel, available })
        }
    }

    /// Borrow one channel as a stand-alone [`Smu`].
    fn channel(&mut self, channel: usize) -> InstrumentResult<ChannelView<'_, Self>>
    where
        Self: Sized,
    {
        ChannelView::new(self, channel)
    }
}

/// One channel of a [`MultiChannelSmu`], forwarding every call with its index.
pub struct ChannelView<'a, M: MultiChannelSmu + ?Sized> {
    inner: &'a mut M,
    channel: usize,
}

impl<'a, M: MultiChannelSmu + ?Sized> ChannelView<'a, M> {
    pub fn new(inner: &'a mut M, channel: usize) -> InstrumentResult<Self> {
        inner.check_channel(channel)?;
        Ok(Self { inner, channel })
    }

    pub fn index(&self) -> usize {
        self.channel
    }
}

impl<M: MultiChannelSmu + ?Sized> Instrument for ChannelView<'_, M> {
    fn identify(&mut self) -> InstrumentResult<String> {
        Ok(format!("{} (channel {})", self.inner.identify()?, self.channel))
    }
}

impl<M: MultiChannelSmu + ?Sized> Switch for ChannelView<'_, M> {
    fn turn_on(&mut self) -> InstrumentResult<()> {
        self.inner.turn_on(self.channel)
    }

    fn turn_off(&mut self) -> InstrumentResult<()> {
        self.inner.turn_off(self.channel)
    }

    fn is_on(&mut self) -> InstrumentResult<bool> {
        self.inner.is_on(self.channel)
    }
}

impl<M: MultiChannelSmu + ?Sized> IvSource for ChannelView<'_, M> {
    fn set_source(&mut self, source: Source) -> InstrumentResult<()> {
        self.inner.set_source(self.channel, source)
    }

    fn get_source(&mut self) -> InstrumentResult<Source> {
        self.inner.get_source(self.channel)
    }

    fn set_bias(&mut self, value: f64) -> InstrumentResult<()> {
        self.inner.set_bias(self.channel, value)
    }

    fn get_bias(&mut self) -> InstrumentResult<f64> {
        self.inner.get_bias(self.channel)
    }
}

impl<M: MultiChannelSmu + ?Sized> IvMeter for ChannelView<'_, M> {
    fn get_voltage(&mut self) -> InstrumentResult<f64> {
        self.inner.get_voltage(self.channel)
    }

    fn get_current(&mut self) -> InstrumentResult<f64> {
        self.inner.get_current(self.channel)
    }

    fn prepare_raw_read(&mut self) -> InstrumentResult<()> {
        self.inner.prepare_raw_read(self.channel)
    }
}

/// Presents a single-channel [`Smu`] as a one-channel [`MultiChannelSmu`].
pub struct SingleChannel<S> {
    inner: S,
}

impl<S: Smu> SingleChannel<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: Smu> MultiChannelSmu for SingleChannel<S> {
    fn channel_count(&self) -> usize {
        1
    }

    fn turn_on(&mut self, channel: usize) -> InstrumentResult<()> {
        self.check_channel(channel)?;
        self.inner.turn_on()
    }

    fn turn_off(&mut self, channel: usize) -> InstrumentResult<()> {
        self.check_channel(channel)?;
        self.inner.turn_off()
    }

    fn is_on(&mut self, channel: usize) -> InstrumentResult<bool> {
        self.check_channel(channel)?;
        self.inner.is_on()
    }

    fn set_source(&mut self, channel: usize, source: Source) -> InstrumentResult<()> {
        self.check_channel(channel)?;
        self.inner.set_source(source)
    }

    fn get_source(&mut self, channel: usize) -> InstrumentResult<Source> {
        self.check_channel(channel)?;
        self.inner.get_source()
    }

    fn set_bias(&mut self, channel: usize, value: f64) -> InstrumentResult<()> {
        self.check_channel(channel)?;
        self.inner.set_bias(value)
    }

    fn get_bias(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.check_channel(channel)?;
        self.inner.get_bias()
    }

    fn get_voltage(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.check_channel(channel)?;
        self.inner.get_voltage()
    }

    fn get_current(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.check_channel(channel)?;
        self.inner.get_current()
    }

    fn prepare_raw_read(&mut self, channel: usize) -> InstrumentResult<()> {
        self.check_channel(channel)?;
        self.inner.prepare_raw_read()
    }

    fn identify(&mut self) -> InstrumentResult<String> {
        self.inner.identify()
    }
}
