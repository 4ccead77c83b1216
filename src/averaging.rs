//! Per-channel averaging in front of any [`MultiChannelSmu`].

use crate::filter::{Filter, FilterMode, SampleSource};
use crate::instrument::{InstrumentResult, MultiChannelSmu, Quantity, Source};

/// Filter state owned by one channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelRecord {
    pub voltage: Filter,
    pub current: Filter,
}

impl ChannelRecord {
    fn filter_mut(&mut self, quantity: Quantity) -> &mut Filter {
        match quantity {
            Quantity::Voltage => &mut self.voltage,
            Quantity::Current => &mut self.current,
        }
    }
}

/// Raw reads of one quantity on one channel.
struct RawRead<'a, M: ?Sized> {
    inner: &'a mut M,
    channel: usize,
    quantity: Quantity,
}

impl<M: MultiChannelSmu + ?Sized> SampleSource for RawRead<'_, M> {
    fn read_raw(&mut self) -> InstrumentResult<f64> {
        match self.quantity {
            Quantity::Voltage => self.inner.get_voltage(self.channel),
            Quantity::Current => self.inner.get_current(self.channel),
        }
    }

    fn prepare(&mut self, _mode: FilterMode) -> InstrumentResult<()> {
        self.inner.prepare_raw_read(self.channel)
    }
}

/// Wraps an instrument so that voltage and current reads go through the
/// channel's [`Filter`]s. Everything else is passed through.
pub struct Averaged<M> {
    inner: M,
    records: Vec<ChannelRecord>,
}

impl<M: MultiChannelSmu> Averaged<M> {
    /// All channels start in bypass mode.
    pub fn new(inner: M) -> Self {
        let records = vec![ChannelRecord::default(); inner.channel_count()];
        Self { inner, records }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn record(&self, channel: usize) -> InstrumentResult<&ChannelRecord> {
        self.inner.check_channel(channel)?;
        Ok(&self.records[channel])
    }

    /// Select the averaging policy on `channel` and prepare the instrument for it.
    pub fn set_averaging(
        &mut self,
        channel: usize,
        mode: FilterMode,
        count: usize,
    ) -> InstrumentResult<()> {
        self.inner.check_channel(channel)?;
        log::debug!("Channel {}: averaging {} x{}", channel, mode, count);

        for quantity in [Quantity::Voltage, Quantity::Current] {
            let filter = self.records[channel].filter_mut(quantity);
            filter.set_mode(mode);
            filter.set_count(count);
            filter.set_up(&mut RawRead {
                inner: &mut self.inner,
                channel,
                quantity,
            })?;
        }
        Ok(())
    }

    /// Set the same policy on every channel.
    pub fn set_averaging_all(&mut self, mode: FilterMode, count: usize) -> InstrumentResult<()> {
        for channel in 0..self.records.len() {
            self.set_averaging(channel, mode, count)?;
        }
        Ok(())
    }

    pub fn set_averaging_count(&mut self, channel: usize, count: usize) -> InstrumentResult<()> {
        self.inner.check_channel(channel)?;
        let record = &mut self.records[channel];
        record.voltage.set_count(count);
        record.current.set_count(count);
        Ok(())
    }

    /// Forget buffered samples of moving filters on `channel`.
    pub fn reset_averaging(&mut self, channel: usize) -> InstrumentResult<()> {
        self.inner.check_channel(channel)?;
        let record = &mut self.records[channel];
        record.voltage.clear();
        record.current.clear();
        Ok(())
    }

    fn filtered(&mut self, channel: usize, quantity: Quantity) -> InstrumentResult<f64> {
        self.inner.check_channel(channel)?;
        self.records[channel]
            .filter_mut(quantity)
            .get_value(&mut RawRead {
                inner: &mut self.inner,
                channel,
                quantity,
            })
    }
}

impl<M: MultiChannelSmu> MultiChannelSmu for Averaged<M> {
    fn channel_count(&self) -> usize {
        self.records.len()
    }

    fn turn_on(&mut self, channel: usize) -> InstrumentResult<()> {
        self.inner.turn_on(channel)
    }

    fn turn_off(&mut self, channel: usize) -> InstrumentResult<()> {
        self.inner.turn_off(channel)
    }

    fn is_on(&mut self, channel: usize) -> InstrumentResult<bool> {
        self.inner.is_on(channel)
    }

    fn set_source(&mut self, channel: usize, source: Source) -> InstrumentResult<()> {
        self.inner.set_source(channel, source)
    }

    fn get_source(&mut self, channel: usize) -> InstrumentResult<Source> {
        self.inner.get_source(channel)
    }

    fn set_bias(&mut self, channel: usize, value: f64) -> InstrumentResult<()> {
        self.inner.set_bias(channel, value)
    }

    fn get_bias(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.inner.get_bias(channel)
    }

    fn get_voltage(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.filtered(channel, Quantity::Voltage)
    }

    fn get_current(&mut self, channel: usize) -> InstrumentResult<f64> {
        self.filtered(channel, Quantity::Current)
    }

    fn prepare_raw_read(&mut self, channel: usize) -> InstrumentResult<()> {
        self.inner.prepare_raw_read(channel)
    }

    fn identify(&mut self) -> InstrumentResult<String> {
        self.inner.identify()
    }
}
