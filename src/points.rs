use std::collections::BTreeMap;
use std::fmt;

/// Voltage and current captured together at one sweep step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IvPoint {
    pub voltage: f64,
    pub current: f64,
}

impl IvPoint {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    /// Resistance V/I. Infinite at zero current with a non-zero voltage, NaN when
    /// both are zero.
    pub fn resistance(&self) -> f64 {
        self.voltage / self.current
    }

    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

impl fmt::Display for IvPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:e} V, {:e} A)", self.voltage, self.current)
    }
}

/// One [`IvPoint`] per measured channel, ordered by channel index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McIvPoint {
    channels: BTreeMap<usize, IvPoint>,
}

impl McIvPoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: usize, point: IvPoint) {
        self.channels.insert(channel, point);
    }

    pub fn get(&self, channel: usize) -> Option<&IvPoint> {
        self.channels.get(&channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &IvPoint)> {
        self.channels.iter().map(|(ch, p)| (*ch, p))
    }
}

impl FromIterator<(usize, IvPoint)> for McIvPoint {
    fn from_iter<T: IntoIterator<Item = (usize, IvPoint)>>(iter: T) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

/// A measurement that can be laid out as one flat table row.
pub trait TabularPoint {
    /// Column names, in the same order as [`TabularPoint::row`].
    fn columns(&self) -> Vec<String>;
    fn row(&self) -> Vec<f64>;
}

impl TabularPoint for IvPoint {
    fn columns(&self) -> Vec<String> {
        vec!["V".to_string(), "I".to_string()]
    }

    fn row(&self) -> Vec<f64> {
        vec![self.voltage, self.current]
    }
}

impl TabularPoint for McIvPoint {
    fn columns(&self) -> Vec<String> {
        self.channels()
            .flat_map(|ch| [format!("V{ch}"), format!("I{ch}")])
            .collect()
    }

    fn row(&self) -> Vec<f64> {
        self.channels
            .values()
            .flat_map(|p| [p.voltage, p.current])
            .collect()
    }
}
