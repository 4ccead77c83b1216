//! Tabular storage of sweep results.

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use polars::prelude::*;

use crate::points::TabularPoint;
use crate::progress::CallbackError;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Row has {found} values, table has {expected} columns")]
    WidthMismatch { expected: usize, found: usize },

    #[error("Table has no columns")]
    NoColumns,

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for flat result rows.
pub trait ResultSink {
    fn columns(&self) -> &[String];

    /// Name the columns. Only allowed while the sink is still empty.
    fn set_columns(&mut self, names: Vec<String>) -> Result<(), SinkError>;

    fn add_row(&mut self, row: &[f64]) -> Result<(), SinkError>;
}

/// Column-major in-memory table, exported through polars.
#[derive(Debug, Clone, Default)]
pub struct IvTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl IvTable {
    pub fn new(names: Vec<String>) -> Self {
        let columns = vec![Vec::new(); names.len()];
        Self { names, columns }
    }

    /// `V{ch}`/`I{ch}` column pairs for the given channels.
    pub fn for_channels(channels: &[usize]) -> Self {
        Self::new(
            channels
                .iter()
                .flat_map(|ch| [format!("V{ch}"), format!("I{ch}")])
                .collect(),
        )
    }

    pub fn from_points<P: TabularPoint>(points: &[P]) -> Result<Self, SinkError> {
        let mut table = points
            .first()
            .map_or_else(Self::default, |p| Self::new(p.columns()));
        for point in points {
            table.add_row(&point.row())?;
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn to_data_frame(&self) -> Result<DataFrame, SinkError> {
        let columns: Vec<Column> = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, values)| Series::new(name.as_str().into(), values.as_slice()).into())
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), SinkError> {
        let mut df = self.to_data_frame()?;
        let mut file = File::create(path.as_ref())?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        log::debug!("Wrote {} rows to {}", self.len(), path.as_ref().display());
        Ok(())
    }
}

impl ResultSink for IvTable {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn set_columns(&mut self, names: Vec<String>) -> Result<(), SinkError> {
        if !self.is_empty() {
            return Err(SinkError::WidthMismatch {
                expected: self.names.len(),
                found: names.len(),
            });
        }
        self.columns = vec![Vec::new(); names.len()];
        self.names = names;
        Ok(())
    }

    fn add_row(&mut self, row: &[f64]) -> Result<(), SinkError> {
        if self.names.is_empty() {
            return Err(SinkError::NoColumns);
        }
        if row.len() != self.names.len() {
            return Err(SinkError::WidthMismatch {
                expected: self.names.len(),
                found: row.len(),
            });
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(*value);
        }
        Ok(())
    }
}

/// Progress callback that appends every point to `sink` as one row, naming
/// the columns after the first point if the sink has none yet.
pub fn sink_callback<P, S>(
    sink: Arc<Mutex<S>>,
) -> impl FnMut(usize, &P) -> Result<(), CallbackError> + Send + 'static
where
    P: TabularPoint,
    S: ResultSink + Send + 'static,
{
    move |_, point: &P| -> Result<(), CallbackError> {
        let mut sink = sink.lock().map_err(|_| "result sink lock poisoned")?;
        if sink.columns().is_empty() {
            sink.set_columns(point.columns())?;
        }
        sink.add_row(&point.row())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{IvPoint, McIvPoint};
    use crate::sim::SimulatedSmu;
    use crate::sweep::SweepRun;
    use crate::sweep_config::SweepStepConfig;

    #[test]
    fn test_rows_and_frame() {
        let mut table = IvTable::for_channels(&[0, 1]);
        table.add_row(&[1.0, 0.1, 2.0, 0.2]).unwrap();
        table.add_row(&[1.5, 0.15, 2.5, 0.25]).unwrap();
        assert!(matches!(
            table.add_row(&[1.0]),
            Err(SinkError::WidthMismatch { expected: 4, found: 1 })
        ));

        let df = table.to_data_frame().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 4);
        assert_eq!(table.column("I1"), Some(&[0.2, 0.25][..]));
    }

    #[test]
    fn test_from_points() {
        let points = vec![IvPoint::new(0.0, 0.0), IvPoint::new(1.0, 0.5)];
        let table = IvTable::from_points(&points).unwrap();
        assert_eq!(table.columns(), &["V".to_string(), "I".to_string()]);
        assert_eq!(table.column("I"), Some(&[0.0, 0.5][..]));
    }

    #[test]
    fn test_sink_callback_collects_sweep() {
        let table = Arc::new(Mutex::new(IvTable::default()));
        let mut smu = SimulatedSmu::new(2, |v| 2.0 * v);
        let mut run = SweepRun::combo(vec![
            SweepStepConfig::voltage(0, vec![0.0, 1.0]),
            SweepStepConfig::voltage(1, vec![2.0, 3.0]),
        ]);
        run.run_multi(&mut smu, sink_callback::<McIvPoint, _>(Arc::clone(&table)))
            .unwrap();

        let table = table.lock().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("V1"), Some(&[2.0, 3.0][..]));
        assert_eq!(table.column("I0"), Some(&[0.0, 2.0][..]));
    }

    #[test]
    fn test_csv_export() {
        let mut table = IvTable::for_channels(&[0]);
        table.add_row(&[0.5, 1e-3]).unwrap();
        let path = std::env::temp_dir().join(format!("ivsweep-test-{}.csv", std::process::id()));
        table.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.starts_with("V0,I0"));
        assert_eq!(text.lines().count(), 2);
    }
}
