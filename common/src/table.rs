use std::{
    fmt, fs,
    io::Read,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv")]
    Csv(#[from] csv::Error),
    #[error("missing row {0}")]
    MissingRow(Row),
    #[error("no thread counts in the {0} row")]
    Empty(Row),
    #[error("row {row} has {found} values, expected {expected}")]
    LengthMismatch {
        row: Row,
        found: usize,
        expected: usize,
    },
    #[error("invalid thread count {value:?} in column {column}")]
    InvalidThreadCount { column: usize, value: String },
    #[error("invalid value {value:?} in row {row}, column {column}")]
    InvalidValue {
        row: Row,
        column: usize,
        value: String,
    },
}

/// Rows of the benchmark file, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Row {
    ThreadCount,
    ContainerAvg,
    ContainerStd,
    LocalCounterAvg,
    LocalCounterStd,
}

impl Row {
    pub const ALL: [Row; 5] = [
        Row::ThreadCount,
        Row::ContainerAvg,
        Row::ContainerStd,
        Row::LocalCounterAvg,
        Row::LocalCounterStd,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Row::ThreadCount => "ThreadCount",
            Row::ContainerAvg => "ContainerAvg",
            Row::ContainerStd => "ContainerStd",
            Row::LocalCounterAvg => "LocalCounterAvg",
            Row::LocalCounterStd => "LocalCounterStd",
        }
    }

    pub fn position(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Borrowed view of one measured row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Series<'a> {
    pub row: Row,
    pub values: &'a [f64],
}

impl Series<'_> {
    pub fn label(&self) -> &'static str {
        self.row.label()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchTable {
    pub thread_counts: Vec<u32>,
    pub container_avg: Vec<f64>,
    pub container_std: Vec<f64>,
    pub local_avg: Vec<f64>,
    pub local_std: Vec<f64>,
}

impl BenchTable {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let file = fs::File::open(path).map_err(|source| TableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn parse_str(data: &str) -> Result<Self, TableError> {
        Self::from_reader(data.as_bytes())
    }

    /// Parses the five leading rows by position. Anything after them is ignored.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut records = Vec::with_capacity(Row::ALL.len());
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            records.push(record);
            if records.len() == Row::ALL.len() {
                break;
            }
        }
        if let Some(missing) = Row::ALL.get(records.len()) {
            return Err(TableError::MissingRow(*missing));
        }

        for (row, record) in Row::ALL.iter().zip(&records) {
            let label = record.get(0).unwrap_or_default();
            if label != row.label() {
                warn!(
                    "Row {} is labelled {label:?}, expected {:?}",
                    row.position(),
                    row.label()
                );
            }
        }

        let thread_counts = values(&records[0])
            .into_iter()
            .enumerate()
            .map(|(column, raw)| parse_thread_count(column, raw))
            .collect::<Result<Vec<_>, _>>()?;
        if thread_counts.is_empty() {
            return Err(TableError::Empty(Row::ThreadCount));
        }

        let measured = |row: Row| -> Result<Vec<f64>, TableError> {
            let parsed = values(&records[row.position()])
                .into_iter()
                .enumerate()
                .map(|(column, raw)| parse_value(row, column, raw))
                .collect::<Result<Vec<_>, _>>()?;
            if parsed.len() != thread_counts.len() {
                return Err(TableError::LengthMismatch {
                    row,
                    found: parsed.len(),
                    expected: thread_counts.len(),
                });
            }
            Ok(parsed)
        };

        let container_avg = measured(Row::ContainerAvg)?;
        let container_std = measured(Row::ContainerStd)?;
        let local_avg = measured(Row::LocalCounterAvg)?;
        let local_std = measured(Row::LocalCounterStd)?;
        Ok(Self {
            thread_counts,
            container_avg,
            container_std,
            local_avg,
            local_std,
        })
    }

    pub fn len(&self) -> usize {
        self.thread_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thread_counts.is_empty()
    }

    pub fn series(&self, row: Row) -> Option<Series<'_>> {
        let values = match row {
            Row::ThreadCount => return None,
            Row::ContainerAvg => &self.container_avg,
            Row::ContainerStd => &self.container_std,
            Row::LocalCounterAvg => &self.local_avg,
            Row::LocalCounterStd => &self.local_std,
        };
        Some(Series { row, values })
    }

    pub fn averages(&self) -> [Series<'_>; 2] {
        [
            Series {
                row: Row::ContainerAvg,
                values: &self.container_avg,
            },
            Series {
                row: Row::LocalCounterAvg,
                values: &self.local_avg,
            },
        ]
    }

    pub fn spreads(&self) -> [Series<'_>; 2] {
        [
            Series {
                row: Row::ContainerStd,
                values: &self.container_std,
            },
            Series {
                row: Row::LocalCounterStd,
                values: &self.local_std,
            },
        ]
    }

    /// Speedup of each average row relative to its first column.
    /// Points with a non-positive average are `NaN`.
    pub fn speedups(&self) -> [(Row, Vec<f64>); 2] {
        self.averages().map(|series| (series.row, speedup(series.values)))
    }

    pub fn x_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.thread_counts.iter().map(|t| f64::from(*t))
    }
}

fn speedup(values: &[f64]) -> Vec<f64> {
    let Some(&base) = values.first() else {
        return Vec::new();
    };
    values
        .iter()
        .map(|v| {
            if base > 0.0 && *v > 0.0 {
                base / v
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Cells after the label, without trailing empty cells.
fn values(record: &StringRecord) -> Vec<&str> {
    let mut cells = record.iter().skip(1).collect::<Vec<_>>();
    while cells.last().is_some_and(|cell| cell.is_empty()) {
        cells.pop();
    }
    cells
}

fn parse_thread_count(column: usize, raw: &str) -> Result<u32, TableError> {
    let invalid = || TableError::InvalidThreadCount {
        column: column + 1,
        value: raw.to_owned(),
    };
    if let Ok(count) = raw.parse::<u32>() {
        return Ok(count);
    }
    let value = raw.parse::<f64>().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return Err(invalid());
    }
    Ok(value as u32)
}

fn parse_value(row: Row, column: usize, raw: &str) -> Result<f64, TableError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TableError::InvalidValue {
            row,
            column: column + 1,
            value: raw.to_owned(),
        })
}
