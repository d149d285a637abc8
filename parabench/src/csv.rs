//! Stability-mode CSV: `Time,Throughput,LatencyP99,HeapUsed,GCTime,Mode`.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{Reporter, error::HarnessError, metric::StabilitySnapshot};

pub const CSV_HEADER: &str = "Time,Throughput,LatencyP99,HeapUsed,GCTime,Mode";

/// Appends snapshots to a CSV file, tagging each row with the mode label.
///
/// The header is written only when the file is new or empty, so repeated
/// runs with different labels accumulate in one file.
#[derive(Debug)]
pub struct CsvReporter<W: Write = BufWriter<File>> {
    path: PathBuf,
    writer: W,
    mode: String,
}

impl CsvReporter {
    pub fn open(path: impl AsRef<Path>, mode: impl Into<String>) -> Result<Self, HarnessError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| HarnessError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let is_empty = file.metadata().map_err(io_err)?.len() == 0;

        let mut writer = BufWriter::new(file);
        if is_empty {
            writeln!(writer, "{CSV_HEADER}")
                .and_then(|()| writer.flush())
                .map_err(io_err)?;
        }
        Ok(Self {
            path,
            writer,
            mode: mode.into(),
        })
    }
}

impl<W: Write> CsvReporter<W> {
    /// Wraps an already prepared writer; no header is written. `path` only
    /// names the destination in errors.
    pub fn from_writer(path: impl Into<PathBuf>, writer: W, mode: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            writer,
            mode: mode.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<W: Write + Send> Reporter<StabilitySnapshot> for CsvReporter<W> {
    async fn report(&mut self, row: &StabilitySnapshot) -> Result<(), HarnessError> {
        writeln!(self.writer, "{}", format_row(row, &self.mode))
            .and_then(|()| self.writer.flush())
            .map_err(|source| HarnessError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

pub fn format_row(s: &StabilitySnapshot, mode: &str) -> String {
    format!(
        "{},{},{:.2},{:.2},{},{}",
        s.elapsed_seconds,
        s.requests_in_interval,
        s.p99_latency_ms,
        s.heap_used_mb,
        s.gc_time_ms,
        mode
    )
}

/// A parsed CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    pub snapshot: StabilitySnapshot,
    pub mode: String,
}

/// Reads every data row of a stability CSV, in file order.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<CsvRecord>, HarnessError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    let mut header_seen = false;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if !header_seen {
            header_seen = true;
            let columns: Vec<&str> = line.split(',').map(str::trim).collect();
            if columns.join(",") != CSV_HEADER {
                return Err(HarnessError::Csv {
                    line: line_no,
                    reason: format!("unexpected header {line:?}"),
                });
            }
            continue;
        }
        records.push(parse_row(line, line_no)?);
    }
    Ok(records)
}

fn parse_row(line: &str, line_no: usize) -> Result<CsvRecord, HarnessError> {
    let fields: Vec<&str> = line.splitn(6, ',').collect();
    let [time, throughput, latency, heap, gc, mode] = fields.as_slice() else {
        return Err(HarnessError::Csv {
            line: line_no,
            reason: format!("expected 6 fields, found {}", fields.len()),
        });
    };

    fn field<T: std::str::FromStr>(raw: &str, name: &str, line: usize) -> Result<T, HarnessError>
    where
        T::Err: std::fmt::Display,
    {
        raw.trim().parse::<T>().map_err(|e| HarnessError::Csv {
            line,
            reason: format!("{name} {raw:?}: {e}"),
        })
    }

    Ok(CsvRecord {
        snapshot: StabilitySnapshot {
            elapsed_seconds: field(time, "Time", line_no)?,
            requests_in_interval: field(throughput, "Throughput", line_no)?,
            p99_latency_ms: field(latency, "LatencyP99", line_no)?,
            heap_used_mb: field(heap, "HeapUsed", line_no)?,
            gc_time_ms: field(gc, "GCTime", line_no)?,
        },
        mode: mode.to_string(),
    })
}
