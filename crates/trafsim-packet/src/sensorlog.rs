//! Persistent sensor-log serialization.
//!
//! The sensor log is a UTF-8, LF-terminated CSV file. The producer side
//! (leaf sensors) appends one row per measurement; the consumer side (the
//! traffic control plane) re-reads the whole file from the beginning each
//! sampling cycle and rebuilds its state from scratch.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

use crate::Measurement;

/// Header line written at the top of every sensor log.
pub const SENSOR_LOG_HEADER: &str = "Time,NodeID,VehicleCount,Emergency";

// ============================================================================
// Writer
// ============================================================================

/// Append-only producer handle for the sensor log.
///
/// Created once per simulation run; the header is written at creation time.
/// Rows are written unbuffered so the consumer's independent read handle
/// observes every completed line.
pub struct SensorLogWriter {
    out: File,
    rows_written: u64,
}

impl SensorLogWriter {
    /// Create (truncating) the log file and write the header line.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut out = File::create(path)?;
        writeln!(out, "{}", SENSOR_LOG_HEADER)?;
        Ok(SensorLogWriter {
            out,
            rows_written: 0,
        })
    }

    /// Append one measurement row.
    pub fn append(&mut self, m: &Measurement) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{},{},{}",
            m.timestamp_secs(),
            m.source,
            m.vehicle_count,
            m.emergency as u8
        )?;
        self.rows_written += 1;
        Ok(())
    }

    /// Number of rows appended so far (excluding the header).
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

// ============================================================================
// Records
// ============================================================================

/// One parsed row of the sensor log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    /// Sample time in seconds.
    pub time_s: f64,
    /// Producing node id.
    pub node_id: u32,
    /// Vehicles detected.
    pub vehicle_count: u32,
    /// Emergency flag; false when the column is absent.
    pub emergency: bool,
}

/// Parse one CSV row into a [`LogRecord`].
///
/// Returns `None` on any malformed field (non-numeric or missing within the
/// first three columns). A missing fourth column defaults the emergency flag
/// to false; a present but non-numeric fourth column is malformed.
pub fn parse_record(line: &str) -> Option<LogRecord> {
    let mut fields = line.split(',');
    let time_s: f64 = fields.next()?.trim().parse().ok()?;
    let node_id: u32 = fields.next()?.trim().parse().ok()?;
    let vehicle_count: u32 = fields.next()?.trim().parse().ok()?;
    let emergency = match fields.next() {
        Some(token) => token.trim().parse::<i64>().ok()? != 0,
        None => false,
    };
    Some(LogRecord {
        time_s,
        node_id,
        vehicle_count,
        emergency,
    })
}

// ============================================================================
// Reader
// ============================================================================

/// Consumer handle for the sensor log.
///
/// Opened once; every [`read_all`](SensorLogReader::read_all) call seeks back
/// to the start and re-parses the full file, discarding the header line.
/// Malformed rows are skipped individually without aborting the pass.
pub struct SensorLogReader {
    file: File,
}

impl SensorLogReader {
    /// Open an existing sensor log for repeated re-reads.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(SensorLogReader {
            file: File::open(path)?,
        })
    }

    /// Re-read the whole log from the beginning.
    pub fn read_all(&mut self) -> io::Result<Vec<LogRecord>> {
        self.file.seek(SeekFrom::Start(0))?;
        let reader = BufReader::new(&mut self.file);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if index == 0 || line.trim().is_empty() {
                continue;
            }
            match parse_record(&line) {
                Some(record) => records.push(record),
                None => warn!("skipping malformed sensor log row {}: {:?}", index + 1, line),
            }
        }
        Ok(records)
    }
}

// ============================================================================
// Tests
// ============================================================================
