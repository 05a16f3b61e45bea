//! CSV input and output tables.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::pipeline::RunSummary;
use crate::recommend::FlaggedAggregate;
use crate::series::{RentalEvent, StationId, floor_to_hour};

/// Raw ingestion row. Numeric columns are read as floats because upstream
/// exports often write integer ids as `12.0`.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(alias = "uid")]
    station_id: f64,
    #[serde(alias = "dt")]
    timestamp: String,
    rent_count: f64,
}

/// Read the hourly rental table from a CSV file.
pub fn read_events(path: &Path) -> Result<Vec<RentalEvent>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input table {}", path.display()))?;
    let events = read_events_from(file)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!(path = %path.display(), rows = events.len(), "Input table loaded");
    Ok(events)
}

/// Read the hourly rental table from any CSV source with a header row.
pub fn read_events_from<R: Read>(reader: R) -> Result<Vec<RentalEvent>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut events = Vec::new();

    for (index, record) in rdr.deserialize::<RawEvent>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let raw = record.with_context(|| format!("Malformed row at line {line}"))?;
        events.push(parse_event(&raw).with_context(|| format!("Invalid row at line {line}"))?);
    }

    Ok(events)
}

fn parse_event(raw: &RawEvent) -> Result<RentalEvent> {
    if !raw.station_id.is_finite() || raw.station_id.fract() != 0.0 {
        bail!("station id {} is not an integer", raw.station_id);
    }
    if !raw.rent_count.is_finite() || raw.rent_count.fract() != 0.0 || raw.rent_count < 0.0 {
        bail!("rent count {} is not a non-negative integer", raw.rent_count);
    }
    // i64::MAX is not representable; as f64 it rounds up to 2^63.
    if raw.station_id < StationId::MIN as f64 || raw.station_id >= StationId::MAX as f64 {
        bail!("station id {} is out of range", raw.station_id);
    }
    if raw.rent_count > u32::MAX as f64 {
        bail!("rent count {} is out of range", raw.rent_count);
    }

    let timestamp = parse_timestamp(&raw.timestamp)?;
    Ok(RentalEvent::new(
        raw.station_id as StationId,
        floor_to_hour(timestamp),
        raw.rent_count as u32,
    ))
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DD HH:MM:SS` interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    bail!("unrecognised timestamp {value:?}")
}

/// Write the flagged daily table as CSV.
pub fn write_table(path: &Path, table: &[FlaggedAggregate]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_table_to(file, table)?;
    info!(path = %path.display(), rows = table.len(), "Output table written");
    Ok(())
}

pub fn write_table_to<W: Write>(writer: W, table: &[FlaggedAggregate]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in table {
        wtr.serialize(row).context("Failed to serialize output row")?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

/// Write the run summary as pretty-printed JSON.
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
