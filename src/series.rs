//! Hourly rental series, grouped per station.
//!
//! The ingestion collaborator delivers a flat table of `(station_id, timestamp,
//! rent_count)` rows. This module turns it into one validated, time-ordered
//! [`StationSeries`] per station.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable integer identifier of a docking station.
pub type StationId = i64;

/// Sentinel used upstream for bikes not recorded at any existing station.
pub const UNASSIGNED_STATION: StationId = -1;

/// A single hourly observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalEvent {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub rent_count: u32,
}

impl RentalEvent {
    pub fn new(station_id: StationId, timestamp: DateTime<Utc>, rent_count: u32) -> Self {
        Self {
            station_id,
            timestamp,
            rent_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("station {station_id}: series is empty")]
    Empty { station_id: StationId },

    #[error("station {station_id}: event of station {found} does not belong to this series")]
    ForeignEvent {
        station_id: StationId,
        found: StationId,
    },

    #[error("station {station_id}: timestamp {timestamp} is not aligned to a full hour")]
    MisalignedTimestamp {
        station_id: StationId,
        timestamp: DateTime<Utc>,
    },

    #[error("station {station_id}: duplicate observation at {timestamp}")]
    DuplicateTimestamp {
        station_id: StationId,
        timestamp: DateTime<Utc>,
    },
}

/// Time-ordered hourly observations of one station.
///
/// Timestamps are strictly increasing and aligned to full hours. Missing hours
/// are allowed; they are kept as gaps and never filled in here.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSeries {
    station_id: StationId,
    events: Vec<RentalEvent>,
}

impl StationSeries {
    /// Build a series from events in any order.
    pub fn new(station_id: StationId, mut events: Vec<RentalEvent>) -> Result<Self, SeriesError> {
        if events.is_empty() {
            return Err(SeriesError::Empty { station_id });
        }

        events.sort_by_key(|e| e.timestamp);

        let mut previous: Option<DateTime<Utc>> = None;
        for event in &events {
            if event.station_id != station_id {
                return Err(SeriesError::ForeignEvent {
                    station_id,
                    found: event.station_id,
                });
            }
            if !is_hour_aligned(event.timestamp) {
                return Err(SeriesError::MisalignedTimestamp {
                    station_id,
                    timestamp: event.timestamp,
                });
            }
            if previous == Some(event.timestamp) {
                return Err(SeriesError::DuplicateTimestamp {
                    station_id,
                    timestamp: event.timestamp,
                });
            }
            previous = Some(event.timestamp);
        }

        Ok(Self { station_id, events })
    }

    pub fn station_id(&self) -> StationId {
        self.station_id
    }

    pub fn events(&self) -> &[RentalEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// First observed hour.
    pub fn start(&self) -> DateTime<Utc> {
        self.events[0].timestamp
    }

    /// Last observed hour.
    pub fn end(&self) -> DateTime<Utc> {
        self.events[self.events.len() - 1].timestamp
    }

    /// Number of hourly slots between the first and last observation, inclusive.
    pub fn span_hours(&self) -> usize {
        ((self.end() - self.start()).num_hours() + 1) as usize
    }

    /// Number of hourly slots inside the span that have no observation.
    pub fn missing_hours(&self) -> usize {
        self.span_hours() - self.events.len()
    }
}

/// Result of splitting the ingestion table into per-station series.
#[derive(Debug, Default)]
pub struct StationPartition {
    /// Valid series ordered by station id.
    pub series: Vec<StationSeries>,
    /// Stations whose rows violate the series invariants.
    pub rejected: Vec<SeriesError>,
    /// Rows dropped because they carry the unassigned-station sentinel.
    pub sentinel_rows: usize,
}

/// Group rows by station, dropping sentinel rows and rejecting malformed series.
pub fn partition_stations(events: impl IntoIterator<Item = RentalEvent>) -> StationPartition {
    let mut grouped: BTreeMap<StationId, Vec<RentalEvent>> = BTreeMap::new();
    let mut sentinel_rows = 0;

    for event in events {
        if event.station_id == UNASSIGNED_STATION {
            sentinel_rows += 1;
            continue;
        }
        grouped.entry(event.station_id).or_default().push(event);
    }

    let mut partition = StationPartition {
        sentinel_rows,
        ..Default::default()
    };

    for (station_id, events) in grouped {
        match StationSeries::new(station_id, events) {
            Ok(series) => partition.series.push(series),
            Err(e) => {
                tracing::warn!(station_id, error = %e, "Rejecting station series");
                partition.rejected.push(e);
            }
        }
    }

    partition
}

/// Truncate a timestamp to the start of its hour.
pub fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn is_hour_aligned(dt: DateTime<Utc>) -> bool {
    dt.minute() == 0 && dt.second() == 0 && dt.nanosecond() == 0
}

/// Number of whole hours from `from` to `to`.
pub(crate) fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_hours()
}

pub(crate) fn hour_offset(origin: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    origin + Duration::hours(hours)
}
