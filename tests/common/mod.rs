//! Deterministic fixture shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use station_resupply::{AppConfig, DateRange, RentalEvent, StationId};

/// Stations with data over the whole period.
pub const FULL_STATIONS: [StationId; 3] = [1, 2, 3];
/// Data starts late: well-formed rows exist only in the scoring range.
pub const LATE_STATION: StationId = 5;
/// Fewer than seven days of data: every row is cold start.
pub const COLD_STATION: StationId = 6;
pub const SENTINEL_ROWS: usize = 12;

pub fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, month, day, hour, 0, 0).unwrap()
}

pub fn data_start() -> DateTime<Utc> {
    at(8, 1, 0)
}

/// Exclusive end of the data.
pub fn data_end() -> DateTime<Utc> {
    at(9, 12, 0)
}

pub fn train_range() -> DateRange {
    DateRange::new(data_start(), at(8, 29, 0))
}

pub fn test_range() -> DateRange {
    DateRange::new(at(8, 29, 0), data_end())
}

/// Daytime peak, weekday shift and a little pseudo-random jitter.
pub fn hourly_count(station_id: StationId, timestamp: DateTime<Utc>) -> u32 {
    let hour = timestamp.hour() as u64;
    let weekday = timestamp.weekday().num_days_from_monday() as u64;
    let station = station_id as u64;
    let index = (timestamp - data_start()).num_hours() as u64;

    let pattern = (hour * 7 + weekday * 3 + station * 5) % 11;
    let peak = if (7..=19).contains(&hour) { 4 } else { 0 };
    let jitter = (index.wrapping_mul(2_654_435_761).wrapping_add(station * 97) >> 7) % 4;

    (pattern + peak + jitter) as u32
}

/// Hourly events of one station over `[start, end)`.
pub fn station_events(
    station_id: StationId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<RentalEvent> {
    let hours = (end - start).num_hours();
    (0..hours)
        .map(|h| {
            let timestamp = start + Duration::hours(h);
            RentalEvent::new(station_id, timestamp, hourly_count(station_id, timestamp))
        })
        .collect()
}

pub fn fixture_events() -> Vec<RentalEvent> {
    let mut events = Vec::new();
    for station_id in FULL_STATIONS {
        events.extend(station_events(station_id, data_start(), data_end()));
    }
    events.extend(station_events(LATE_STATION, at(8, 26, 0), data_end()));
    events.extend(station_events(COLD_STATION, at(9, 8, 0), data_end()));
    for h in 0..SENTINEL_ROWS {
        events.push(RentalEvent::new(-1, data_start() + Duration::hours(h as i64), 9));
    }
    // Reverse so nothing depends on input order.
    events.reverse();
    events
}

pub fn fixture_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.split.train_range = Some(train_range());
    config.split.test_range = Some(test_range());
    config.runtime.worker_threads = 2;
    config
}
