//! Feature extraction for the per-station models
//!
//! Converts a station's hourly series into feature rows: calendar attributes of
//! the row's own hour plus lagged rolling sums of `rent_count`. Rows whose lag
//! windows are not fully observed are tagged as undefined and never reach
//! training or scoring.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureConfig;
use crate::pipeline::DateRange;
use crate::series::{StationId, StationSeries, hour_offset, hours_between};

/// A rolling window `[t - start_hours, t - end_hours)` relative to a row at `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagWindow {
    pub start_hours: u32,
    pub end_hours: u32,
}

impl LagWindow {
    pub const fn new(start_hours: u32, end_hours: u32) -> Self {
        Self {
            start_hours,
            end_hours,
        }
    }

    /// Number of hourly observations the window covers.
    pub fn width(&self) -> u32 {
        self.start_hours.saturating_sub(self.end_hours)
    }

    /// Half-open time bounds of the window for a row at `t`.
    pub fn bounds(&self, t: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            hour_offset(t, -(self.start_hours as i64)),
            hour_offset(t, -(self.end_hours as i64)),
        )
    }
}

/// Calendar position of a row. Pure function of the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    /// ISO week number, 1..=53
    pub week_of_year: u32,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    /// 0..=23
    pub hour_of_day: u32,
}

impl CalendarFeatures {
    pub const NUM_FEATURES: usize = 3;

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            week_of_year: ts.iso_week().week(),
            day_of_week: ts.weekday().num_days_from_monday(),
            hour_of_day: ts.hour(),
        }
    }

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.week_of_year as f64,
            self.day_of_week as f64,
            self.hour_of_day as f64,
        ]
    }

    pub fn feature_names() -> [&'static str; Self::NUM_FEATURES] {
        ["week_of_year", "day_of_week", "hour_of_day"]
    }
}

/// Rolling sums of `rent_count` over the three configured lag windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagFeatures {
    pub w1: u64,
    pub w2: u64,
    pub w3: u64,
}

impl LagFeatures {
    pub const NUM_FEATURES: usize = 3;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [self.w1 as f64, self.w2 as f64, self.w3 as f64]
    }

    pub fn feature_names() -> [&'static str; Self::NUM_FEATURES] {
        ["w1", "w2", "w3"]
    }
}

/// A well-formed row: every lag window was fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub calendar: CalendarFeatures,
    pub lags: LagFeatures,
    /// Observed `rent_count` at `timestamp`.
    pub target: u32,
}

/// Why a row could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedReason {
    /// A lag window reaches before the first observation of the series.
    InsufficientHistory,
    /// A lag window contains hours with no observation.
    MissingObservations { hours: u32 },
}

/// Output of the extractor for one observed hour.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedRow {
    WellFormed(FeatureRow),
    Undefined {
        station_id: StationId,
        timestamp: DateTime<Utc>,
        reason: UndefinedReason,
    },
}

impl ExtractedRow {
    pub fn is_well_formed(&self) -> bool {
        matches!(self, ExtractedRow::WellFormed(_))
    }

    pub fn into_well_formed(self) -> Option<FeatureRow> {
        match self {
            ExtractedRow::WellFormed(row) => Some(row),
            ExtractedRow::Undefined { .. } => None,
        }
    }
}

/// Well-formed rows of one station plus counts of what was dropped.
#[derive(Debug, Clone, Default)]
pub struct StationFeatures {
    pub station_id: StationId,
    /// Rows in timestamp order.
    pub rows: Vec<FeatureRow>,
    pub insufficient_history: usize,
    pub missing_observations: usize,
}

impl StationFeatures {
    /// Contiguous slice of rows whose timestamp falls inside `range`.
    pub fn rows_in(&self, range: &DateRange) -> &[FeatureRow] {
        let lo = self.rows.partition_point(|r| r.timestamp < range.start);
        let hi = self.rows.partition_point(|r| r.timestamp < range.end);
        &self.rows[lo..hi.max(lo)]
    }

    pub fn undefined(&self) -> usize {
        self.insufficient_history + self.missing_observations
    }
}

/// Builds feature rows from station series.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Lazily extract one row per observed hour of the series.
    pub fn extract<'a>(
        &'a self,
        series: &'a StationSeries,
    ) -> impl Iterator<Item = ExtractedRow> + 'a {
        let index = HourlyIndex::build(series);
        let origin = series.start();
        let station_id = series.station_id();

        series.events().iter().map(move |event| {
            let slot = hours_between(origin, event.timestamp);

            match self.lags_at(&index, slot) {
                Ok(lags) => ExtractedRow::WellFormed(FeatureRow {
                    station_id,
                    timestamp: event.timestamp,
                    calendar: CalendarFeatures::from_timestamp(event.timestamp),
                    lags,
                    target: event.rent_count,
                }),
                Err(reason) => ExtractedRow::Undefined {
                    station_id,
                    timestamp: event.timestamp,
                    reason,
                },
            }
        })
    }

    /// Collect the well-formed rows of a station and count the rest.
    pub fn extract_station(&self, series: &StationSeries) -> StationFeatures {
        let missing_hours = series.missing_hours();
        if missing_hours > 0 {
            debug!(
                station_id = series.station_id(),
                missing_hours,
                "Station series has gaps"
            );
        }

        let mut features = StationFeatures {
            station_id: series.station_id(),
            rows: Vec::with_capacity(series.len()),
            ..Default::default()
        };

        for extracted in self.extract(series) {
            match extracted {
                ExtractedRow::WellFormed(row) => features.rows.push(row),
                ExtractedRow::Undefined {
                    reason: UndefinedReason::InsufficientHistory,
                    ..
                } => features.insufficient_history += 1,
                ExtractedRow::Undefined {
                    reason: UndefinedReason::MissingObservations { .. },
                    ..
                } => features.missing_observations += 1,
            }
        }

        features
    }

    fn lags_at(&self, index: &HourlyIndex, slot: i64) -> Result<LagFeatures, UndefinedReason> {
        let w1 = self.window_sum(index, slot, self.config.w1);
        let w2 = self.window_sum(index, slot, self.config.w2);
        let w3 = self.window_sum(index, slot, self.config.w3);

        // Cold start wins over gaps so the reason is stable for the first week.
        for result in [&w1, &w2, &w3] {
            if let Err(UndefinedReason::InsufficientHistory) = result {
                return Err(UndefinedReason::InsufficientHistory);
            }
        }

        Ok(LagFeatures {
            w1: w1?,
            w2: w2?,
            w3: w3?,
        })
    }

    fn window_sum(
        &self,
        index: &HourlyIndex,
        slot: i64,
        window: LagWindow,
    ) -> Result<u64, UndefinedReason> {
        let lo = slot - window.start_hours as i64;
        let hi = slot - window.end_hours as i64;

        if lo < 0 {
            return Err(UndefinedReason::InsufficientHistory);
        }

        let (sum, observed) = index.range(lo as usize, hi as usize);
        let missing = window.width() - observed;
        if missing > 0 && !self.config.zero_filled_gaps {
            return Err(UndefinedReason::MissingObservations { hours: missing });
        }

        Ok(sum)
    }
}

/// Prefix sums over the dense hourly grid spanning a series.
struct HourlyIndex {
    counts: Vec<u64>,
    observed: Vec<u32>,
}

impl HourlyIndex {
    fn build(series: &StationSeries) -> Self {
        let span = series.span_hours();
        let mut slot_counts = vec![0u64; span];
        let mut slot_observed = vec![0u32; span];

        let origin = series.start();
        for event in series.events() {
            let slot = hours_between(origin, event.timestamp) as usize;
            slot_counts[slot] = event.rent_count as u64;
            slot_observed[slot] = 1;
        }

        let mut counts = Vec::with_capacity(span + 1);
        let mut observed = Vec::with_capacity(span + 1);
        counts.push(0);
        observed.push(0);
        for slot in 0..span {
            counts.push(counts[slot] + slot_counts[slot]);
            observed.push(observed[slot] + slot_observed[slot]);
        }

        Self { counts, observed }
    }

    /// Sum and number of observed slots in `[lo, hi)`.
    fn range(&self, lo: usize, hi: usize) -> (u64, u32) {
        (
            self.counts[hi] - self.counts[lo],
            self.observed[hi] - self.observed[lo],
        )
    }
}
