//! Threshold rule over daily aggregates and the merge back onto the full table.
//!
//! A station-day is recommended for resupply when
//!
//! ```text
//! unmet_demand > count_threshold
//!     AND ceil(unmet_demand) / ceil(global_prediction_total) > pct_threshold
//! ```
//!
//! Both comparisons are strict. Rounding happens before the division so small
//! fractional denominators cannot produce inflated ratios. A rounded denominator
//! of zero or below is a degenerate aggregate and is resolved by
//! [`DegeneratePolicy`], never by floating-point division.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aggregate::DailyAggregate;
use crate::config::{ConfigError, RecommendationConfig};
use crate::series::StationId;

/// Outcome of the relative condition when the rounded seasonal total is `<= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// The ratio is undefined and the station-day is not recommended.
    #[default]
    Exclude,
    /// The relative condition counts as met; the count condition still applies.
    SatisfiesRelative,
}

/// Validated thresholds of the recommendation rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    count_threshold: f64,
    pct_threshold: f64,
    policy: DegeneratePolicy,
}

impl Thresholds {
    pub fn new(
        count_threshold: f64,
        pct_threshold: f64,
        policy: DegeneratePolicy,
    ) -> Result<Self, ConfigError> {
        if !count_threshold.is_finite() {
            return Err(ConfigError::InvalidCountThreshold(count_threshold));
        }
        if !(0.0..1.0).contains(&pct_threshold) {
            return Err(ConfigError::InvalidPctThreshold(pct_threshold));
        }
        Ok(Self {
            count_threshold,
            pct_threshold,
            policy,
        })
    }

    pub fn from_config(config: &RecommendationConfig) -> Result<Self, ConfigError> {
        Self::new(config.count_threshold, config.pct_threshold, config.degenerate_policy)
    }

    pub fn count_threshold(&self) -> f64 {
        self.count_threshold
    }

    pub fn pct_threshold(&self) -> f64 {
        self.pct_threshold
    }

    pub fn policy(&self) -> DegeneratePolicy {
        self.policy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("station {station_id} on {day}: seasonal total {global_total} has a non-positive ceiling")]
pub struct DegenerateAggregate {
    pub station_id: StationId,
    pub day: NaiveDate,
    pub global_total: f64,
}

/// `ceil(unmet_demand) / ceil(global_prediction_total)`.
pub fn unmet_ratio(aggregate: &DailyAggregate) -> Result<f64, DegenerateAggregate> {
    let denominator = aggregate.global_prediction_total.ceil();
    if denominator.is_nan() || denominator <= 0.0 {
        return Err(DegenerateAggregate {
            station_id: aggregate.station_id,
            day: aggregate.day,
            global_total: aggregate.global_prediction_total,
        });
    }
    Ok(aggregate.unmet_demand.ceil() / denominator)
}

/// Result of evaluating the rule on one aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub recommended: bool,
    /// `None` when the count condition already failed or the aggregate is degenerate
    pub pct: Option<f64>,
    pub degenerate: bool,
}

/// Evaluate the threshold rule on one aggregate.
pub fn recommend(aggregate: &DailyAggregate, thresholds: &Thresholds) -> Decision {
    let exceeds_count = aggregate.unmet_demand > thresholds.count_threshold;
    if !exceeds_count {
        return Decision {
            recommended: false,
            pct: None,
            degenerate: false,
        };
    }

    match unmet_ratio(aggregate) {
        Ok(pct) => Decision {
            recommended: pct > thresholds.pct_threshold,
            pct: Some(pct),
            degenerate: false,
        },
        Err(degenerate) => {
            let recommended = thresholds.policy == DegeneratePolicy::SatisfiesRelative;
            debug!(
                station_id = degenerate.station_id,
                day = %degenerate.day,
                global_total = degenerate.global_total,
                recommended,
                "Degenerate aggregate"
            );
            Decision {
                recommended,
                pct: None,
                degenerate: true,
            }
        }
    }
}

/// A station-day selected for resupply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Recommendation {
    pub station_id: StationId,
    pub day: NaiveDate,
    pub flag: u8,
}

/// The recommended subset of `aggregates`, with flag 1.
pub fn select_recommended(
    aggregates: &[DailyAggregate],
    thresholds: &Thresholds,
) -> Vec<Recommendation> {
    aggregates
        .iter()
        .filter(|agg| recommend(agg, thresholds).recommended)
        .map(|agg| Recommendation {
            station_id: agg.station_id,
            day: agg.day,
            flag: 1,
        })
        .collect()
}

/// One row of the output table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlaggedAggregate {
    pub station_id: StationId,
    pub day: NaiveDate,
    pub rent_count_total: u64,
    pub global_prediction_total: f64,
    pub local_prediction_total: f64,
    pub unmet_demand: f64,
    pub pct: Option<f64>,
    pub flag: u8,
}

impl FlaggedAggregate {
    fn new(aggregate: &DailyAggregate, pct: Option<f64>, flag: u8) -> Self {
        Self {
            station_id: aggregate.station_id,
            day: aggregate.day,
            rent_count_total: aggregate.rent_count_total,
            global_prediction_total: aggregate.global_prediction_total,
            local_prediction_total: aggregate.local_prediction_total,
            unmet_demand: aggregate.unmet_demand,
            pct,
            flag,
        }
    }
}

/// Left-join `recommendations` onto `aggregates`.
///
/// Every aggregate yields exactly one row, in input order; station-days absent
/// from `recommendations` get flag 0. `pct` is filled whenever it is defined.
pub fn merge_recommendations(
    aggregates: &[DailyAggregate],
    recommendations: &[Recommendation],
) -> Vec<FlaggedAggregate> {
    let selected: BTreeSet<(StationId, NaiveDate)> = recommendations
        .iter()
        .filter(|r| r.flag == 1)
        .map(|r| (r.station_id, r.day))
        .collect();

    aggregates
        .iter()
        .map(|agg| {
            let flag = u8::from(selected.contains(&(agg.station_id, agg.day)));
            FlaggedAggregate::new(agg, unmet_ratio(agg).ok(), flag)
        })
        .collect()
}

/// Counts reported in the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecommendationCounts {
    pub station_days: usize,
    pub recommended: usize,
    pub degenerate: usize,
}

/// Select, merge and count in one pass over the aggregates.
pub fn flag_aggregates(
    aggregates: &[DailyAggregate],
    thresholds: &Thresholds,
) -> (Vec<FlaggedAggregate>, RecommendationCounts) {
    let recommendations = select_recommended(aggregates, thresholds);
    let table = merge_recommendations(aggregates, &recommendations);

    let counts = RecommendationCounts {
        station_days: table.len(),
        recommended: recommendations.len(),
        degenerate: aggregates
            .iter()
            .filter(|agg| unmet_ratio(agg).is_err())
            .count(),
    };

    (table, counts)
}
