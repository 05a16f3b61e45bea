//! Daily aggregation of hourly predictions

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::scoring::Prediction;
use crate::series::StationId;

/// Which forecast is subtracted from which when computing `unmet_demand`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmetDemandDirection {
    /// `local_total - global_total`: recent activity above the seasonal norm
    #[default]
    LocalMinusGlobal,
    /// `global_total - local_total`
    GlobalMinusLocal,
}

impl UnmetDemandDirection {
    pub fn apply(self, global_total: f64, local_total: f64) -> f64 {
        match self {
            UnmetDemandDirection::LocalMinusGlobal => local_total - global_total,
            UnmetDemandDirection::GlobalMinusLocal => global_total - local_total,
        }
    }
}

/// Totals of one station over one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyAggregate {
    pub station_id: StationId,
    pub day: NaiveDate,
    pub rent_count_total: u64,
    pub global_prediction_total: f64,
    pub local_prediction_total: f64,
    pub unmet_demand: f64,
}

#[derive(Default)]
struct Totals {
    rent_count: u64,
    global: f64,
    local: f64,
}

/// Sum predictions per `(station_id, day)`.
///
/// Output is ordered by station then day; only days with at least one scored
/// row appear.
pub fn aggregate_daily(
    predictions: &[Prediction],
    direction: UnmetDemandDirection,
) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<(StationId, NaiveDate), Totals> = BTreeMap::new();

    for p in predictions {
        let totals = groups
            .entry((p.station_id, p.timestamp.date_naive()))
            .or_default();
        totals.rent_count += u64::from(p.rent_count);
        totals.global += p.global_prediction;
        totals.local += p.local_prediction;
    }

    groups
        .into_iter()
        .map(|((station_id, day), totals)| DailyAggregate {
            station_id,
            day,
            rent_count_total: totals.rent_count,
            global_prediction_total: totals.global,
            local_prediction_total: totals.local,
            unmet_demand: direction.apply(totals.global, totals.local),
        })
        .collect()
}
