//! Applies both model directories to the scoring rows.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::ml::features::{FeatureRow, StationFeatures};
use crate::ml::model::{LocalTrainer, ModelKind, Regressor, SeasonalTrainer};
use crate::ml::training::TrainedModels;
use crate::pipeline::DateRange;
use crate::series::StationId;

/// A scored hourly row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub rent_count: u32,
    pub global_prediction: f64,
    pub local_prediction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("station {station_id} has no {kind} model")]
    MissingStationModel { station_id: StationId, kind: ModelKind },
}

/// Rows scored for one station, or the reason the station was dropped.
#[derive(Debug, Clone, Default)]
pub struct ScoredStations {
    pub predictions: Vec<Prediction>,
    /// Stations without a model, with the number of rows dropped
    pub dropped: Vec<(ScoringError, usize)>,
}

impl ScoredStations {
    pub fn dropped_rows(&self) -> usize {
        self.dropped.iter().map(|(_, rows)| rows).sum()
    }
}

pub struct PredictionApplier<'a> {
    models: &'a TrainedModels,
}

impl<'a> PredictionApplier<'a> {
    pub fn new(models: &'a TrainedModels) -> Self {
        Self { models }
    }

    /// Score one row. Both families must have a model for the row's station.
    pub fn score(&self, row: &FeatureRow) -> Result<Prediction, ScoringError> {
        let seasonal = self
            .models
            .seasonal
            .get(row.station_id)
            .ok_or(ScoringError::MissingStationModel {
                station_id: row.station_id,
                kind: ModelKind::Seasonal,
            })?;
        let local = self
            .models
            .local
            .get(row.station_id)
            .ok_or(ScoringError::MissingStationModel {
                station_id: row.station_id,
                kind: ModelKind::Local,
            })?;

        Ok(Prediction {
            station_id: row.station_id,
            timestamp: row.timestamp,
            rent_count: row.target,
            global_prediction: SeasonalTrainer::predict(seasonal, row),
            local_prediction: LocalTrainer::predict(local, row),
        })
    }

    /// Score every well-formed row inside `range`.
    ///
    /// A station missing from either directory loses all of its rows; nothing
    /// is defaulted in its place.
    pub fn score_stations(
        &self,
        stations: &[StationFeatures],
        range: &DateRange,
    ) -> ScoredStations {
        let per_station: Vec<Result<Vec<Prediction>, (ScoringError, usize)>> = stations
            .par_iter()
            .map(|station| {
                let rows = station.rows_in(range);
                rows.iter()
                    .map(|row| self.score(row))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| (e, rows.len()))
            })
            .collect();

        let mut scored = ScoredStations::default();
        for result in per_station {
            match result {
                Ok(predictions) => scored.predictions.extend(predictions),
                Err((error, rows)) => {
                    warn!(error = %error, rows, "Dropping scoring rows of station");
                    scored.dropped.push((error, rows));
                }
            }
        }

        info!(
            rows = scored.predictions.len(),
            dropped_stations = scored.dropped.len(),
            dropped_rows = scored.dropped_rows(),
            "Scoring finished"
        );
        scored
    }
}
