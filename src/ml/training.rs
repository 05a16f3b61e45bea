//! Training pipeline for the per-station model directories

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::ModelDirectory;
use super::features::StationFeatures;
use super::model::{
    LinearModel, LocalTrainer, ModelKind, Regressor, SeasonalTrainer, StationModel, TrainingError,
};
use super::tree::RegressionTree;
use crate::pipeline::DateRange;
use crate::series::StationId;

/// A station that did not get a model of one family.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStation {
    pub station_id: StationId,
    pub kind: ModelKind,
    /// Training rows available to the station
    pub rows: usize,
    pub error: TrainingError,
}

/// Fit one model per station on the rows inside `range`.
///
/// Stations are fitted independently on the rayon pool; the directory is
/// assembled afterwards from the owned results, so a failing station never
/// touches another station's model.
pub fn train_directory<R: Regressor>(
    trainer: &R,
    stations: &[StationFeatures],
    range: &DateRange,
) -> (ModelDirectory<R::Model>, Vec<SkippedStation>) {
    let results: Vec<(StationId, usize, Result<R::Model, TrainingError>)> = stations
        .par_iter()
        .map(|station| {
            let rows = station.rows_in(range);
            (station.station_id, rows.len(), trainer.fit(rows))
        })
        .collect();

    let mut models = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();

    for (station_id, rows, result) in results {
        match result {
            Ok(model) => {
                debug!(
                    station_id,
                    family = %R::KIND,
                    model = %model.info(),
                    "Fitted station"
                );
                models.push((station_id, model));
            }
            Err(error) => {
                warn!(station_id, family = %R::KIND, rows, error = %error, "Skipping station");
                skipped.push(SkippedStation {
                    station_id,
                    kind: R::KIND,
                    rows,
                    error,
                });
            }
        }
    }

    let directory = ModelDirectory::from_models(R::KIND, models);
    info!(
        family = %R::KIND,
        trained = directory.len(),
        skipped = skipped.len(),
        "Model directory built"
    );

    (directory, skipped)
}

/// Both model directories of one training run.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub seasonal: ModelDirectory<RegressionTree>,
    pub local: ModelDirectory<LinearModel>,
    pub skipped: Vec<SkippedStation>,
}

impl TrainedModels {
    /// Train both families concurrently.
    pub fn train(
        seasonal: &SeasonalTrainer,
        local: &LocalTrainer,
        stations: &[StationFeatures],
        range: &DateRange,
    ) -> Self {
        let ((seasonal, mut skipped), (local, local_skipped)) = rayon::join(
            || train_directory(seasonal, stations, range),
            || train_directory(local, stations, range),
        );
        skipped.extend(local_skipped);

        Self {
            seasonal,
            local,
            skipped,
        }
    }

    /// Wrap directories obtained elsewhere, e.g. loaded from disk.
    pub fn from_directories(
        seasonal: ModelDirectory<RegressionTree>,
        local: ModelDirectory<LinearModel>,
    ) -> Self {
        Self {
            seasonal,
            local,
            skipped: Vec::new(),
        }
    }

    /// Number of stations skipped by the given family.
    pub fn skipped_count(&self, kind: ModelKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalConfig, SeasonalConfig};
    use crate::ml::features::{CalendarFeatures, FeatureRow, LagFeatures};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 9, 2, 0, 0, 0).unwrap()
    }

    fn station(station_id: StationId, hours: usize) -> StationFeatures {
        let rows = (0..hours)
            .map(|i| {
                let timestamp = origin() + Duration::hours(i as i64);
                let w2 = (i % 4) as u64;
                FeatureRow {
                    station_id,
                    timestamp,
                    calendar: CalendarFeatures::from_timestamp(timestamp),
                    lags: LagFeatures {
                        w1: (10 + i % 7) as u64,
                        w2,
                        w3: (30 + (i * 5) % 11) as u64,
                    },
                    target: (1 + w2) as u32,
                }
            })
            .collect();

        StationFeatures {
            station_id,
            rows,
            ..Default::default()
        }
    }

    fn whole_range() -> DateRange {
        DateRange::new(origin(), origin() + Duration::days(365))
    }

    fn trainers() -> (SeasonalTrainer, LocalTrainer) {
        (
            SeasonalTrainer::new(&SeasonalConfig {
                min_training_rows: 48,
                ..Default::default()
            }),
            LocalTrainer::new(&LocalConfig {
                min_training_rows: 48,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_small_station_is_skipped_without_affecting_others() {
        let (seasonal, _) = trainers();
        let stations = vec![station(1, 200), station(2, 10), station(3, 200)];

        let (directory, skipped) = train_directory(&seasonal, &stations, &whole_range());

        assert_eq!(directory.stations().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].station_id, 2);
        assert_eq!(skipped[0].rows, 10);
        assert_eq!(skipped[0].kind, ModelKind::Seasonal);
        assert!(matches!(skipped[0].error, TrainingError::InsufficientData { rows: 10, .. }));
    }

    #[test]
    fn test_station_without_rentals_keeps_local_model() {
        let (_, local) = trainers();
        let mut closed = station(4, 200);
        for row in closed.rows.iter_mut() {
            row.lags = LagFeatures::default();
            row.target = 0;
        }

        let (directory, skipped) = train_directory(&local, &[closed], &whole_range());

        assert!(skipped.is_empty());
        assert_eq!(directory.get(4).map(|m| m.intercept()), Some(0.0));
    }

    #[test]
    fn test_training_only_sees_rows_in_range() {
        let (_, local) = trainers();
        let stations = vec![station(1, 200)];
        let range = DateRange::new(origin(), origin() + Duration::hours(20));

        let (directory, skipped) = train_directory(&local, &stations, &range);

        assert!(directory.is_empty());
        assert_eq!(skipped[0].rows, 20);
    }

    #[test]
    fn test_train_both_families() {
        let (seasonal, local) = trainers();
        let stations = vec![station(1, 200), station(2, 10)];

        let trained = TrainedModels::train(&seasonal, &local, &stations, &whole_range());

        assert_eq!(trained.seasonal.kind(), ModelKind::Seasonal);
        assert_eq!(trained.local.kind(), ModelKind::Local);
        assert!(trained.seasonal.contains(1));
        assert!(trained.local.contains(1));
        assert_eq!(trained.skipped_count(ModelKind::Seasonal), 1);
        assert_eq!(trained.skipped_count(ModelKind::Local), 1);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (seasonal, local) = trainers();
        let stations: Vec<_> = (1..=6).map(|id| station(id, 150 + id as usize * 10)).collect();

        let first = TrainedModels::train(&seasonal, &local, &stations, &whole_range());
        let second = TrainedModels::train(&seasonal, &local, &stations, &whole_range());

        assert_eq!(first.seasonal, second.seasonal);
        assert_eq!(first.local, second.local);
    }
}
