//! End-to-end batch run: features, training, scoring, aggregation, flags.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::aggregate::aggregate_daily;
use crate::config::{AppConfig, ConfigError, SplitConfig};
use crate::ml::features::{FeatureExtractor, StationFeatures};
use crate::ml::metrics::ForecastQuality;
use crate::ml::model::{LocalTrainer, ModelKind, SeasonalTrainer};
use crate::ml::training::TrainedModels;
use crate::recommend::{FlaggedAggregate, Thresholds, flag_aggregates};
use crate::scoring::PredictionApplier;
use crate::series::{RentalEvent, partition_stations};

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn check(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::EmptyRange {
                name,
                start: self.start.to_rfc3339(),
                end: self.end.to_rfc3339(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input table is empty")]
    EmptyInput,

    #[error("no station has a valid series ({rejected} rejected, {sentinel_rows} unassigned rows)")]
    NoStations { rejected: usize, sentinel_rows: usize },

    #[error("data from {start} to {end} is too short for a {holdout_days}-day holdout")]
    InsufficientSpan {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        holdout_days: i64,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Training and scoring ranges of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Split {
    pub train: DateRange,
    pub test: DateRange,
}

/// Use the configured ranges, or derive them from the observed span.
///
/// The derived scoring range covers the last `holdout_days` complete calendar
/// days; a trailing partial day is not scored. Training ends `gap_hours` before
/// the scoring range starts.
pub fn resolve_split(
    config: &SplitConfig,
    data_start: DateTime<Utc>,
    data_end: DateTime<Utc>,
) -> Result<Split, PipelineError> {
    if let (Some(train), Some(test)) = (config.train_range, config.test_range) {
        return Ok(Split { train, test });
    }

    let test_end = (data_end + Duration::hours(1))
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc();
    let test_start = test_end - Duration::days(config.holdout_days);
    let train_end = test_start - Duration::hours(config.gap_hours);

    if train_end <= data_start {
        return Err(PipelineError::InsufficientSpan {
            start: data_start,
            end: data_end,
            holdout_days: config.holdout_days,
        });
    }

    Ok(Split {
        train: DateRange::new(data_start, train_end),
        test: DateRange::new(test_start, test_end),
    })
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub input_rows: usize,
    pub sentinel_rows: usize,
    pub stations: usize,
    pub rejected_stations: usize,
    pub insufficient_history_rows: usize,
    pub missing_observation_rows: usize,
    pub skipped_seasonal: usize,
    pub skipped_local: usize,
    pub scored_rows: usize,
    pub dropped_scoring_rows: usize,
    pub station_days: usize,
    pub recommended: usize,
    pub degenerate_aggregates: usize,
    pub split: Option<Split>,
}

/// Feature rows of every valid station plus the resolved split.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub stations: Vec<StationFeatures>,
    pub split: Split,
    pub summary: RunSummary,
}

#[derive(Debug)]
pub struct PipelineOutput {
    /// One row per scored station-day, each with an explicit flag
    pub table: Vec<FlaggedAggregate>,
    pub models: TrainedModels,
    pub quality: ForecastQuality,
    pub summary: RunSummary,
}

pub struct Pipeline {
    config: AppConfig,
    extractor: FeatureExtractor,
    seasonal: SeasonalTrainer,
    local: LocalTrainer,
    thresholds: Thresholds,
    pool: ThreadPool,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.runtime.worker_threads)
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            extractor: FeatureExtractor::new(config.features.clone()),
            seasonal: SeasonalTrainer::new(&config.seasonal),
            local: LocalTrainer::new(&config.local),
            thresholds: Thresholds::from_config(&config.recommendation)?,
            pool,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Group by station, extract features and resolve the split.
    pub fn prepare(&self, events: Vec<RentalEvent>) -> Result<PreparedData, PipelineError> {
        if events.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let input_rows = events.len();

        let partition = partition_stations(events);
        if partition.series.is_empty() {
            return Err(PipelineError::NoStations {
                rejected: partition.rejected.len(),
                sentinel_rows: partition.sentinel_rows,
            });
        }

        let data_start = partition.series.iter().map(|s| s.start()).min();
        let data_end = partition.series.iter().map(|s| s.end()).max();
        let (Some(data_start), Some(data_end)) = (data_start, data_end) else {
            return Err(PipelineError::EmptyInput);
        };
        let split = resolve_split(&self.config.split, data_start, data_end)?;

        let stations: Vec<StationFeatures> = self.pool.install(|| {
            partition
                .series
                .par_iter()
                .map(|series| self.extractor.extract_station(series))
                .collect()
        });

        let summary = RunSummary {
            input_rows,
            sentinel_rows: partition.sentinel_rows,
            stations: stations.len(),
            rejected_stations: partition.rejected.len(),
            insufficient_history_rows: stations.iter().map(|s| s.insufficient_history).sum(),
            missing_observation_rows: stations.iter().map(|s| s.missing_observations).sum(),
            split: Some(split),
            ..Default::default()
        };

        info!(
            input_rows,
            stations = summary.stations,
            sentinel_rows = summary.sentinel_rows,
            insufficient_history = summary.insufficient_history_rows,
            missing_observations = summary.missing_observation_rows,
            train_start = %split.train.start,
            train_end = %split.train.end,
            test_start = %split.test.start,
            test_end = %split.test.end,
            "Features extracted"
        );

        Ok(PreparedData {
            stations,
            split,
            summary,
        })
    }

    /// Fit both model directories on the training range.
    pub fn train(&self, prepared: &PreparedData) -> TrainedModels {
        self.pool.install(|| {
            TrainedModels::train(
                &self.seasonal,
                &self.local,
                &prepared.stations,
                &prepared.split.train,
            )
        })
    }

    /// Train and score in one run.
    pub fn run(&self, events: Vec<RentalEvent>) -> Result<PipelineOutput, PipelineError> {
        let prepared = self.prepare(events)?;
        let models = self.train(&prepared);
        Ok(self.score(prepared, models))
    }

    /// Score with directories from an earlier training run.
    pub fn run_with_models(
        &self,
        events: Vec<RentalEvent>,
        models: TrainedModels,
    ) -> Result<PipelineOutput, PipelineError> {
        let prepared = self.prepare(events)?;
        Ok(self.score(prepared, models))
    }

    fn score(&self, prepared: PreparedData, models: TrainedModels) -> PipelineOutput {
        let PreparedData {
            stations,
            split,
            mut summary,
        } = prepared;

        let applier = PredictionApplier::new(&models);
        let scored = self
            .pool
            .install(|| applier.score_stations(&stations, &split.test));

        let daily = aggregate_daily(
            &scored.predictions,
            self.config.recommendation.unmet_demand_direction,
        );
        let (table, counts) = flag_aggregates(&daily, &self.thresholds);
        let quality = ForecastQuality::compute(&scored.predictions, &daily);

        summary.skipped_seasonal = models.skipped_count(ModelKind::Seasonal);
        summary.skipped_local = models.skipped_count(ModelKind::Local);
        summary.scored_rows = scored.predictions.len();
        summary.dropped_scoring_rows = scored.dropped_rows();
        summary.station_days = counts.station_days;
        summary.recommended = counts.recommended;
        summary.degenerate_aggregates = counts.degenerate;

        info!(
            station_days = summary.station_days,
            recommended = summary.recommended,
            degenerate = summary.degenerate_aggregates,
            hourly_ev_global = ?quality.hourly.global.explained_variance,
            daily_ev_global = ?quality.daily.global.explained_variance,
            hourly_ev_local = ?quality.hourly.local.explained_variance,
            daily_ev_local = ?quality.daily.local.explained_variance,
            "Recommendations computed"
        );

        PipelineOutput {
            table,
            models,
            quality,
            summary,
        }
    }
}
