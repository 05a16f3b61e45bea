//! The two per-station model families
//!
//! Both families are fitted through the [`Regressor`] trait: the seasonal family
//! is a shallow regression tree over calendar features, the local family a
//! linear regression over lagged rolling sums.

use std::fmt;

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::features::{CalendarFeatures, FeatureRow, LagFeatures};
use super::tree::{RegressionTree, TreeParams};
use crate::config::{LocalConfig, SeasonalConfig};

/// Width of the input vector of either family.
pub const MODEL_INPUTS: usize = 3;

/// Which family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Calendar-only forecast, reported as `global_prediction`
    Seasonal,
    /// Recent-activity forecast, reported as `local_prediction`
    Local,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Seasonal => write!(f, "seasonal"),
            ModelKind::Local => write!(f, "local"),
        }
    }
}

/// Errors that can occur while fitting one station's model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("insufficient training data: {rows} rows, {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("feature and target lengths mismatch: {features} vs {targets}")]
    MismatchedLengths { features: usize, targets: usize },

    #[error("array error: {0}")]
    ArrayError(String),

    #[error("model fitting error: {0}")]
    FitError(String),
}

/// A fitted model that maps one input vector to a forecast.
pub trait StationModel: Send + Sync {
    fn predict(&self, inputs: &[f64; MODEL_INPUTS]) -> f64;

    /// One-line description for logs.
    fn info(&self) -> String;
}

impl StationModel for RegressionTree {
    fn predict(&self, inputs: &[f64; MODEL_INPUTS]) -> f64 {
        RegressionTree::predict(self, inputs)
    }

    fn info(&self) -> String {
        format!(
            "RegressionTree(samples={}, depth={}, leaves={})",
            self.training_samples,
            self.depth(),
            self.leaf_count()
        )
    }
}

/// Shared capability of the two trainers.
pub trait Regressor: Send + Sync {
    type Model: StationModel + Clone + fmt::Debug + Serialize + DeserializeOwned;

    const KIND: ModelKind;

    /// Select this family's inputs from a row.
    fn inputs(row: &FeatureRow) -> [f64; MODEL_INPUTS];

    fn feature_names() -> [&'static str; MODEL_INPUTS];

    /// Minimum number of rows a station needs before it is fitted.
    fn min_training_rows(&self) -> usize;

    /// Fit on already-validated design matrices.
    fn fit_arrays(
        &self,
        records: Array2<f64>,
        targets: Array1<f64>,
    ) -> Result<Self::Model, TrainingError>;

    /// Fit one station's model on its training rows.
    fn fit(&self, rows: &[FeatureRow]) -> Result<Self::Model, TrainingError> {
        let required = self.min_training_rows().max(1);
        if rows.len() < required {
            return Err(TrainingError::InsufficientData {
                rows: rows.len(),
                required,
            });
        }

        let (records, targets) = design_matrix::<Self>(rows)?;
        self.fit_arrays(records, targets)
    }

    fn predict(model: &Self::Model, row: &FeatureRow) -> f64 {
        model.predict(&Self::inputs(row))
    }
}

fn design_matrix<R: Regressor + ?Sized>(
    rows: &[FeatureRow],
) -> Result<(Array2<f64>, Array1<f64>), TrainingError> {
    let flat: Vec<f64> = rows.iter().flat_map(R::inputs).collect();
    let records = Array2::from_shape_vec((rows.len(), MODEL_INPUTS), flat)
        .map_err(|e| TrainingError::ArrayError(e.to_string()))?;
    let targets = Array1::from_iter(rows.iter().map(|r| r.target as f64));
    Ok((records, targets))
}

// ==================== Seasonal Family ====================

/// Fits a regression tree on `{week_of_year, day_of_week, hour_of_day}`.
#[derive(Debug, Clone)]
pub struct SeasonalTrainer {
    params: TreeParams,
    min_training_rows: usize,
}

impl SeasonalTrainer {
    pub fn new(config: &SeasonalConfig) -> Self {
        Self {
            params: TreeParams::default()
                .max_depth(config.max_depth)
                .criterion(config.criterion)
                .min_samples_split(config.min_samples_split)
                .min_samples_leaf(config.min_samples_leaf),
            min_training_rows: config.min_training_rows,
        }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }
}

impl Default for SeasonalTrainer {
    fn default() -> Self {
        Self::new(&SeasonalConfig::default())
    }
}

impl Regressor for SeasonalTrainer {
    type Model = RegressionTree;

    const KIND: ModelKind = ModelKind::Seasonal;

    fn inputs(row: &FeatureRow) -> [f64; MODEL_INPUTS] {
        row.calendar.to_array()
    }

    fn feature_names() -> [&'static str; MODEL_INPUTS] {
        CalendarFeatures::feature_names()
    }

    fn min_training_rows(&self) -> usize {
        self.min_training_rows
    }

    fn fit_arrays(
        &self,
        records: Array2<f64>,
        targets: Array1<f64>,
    ) -> Result<RegressionTree, TrainingError> {
        self.params.fit(records.view(), targets.view())
    }
}

// ==================== Local Family ====================

/// Linear model over the three lag windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    coefficients: [f64; MODEL_INPUTS],
    intercept: f64,
    /// Number of rows the model was fitted on
    pub training_samples: usize,
    /// Mean absolute error on the training rows
    pub training_mae: f64,
}

impl LinearModel {
    pub fn new(coefficients: [f64; MODEL_INPUTS], intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
            training_samples: 0,
            training_mae: 0.0,
        }
    }

    pub fn coefficients(&self) -> &[f64; MODEL_INPUTS] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl StationModel for LinearModel {
    fn predict(&self, inputs: &[f64; MODEL_INPUTS]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(inputs.iter())
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }

    fn info(&self) -> String {
        format!(
            "LinearModel(samples={}, train_mae={:.2}, coef=[{:.3}, {:.3}, {:.3}], intercept={:.3})",
            self.training_samples,
            self.training_mae,
            self.coefficients[0],
            self.coefficients[1],
            self.coefficients[2],
            self.intercept
        )
    }
}

/// Fits an ordinary least squares model on `{w1, w2, w3}`.
#[derive(Debug, Clone)]
pub struct LocalTrainer {
    fit_intercept: bool,
    min_training_rows: usize,
}

impl LocalTrainer {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            fit_intercept: config.fit_intercept,
            min_training_rows: config.min_training_rows,
        }
    }

    /// A column is informative when it varies, or, without an intercept,
    /// when it is not identically zero.
    fn is_informative(&self, column: ArrayView1<f64>) -> bool {
        match column.first() {
            None => false,
            Some(&first) if self.fit_intercept => column.iter().any(|&x| x != first),
            Some(_) => column.iter().any(|&x| x != 0.0),
        }
    }
}

impl Default for LocalTrainer {
    fn default() -> Self {
        Self::new(&LocalConfig::default())
    }
}

impl Regressor for LocalTrainer {
    type Model = LinearModel;

    const KIND: ModelKind = ModelKind::Local;

    fn inputs(row: &FeatureRow) -> [f64; MODEL_INPUTS] {
        row.lags.to_array()
    }

    fn feature_names() -> [&'static str; MODEL_INPUTS] {
        LagFeatures::feature_names()
    }

    fn min_training_rows(&self) -> usize {
        self.min_training_rows
    }

    fn fit_arrays(
        &self,
        records: Array2<f64>,
        targets: Array1<f64>,
    ) -> Result<LinearModel, TrainingError> {
        let n_samples = records.nrows();

        // Columns that carry no information make the QR solve singular; they
        // keep a zero coefficient.
        let informative: Vec<usize> = (0..MODEL_INPUTS)
            .filter(|&j| self.is_informative(records.column(j)))
            .collect();

        let mut coefficients = [0.0; MODEL_INPUTS];
        let intercept = if informative.is_empty() {
            if self.fit_intercept {
                targets.mean().unwrap_or(0.0)
            } else {
                0.0
            }
        } else {
            let dataset = Dataset::new(records.select(Axis(1), &informative), targets.clone());
            let fitted = LinearRegression::default()
                .with_intercept(self.fit_intercept)
                .fit(&dataset)
                .map_err(|e: linfa_linear::LinearError<f64>| {
                    TrainingError::FitError(e.to_string())
                })?;

            let params = fitted.params();
            if params.len() != informative.len() {
                return Err(TrainingError::ArrayError(format!(
                    "expected {} coefficients, got {}",
                    informative.len(),
                    params.len()
                )));
            }
            for (&column, &value) in informative.iter().zip(params.iter()) {
                coefficients[column] = value;
            }
            fitted.intercept()
        };

        if coefficients.iter().any(|c| !c.is_finite()) || !intercept.is_finite() {
            return Err(TrainingError::FitError("non-finite coefficients".to_string()));
        }

        let mut model = LinearModel::new(coefficients, intercept);

        let abs_error: f64 = records
            .rows()
            .into_iter()
            .zip(targets.iter())
            .map(|(row, y)| (model.predict(&[row[0], row[1], row[2]]) - y).abs())
            .sum();
        model.training_samples = n_samples;
        model.training_mae = abs_error / n_samples as f64;

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::CalendarFeatures;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    /// Rows whose target is an exact linear function of the lags.
    fn linear_rows(n: usize) -> Vec<FeatureRow> {
        let origin = Utc.with_ymd_and_hms(2019, 9, 2, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let w1 = (20 + (i * 7) % 31) as u64;
                let w2 = ((i * 3) % 5) as u64;
                let w3 = (15 + (i * 11) % 23) as u64;
                let target = 2 + 2 * w2;
                let timestamp = origin + Duration::hours(i as i64);
                FeatureRow {
                    station_id: 1,
                    timestamp,
                    calendar: CalendarFeatures::from_timestamp(timestamp),
                    lags: LagFeatures { w1, w2, w3 },
                    target: target as u32,
                }
            })
            .collect()
    }

    #[test]
    fn test_model_kind_display() {
        assert_eq!(ModelKind::Seasonal.to_string(), "seasonal");
        assert_eq!(ModelKind::Local.to_string(), "local");
    }

    #[test]
    fn test_fit_rejects_small_station() {
        let trainer = LocalTrainer::new(&LocalConfig {
            min_training_rows: 100,
            ..Default::default()
        });

        let result = trainer.fit(&linear_rows(10));

        assert_eq!(
            result.unwrap_err(),
            TrainingError::InsufficientData {
                rows: 10,
                required: 100
            }
        );
    }

    #[test]
    fn test_fit_rejects_empty_station_even_without_minimum() {
        let trainer = SeasonalTrainer::new(&SeasonalConfig {
            min_training_rows: 0,
            ..Default::default()
        });

        assert!(matches!(
            trainer.fit(&[]),
            Err(TrainingError::InsufficientData { rows: 0, .. })
        ));
    }

    #[test]
    fn test_local_trainer_recovers_linear_relation() {
        let trainer = LocalTrainer::default();
        let rows = linear_rows(200);

        let model = trainer.fit(&rows).unwrap();

        assert_relative_eq!(model.coefficients()[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(model.intercept(), 2.0, epsilon = 1e-6);
        assert_eq!(model.training_samples, 200);
        assert!(model.training_mae < 1e-6);
        for row in rows.iter().take(10) {
            assert_relative_eq!(
                LocalTrainer::predict(&model, row),
                row.target as f64,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_local_trainer_fits_station_without_rentals() {
        let trainer = LocalTrainer::default();
        let mut rows = linear_rows(96);
        for row in rows.iter_mut() {
            row.lags = LagFeatures::default();
            row.target = 0;
        }

        let model = trainer.fit(&rows).unwrap();

        assert_eq!(model.coefficients(), &[0.0, 0.0, 0.0]);
        assert_eq!(model.intercept(), 0.0);
        assert_eq!(LocalTrainer::predict(&model, &rows[0]), 0.0);
    }

    #[test]
    fn test_local_trainer_without_lag_variation_predicts_mean() {
        let trainer = LocalTrainer::new(&LocalConfig {
            min_training_rows: 1,
            ..Default::default()
        });
        let mut rows = linear_rows(4);
        for (row, target) in rows.iter_mut().zip([1, 3, 5, 7]) {
            row.lags = LagFeatures {
                w1: 12,
                w2: 0,
                w3: 5,
            };
            row.target = target;
        }

        let model = trainer.fit(&rows).unwrap();

        assert_eq!(model.coefficients(), &[0.0, 0.0, 0.0]);
        assert_relative_eq!(model.intercept(), 4.0);
        assert_relative_eq!(model.training_mae, 2.0);
    }

    #[test]
    fn test_local_trainer_drops_constant_lag_column() {
        let trainer = LocalTrainer::default();
        let mut rows = linear_rows(200);
        for row in rows.iter_mut() {
            row.lags.w3 = 0;
        }

        let model = trainer.fit(&rows).unwrap();

        assert_eq!(model.coefficients()[2], 0.0);
        assert_relative_eq!(model.coefficients()[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(model.intercept(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_seasonal_trainer_uses_calendar_only() {
        let trainer = SeasonalTrainer::default();
        let mut rows = linear_rows(24 * 14);
        for row in rows.iter_mut() {
            row.target = if row.calendar.hour_of_day >= 12 { 30 } else { 4 };
        }

        let tree = trainer.fit(&rows).unwrap();

        let mut query = rows[0];
        query.calendar.hour_of_day = 15;
        query.lags = LagFeatures::default();
        assert_eq!(SeasonalTrainer::predict(&tree, &query), 30.0);
        query.calendar.hour_of_day = 3;
        assert_eq!(SeasonalTrainer::predict(&tree, &query), 4.0);
        assert!(tree.depth() <= 4);
    }

    #[test]
    fn test_linear_model_predict() {
        let model = LinearModel::new([1.0, 2.0, 0.5], 3.0);

        assert_eq!(model.predict(&[10.0, 1.0, 4.0]), 3.0 + 10.0 + 2.0 + 2.0);
    }

    #[test]
    fn test_model_info() {
        let model = LinearModel::new([1.0, 2.0, 0.5], 3.0);
        let info = model.info();

        assert!(info.contains("samples=0"));
        assert!(info.contains("intercept=3.000"));

        let mut rows = linear_rows(100);
        for row in rows.iter_mut() {
            row.target = if row.calendar.hour_of_day >= 12 { 9 } else { 1 };
        }
        let tree = SeasonalTrainer::default().fit(&rows).unwrap();
        assert!(tree.info().contains("samples=100"));
    }

    #[test]
    fn test_feature_names_are_disjoint() {
        let seasonal = SeasonalTrainer::feature_names();
        let local = LocalTrainer::feature_names();

        assert!(seasonal.iter().all(|name| !local.contains(name)));
    }
}
