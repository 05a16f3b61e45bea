//! Forecast quality against observed rent counts

use serde::Serialize;

use crate::aggregate::DailyAggregate;
use crate::scoring::Prediction;

/// Share of the variance of `observed` explained by `predicted`.
///
/// `None` for empty input or when the observations have no variance.
pub fn explained_variance(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }

    let var_observed = variance(observed.iter().copied());
    if var_observed <= f64::EPSILON {
        return None;
    }
    let var_residual = variance(observed.iter().zip(predicted).map(|(y, p)| y - p));

    Some(1.0 - var_residual / var_observed)
}

/// Mean absolute error, `None` for empty or mismatched input.
pub fn mae(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let total: f64 = observed.iter().zip(predicted).map(|(y, p)| (y - p).abs()).sum();
    Some(total / observed.len() as f64)
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Score {
    pub explained_variance: Option<f64>,
    pub mae: Option<f64>,
}

impl Score {
    fn compute(observed: &[f64], predicted: &[f64]) -> Self {
        Self {
            explained_variance: explained_variance(observed, predicted),
            mae: mae(observed, predicted),
        }
    }
}

/// Scores of both families at one granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FamilyScores {
    pub global: Score,
    pub local: Score,
}

/// Quality of the forecasts at hourly and at daily granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ForecastQuality {
    pub hourly: FamilyScores,
    pub daily: FamilyScores,
}

impl ForecastQuality {
    pub fn compute(predictions: &[Prediction], daily: &[DailyAggregate]) -> Self {
        let observed: Vec<f64> = predictions.iter().map(|p| p.rent_count as f64).collect();
        let global: Vec<f64> = predictions.iter().map(|p| p.global_prediction).collect();
        let local: Vec<f64> = predictions.iter().map(|p| p.local_prediction).collect();

        let daily_observed: Vec<f64> = daily.iter().map(|d| d.rent_count_total as f64).collect();
        let daily_global: Vec<f64> = daily.iter().map(|d| d.global_prediction_total).collect();
        let daily_local: Vec<f64> = daily.iter().map(|d| d.local_prediction_total).collect();

        Self {
            hourly: FamilyScores {
                global: Score::compute(&observed, &global),
                local: Score::compute(&observed, &local),
            },
            daily: FamilyScores {
                global: Score::compute(&daily_observed, &daily_global),
                local: Score::compute(&daily_observed, &daily_local),
            },
        }
    }
}
