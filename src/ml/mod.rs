//! Per-station demand forecasting
//!
//! Every station gets its own pair of models: a seasonal regression tree on
//! calendar features and a local linear regression on lagged rolling sums. The
//! fitted models live in one [`ModelDirectory`] per family, keyed by station id.

pub mod features;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod training;
pub mod tree;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::series::StationId;

pub use features::{FeatureExtractor, FeatureRow, StationFeatures};
pub use metrics::ForecastQuality;
pub use model::{
    LinearModel, LocalTrainer, ModelKind, Regressor, SeasonalTrainer, StationModel, TrainingError,
};
pub use persistence::{PersistedModels, PersistenceError};
pub use training::{TrainedModels, train_directory};
pub use tree::RegressionTree;

/// Mapping from station id to that station's fitted model of one family.
///
/// Built once from a completed training run and read-only afterwards; a station
/// either has exactly one entry or none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDirectory<M> {
    kind: ModelKind,
    models: BTreeMap<StationId, M>,
}

impl<M> ModelDirectory<M> {
    pub fn from_models(kind: ModelKind, models: impl IntoIterator<Item = (StationId, M)>) -> Self {
        Self {
            kind,
            models: models.into_iter().collect(),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn get(&self, station_id: StationId) -> Option<&M> {
        self.models.get(&station_id)
    }

    pub fn contains(&self, station_id: StationId) -> bool {
        self.models.contains_key(&station_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Station ids in ascending order.
    pub fn stations(&self) -> impl Iterator<Item = StationId> + '_ {
        self.models.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StationId, &M)> {
        self.models.iter().map(|(id, m)| (*id, m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_lookup() {
        let directory = ModelDirectory::from_models(
            ModelKind::Local,
            vec![
                (3, LinearModel::new([1.0, 0.0, 0.0], 0.0)),
                (1, LinearModel::new([0.0, 1.0, 0.0], 0.0)),
            ],
        );

        assert_eq!(directory.kind(), ModelKind::Local);
        assert_eq!(directory.len(), 2);
        assert!(directory.contains(1));
        assert!(!directory.contains(2));
        assert!(directory.get(2).is_none());
        assert_eq!(directory.stations().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_later_entry_replaces_earlier() {
        let directory = ModelDirectory::from_models(
            ModelKind::Local,
            vec![
                (1, LinearModel::new([1.0, 0.0, 0.0], 0.0)),
                (1, LinearModel::new([0.0, 0.0, 0.0], 7.0)),
            ],
        );

        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(1).map(|m| m.intercept()), Some(7.0));
    }

    #[test]
    fn test_empty_directory() {
        let directory: ModelDirectory<RegressionTree> =
            ModelDirectory::from_models(ModelKind::Seasonal, Vec::new());

        assert!(directory.is_empty());
        assert_eq!(directory.iter().count(), 0);
    }
}
