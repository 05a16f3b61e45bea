//! Model persistence - save and load both model directories

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ModelDirectory;
use super::model::{LinearModel, MODEL_INPUTS, ModelKind};
use super::training::TrainedModels;
use super::tree::RegressionTree;
use crate::pipeline::DateRange;
use crate::series::StationId;
use crate::traits::Clock;

/// Snapshot of a training run: both directories plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModels {
    /// Version for backward compatibility
    pub version: u32,
    /// When the models were trained
    pub created_at: DateTime<Utc>,
    /// Rows inside this range were used for fitting
    pub training_range: DateRange,
    pub seasonal: ModelDirectory<RegressionTree>,
    pub local: ModelDirectory<LinearModel>,
}

impl PersistedModels {
    /// Current version number
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(trained: &TrainedModels, training_range: DateRange, clock: &dyn Clock) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            created_at: clock.now_utc(),
            training_range,
            seasonal: trained.seasonal.clone(),
            local: trained.local.clone(),
        }
    }

    /// Save to a file using bincode
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = bincode::serialize(self)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        fs::write(path, bytes)?;

        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let bytes = fs::read(path)?;
        let models: Self =
            bincode::deserialize(&bytes).map_err(|e| PersistenceError::Deserialize(e.to_string()))?;

        if models.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: models.version,
            });
        }
        if models.seasonal.kind() != ModelKind::Seasonal
            || models.local.kind() != ModelKind::Local
        {
            return Err(PersistenceError::Deserialize("model directories are swapped".to_string()));
        }
        if let Some((station_id, _)) = models
            .seasonal
            .iter()
            .find(|(_, tree)| !tree.accepts_inputs(MODEL_INPUTS))
        {
            return Err(PersistenceError::MalformedModel {
                station_id,
                kind: ModelKind::Seasonal,
            });
        }

        Ok(models)
    }

    /// Replace-wholesale conversion into the directories used for scoring.
    pub fn into_trained(self) -> TrainedModels {
        TrainedModels::from_directories(self.seasonal, self.local)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Models v{}: {} seasonal, {} local, trained on {} .. {}, created {}",
            self.version,
            self.seasonal.len(),
            self.local.len(),
            self.training_range.start.format("%Y-%m-%d %H:%M"),
            self.training_range.end.format("%Y-%m-%d %H:%M"),
            self.created_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// Errors that can occur during model persistence
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("model file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("model version mismatch: expected v{expected}, found v{found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("{kind} model of station {station_id} does not match the model inputs")]
    MalformedModel { station_id: StationId, kind: ModelKind },
}
