use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::UnmetDemandDirection;
use crate::ml::features::LagWindow;
use crate::ml::tree::SplitCriterion;
use crate::pipeline::DateRange;
use crate::recommend::{DegeneratePolicy, Thresholds};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub seasonal: SeasonalConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SplitConfig {
    /// Explicit training range; derived from the data when absent.
    pub train_range: Option<DateRange>,
    /// Explicit scoring range; derived from the data when absent.
    pub test_range: Option<DateRange>,
    /// Days at the end of the data used for scoring when no ranges are configured.
    pub holdout_days: i64,
    /// Hours left out between the derived training and scoring ranges.
    pub gap_hours: i64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_range: None,
            test_range: None,
            holdout_days: 28,
            gap_hours: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FeatureConfig {
    /// Yesterday as a whole, with a day's lead time.
    pub w1: LagWindow,
    /// Same hour one day back, no closer than 24h.
    pub w2: LagWindow,
    /// Same day of week, one week back.
    pub w3: LagWindow,
    /// Every lag window must end at least this many hours before the row.
    pub min_lead_hours: u32,
    /// Set when ingestion guarantees that absent hours mean zero rentals.
    pub zero_filled_gaps: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            w1: LagWindow::new(48, 24),
            w2: LagWindow::new(25, 24),
            w3: LagWindow::new(168, 144),
            min_lead_hours: 24,
            zero_filled_gaps: false,
        }
    }
}

impl FeatureConfig {
    pub fn windows(&self) -> [(&'static str, LagWindow); 3] {
        [("w1", self.w1), ("w2", self.w2), ("w3", self.w3)]
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SeasonalConfig {
    pub max_depth: usize,
    pub criterion: SplitCriterion,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_training_rows: usize,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            criterion: SplitCriterion::AbsoluteError,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_training_rows: 48,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LocalConfig {
    pub fit_intercept: bool,
    pub min_training_rows: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            min_training_rows: 48,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecommendationConfig {
    /// Absolute number of bikes the daily gap must exceed.
    pub count_threshold: f64,
    /// Fraction of the seasonal forecast the daily gap must exceed.
    pub pct_threshold: f64,
    pub degenerate_policy: DegeneratePolicy,
    pub unmet_demand_direction: UnmetDemandDirection,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            count_threshold: 25.0,
            pct_threshold: 0.3,
            degenerate_policy: DegeneratePolicy::Exclude,
            unmet_demand_direction: UnmetDemandDirection::LocalMinusGlobal,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Worker threads for per-station work; 0 uses one per core.
    pub worker_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("lag window {name} must start before it ends (start={start_hours}h, end={end_hours}h)")]
    EmptyLagWindow {
        name: &'static str,
        start_hours: u32,
        end_hours: u32,
    },

    #[error("lag window {name} ends {end_hours}h before the row, under the {min_lead_hours}h lead")]
    LeakingLagWindow {
        name: &'static str,
        end_hours: u32,
        min_lead_hours: u32,
    },

    #[error("minimum lead time must be at least one hour")]
    ZeroLead,

    #[error("tree max_depth must be at least 1")]
    InvalidTreeDepth,

    #[error("min_samples_split must be >= 2 and min_samples_leaf >= 1")]
    InvalidTreeSamples,

    #[error("count_threshold must be a finite number, got {0}")]
    InvalidCountThreshold(f64),

    #[error("pct_threshold must lie in [0, 1), got {0}")]
    InvalidPctThreshold(f64),

    #[error("{name} range is empty ({start} >= {end})")]
    EmptyRange {
        name: &'static str,
        start: String,
        end: String,
    },

    #[error("train_range and test_range must be configured together")]
    HalfConfiguredSplit,

    #[error("holdout_days must be positive and gap_hours non-negative")]
    InvalidHoldout,
}

impl AppConfig {
    /// Load configuration from defaults, optional files and the environment.
    ///
    /// Sources in increasing priority:
    /// 1. Built-in defaults
    /// 2. `resupply.toml` in the working directory
    /// 3. `<config dir>/station-resupply/config.toml`
    /// 4. `extra_file`, when given
    /// 5. `RESUPPLY__SECTION__KEY` environment variables
    pub fn load(extra_file: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("station-resupply");

        let mut builder = Config::builder()
            // Split
            .set_default("split.holdout_days", 28)?
            .set_default("split.gap_hours", 0)?
            // Features
            .set_default("features.w1.start_hours", 48)?
            .set_default("features.w1.end_hours", 24)?
            .set_default("features.w2.start_hours", 25)?
            .set_default("features.w2.end_hours", 24)?
            .set_default("features.w3.start_hours", 168)?
            .set_default("features.w3.end_hours", 144)?
            .set_default("features.min_lead_hours", 24)?
            .set_default("features.zero_filled_gaps", false)?
            // Seasonal model
            .set_default("seasonal.max_depth", 4)?
            .set_default("seasonal.criterion", "absolute_error")?
            .set_default("seasonal.min_samples_split", 2)?
            .set_default("seasonal.min_samples_leaf", 1)?
            .set_default("seasonal.min_training_rows", 48)?
            // Local model
            .set_default("local.fit_intercept", true)?
            .set_default("local.min_training_rows", 48)?
            // Recommendation
            .set_default("recommendation.count_threshold", 25.0)?
            .set_default("recommendation.pct_threshold", 0.3)?
            .set_default("recommendation.degenerate_policy", "exclude")?
            .set_default("recommendation.unmet_demand_direction", "local_minus_global")?
            // Runtime
            .set_default("runtime.worker_threads", 0)?
            .add_source(File::from(PathBuf::from("resupply.toml")).required(false))
            .add_source(File::from(config_dir.join("config.toml")).required(false));

        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix("RESUPPLY").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features.min_lead_hours == 0 {
            return Err(ConfigError::ZeroLead);
        }
        for (name, window) in self.features.windows() {
            if window.start_hours <= window.end_hours {
                return Err(ConfigError::EmptyLagWindow {
                    name,
                    start_hours: window.start_hours,
                    end_hours: window.end_hours,
                });
            }
            if window.end_hours < self.features.min_lead_hours {
                return Err(ConfigError::LeakingLagWindow {
                    name,
                    end_hours: window.end_hours,
                    min_lead_hours: self.features.min_lead_hours,
                });
            }
        }

        if self.seasonal.max_depth == 0 {
            return Err(ConfigError::InvalidTreeDepth);
        }
        if self.seasonal.min_samples_split < 2 || self.seasonal.min_samples_leaf == 0 {
            return Err(ConfigError::InvalidTreeSamples);
        }

        Thresholds::from_config(&self.recommendation)?;

        match (&self.split.train_range, &self.split.test_range) {
            (Some(train), Some(test)) => {
                train.check("train")?;
                test.check("test")?;
            }
            (None, None) => {
                if self.split.holdout_days <= 0 || self.split.gap_hours < 0 {
                    return Err(ConfigError::InvalidHoldout);
                }
            }
            _ => return Err(ConfigError::HalfConfiguredSplit),
        }

        Ok(())
    }
}
