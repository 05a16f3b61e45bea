//! Station Resupply Library
//!
//! Forecasts hourly bike rentals per docking station with two model families
//! and flags the station-days whose recent demand runs well above the seasonal
//! expectation.

pub mod aggregate;
pub mod config;
pub mod io;
pub mod ml;
pub mod pipeline;
pub mod recommend;
pub mod scoring;
pub mod series;
pub mod traits;

// Re-export commonly used types
pub use aggregate::{DailyAggregate, UnmetDemandDirection, aggregate_daily};
pub use config::{AppConfig, ConfigError};
pub use ml::{ModelDirectory, PersistedModels, TrainedModels};
pub use pipeline::{DateRange, Pipeline, PipelineError, PipelineOutput, RunSummary};
pub use recommend::{DegeneratePolicy, FlaggedAggregate, Recommendation, Thresholds};
pub use scoring::{Prediction, PredictionApplier, ScoringError};
pub use series::{RentalEvent, StationId, StationSeries};
pub use traits::{Clock, MockClock, SystemClock};
