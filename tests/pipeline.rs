//! End-to-end tests of the batch pipeline on a deterministic fixture.

mod common;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use common::*;
use station_resupply::recommend::{Thresholds, recommend};
use station_resupply::{
    DailyAggregate, DegeneratePolicy, PersistedModels, Pipeline, PipelineError, RentalEvent,
    UnmetDemandDirection,
};
use station_resupply::{MockClock, StationId};
use tempfile::tempdir;

fn run_fixture() -> station_resupply::PipelineOutput {
    let pipeline = Pipeline::new(&fixture_config()).unwrap();
    pipeline.run(fixture_events()).unwrap()
}

// ==================== Summary Tests ====================

#[test]
fn test_summary_counts() {
    let output = run_fixture();
    let summary = &output.summary;

    assert_eq!(summary.input_rows, 3 * 1008 + 408 + 96 + SENTINEL_ROWS);
    assert_eq!(summary.sentinel_rows, SENTINEL_ROWS);
    assert_eq!(summary.stations, 5);
    assert_eq!(summary.rejected_stations, 0);
    assert_eq!(summary.insufficient_history_rows, 4 * 168 + 96);
    assert_eq!(summary.missing_observation_rows, 0);
    assert_eq!(summary.skipped_seasonal, 2);
    assert_eq!(summary.skipped_local, 2);
    assert_eq!(summary.scored_rows, 3 * 14 * 24);
    assert_eq!(summary.dropped_scoring_rows, 10 * 24);
    assert_eq!(summary.station_days, 3 * 14);
}

// ==================== Model Directory Tests ====================

#[test]
fn test_directories_cover_trainable_stations_only() {
    let output = run_fixture();

    for station_id in FULL_STATIONS {
        assert!(output.models.seasonal.contains(station_id));
        assert!(output.models.local.contains(station_id));
    }
    assert!(!output.models.seasonal.contains(LATE_STATION));
    assert!(!output.models.local.contains(COLD_STATION));
    assert!(!output.models.seasonal.contains(-1));
}

#[test]
fn test_seasonal_tree_depth_is_capped() {
    let output = run_fixture();

    for (_, tree) in output.models.seasonal.iter() {
        assert!(tree.depth() <= 4);
    }
}

// ==================== Output Table Tests ====================

#[test]
fn test_every_scored_station_day_appears_once() {
    let output = run_fixture();

    let keys: Vec<(StationId, NaiveDate)> = output
        .table
        .iter()
        .map(|r| (r.station_id, r.day))
        .collect();
    let unique: BTreeSet<_> = keys.iter().copied().collect();
    assert_eq!(keys.len(), unique.len());

    let mut expected = BTreeSet::new();
    for station_id in FULL_STATIONS {
        let mut day = test_range().start.date_naive();
        while day < test_range().end.date_naive() {
            expected.insert((station_id, day));
            day = day.succ_opt().unwrap();
        }
    }
    assert_eq!(unique, expected);
}

#[test]
fn test_dropped_and_cold_stations_have_no_rows() {
    let output = run_fixture();

    assert!(output.table.iter().all(|r| r.station_id != LATE_STATION));
    assert!(output.table.iter().all(|r| r.station_id != COLD_STATION));
}

#[test]
fn test_flags_follow_threshold_rule() {
    let config = fixture_config();
    let thresholds = Thresholds::from_config(&config.recommendation).unwrap();
    let output = run_fixture();

    for row in &output.table {
        assert!(row.flag <= 1);
        let aggregate = DailyAggregate {
            station_id: row.station_id,
            day: row.day,
            rent_count_total: row.rent_count_total,
            global_prediction_total: row.global_prediction_total,
            local_prediction_total: row.local_prediction_total,
            unmet_demand: row.unmet_demand,
        };
        assert_eq!(row.flag == 1, recommend(&aggregate, &thresholds).recommended);
    }
    assert_eq!(
        output.table.iter().filter(|r| r.flag == 1).count(),
        output.summary.recommended
    );
}

#[test]
fn test_daily_totals_are_exact_sums_of_counts() {
    let output = run_fixture();

    for row in &output.table {
        let expected: u64 = (0..24)
            .map(|h| {
                let timestamp = row.day.and_hms_opt(h, 0, 0).unwrap().and_utc();
                u64::from(hourly_count(row.station_id, timestamp))
            })
            .sum();
        assert_eq!(row.rent_count_total, expected);
        let expected_unmet = row.local_prediction_total - row.global_prediction_total;
        assert!((row.unmet_demand - expected_unmet).abs() < 1e-9);
    }
}

#[test]
fn test_run_is_deterministic() {
    let first = run_fixture();
    let second = run_fixture();

    assert_eq!(first.table, second.table);
}

// ==================== Configuration Variants ====================

#[test]
fn test_unmet_direction_flips_sign() {
    let default_run = run_fixture();

    let mut config = fixture_config();
    config.recommendation.unmet_demand_direction = UnmetDemandDirection::GlobalMinusLocal;
    let flipped = Pipeline::new(&config).unwrap().run(fixture_events()).unwrap();

    assert_eq!(default_run.table.len(), flipped.table.len());
    for (a, b) in default_run.table.iter().zip(&flipped.table) {
        assert_eq!((a.station_id, a.day), (b.station_id, b.day));
        assert!((a.unmet_demand + b.unmet_demand).abs() < 1e-9);
    }
}

#[test]
fn test_zero_thresholds_with_satisfies_relative_policy() {
    let mut config = fixture_config();
    config.recommendation.count_threshold = -1.0e9;
    config.recommendation.pct_threshold = 0.0;
    config.recommendation.degenerate_policy = DegeneratePolicy::SatisfiesRelative;

    let output = Pipeline::new(&config).unwrap().run(fixture_events()).unwrap();

    // Only the relative condition can still reject a row.
    for row in &output.table {
        let relative_ok = match row.pct {
            Some(pct) => pct > 0.0,
            None => true,
        };
        assert_eq!(row.flag == 1, relative_ok);
    }
}

#[test]
fn test_derived_split_when_no_ranges_configured() {
    let mut config = fixture_config();
    config.split.train_range = None;
    config.split.test_range = None;
    config.split.holdout_days = 7;

    let output = Pipeline::new(&config).unwrap().run(fixture_events()).unwrap();

    let split = output.summary.split.unwrap();
    assert_eq!(split.test.start, at(9, 5, 0));
    assert_eq!(split.test.end, data_end());
    assert_eq!(split.train.end, at(9, 5, 0));
    // Station 5 now has training rows from Sep 2 onward.
    assert!(output.models.local.contains(LATE_STATION));
    assert_eq!(output.summary.station_days, 4 * 7);
}

// ==================== Persistence ====================

#[test]
fn test_scoring_with_loaded_models_matches_training_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("models.bin");
    let pipeline = Pipeline::new(&fixture_config()).unwrap();

    let trained_run = pipeline.run(fixture_events()).unwrap();
    let clock = MockClock::new(at(9, 12, 0));
    PersistedModels::new(&trained_run.models, train_range(), &clock)
        .save(&path)
        .unwrap();

    let loaded = PersistedModels::load(&path).unwrap();
    let scored_run = pipeline.run_with_models(fixture_events(), loaded.into_trained()).unwrap();

    assert_eq!(trained_run.table, scored_run.table);
    assert_eq!(scored_run.summary.skipped_seasonal, 0);
    assert_eq!(scored_run.summary.dropped_scoring_rows, 10 * 24);
}

// ==================== Failure Modes ====================

#[test]
fn test_empty_input_is_fatal() {
    let pipeline = Pipeline::new(&fixture_config()).unwrap();

    assert!(matches!(pipeline.run(Vec::new()), Err(PipelineError::EmptyInput)));
}

#[test]
fn test_invalid_station_series_is_rejected_but_run_continues() {
    let mut events = fixture_events();
    events.push(RentalEvent::new(2, at(8, 10, 0), 1));

    let output = Pipeline::new(&fixture_config()).unwrap().run(events).unwrap();

    assert_eq!(output.summary.rejected_stations, 1);
    assert!(output.table.iter().all(|r| r.station_id != 2));
    assert!(output.table.iter().any(|r| r.station_id == 1));
}
