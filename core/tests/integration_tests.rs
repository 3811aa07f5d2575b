//! End-to-end integration tests for the GNSS-R assimilation system
//!
//! These tests exercise the whole pipeline — forcing generation, truth
//! simulation, observation synthesis, filtering, and CSV export — rather than
//! individual module APIs. The performance envelopes asserted here are not
//! theoretical bounds; they were derived empirically from running the
//! closed-loop experiment at the given seeds and serve as regression checks.

use std::path::PathBuf;

use gnssr_enkf::LandState;
use gnssr_enkf::enkf::{EnsembleKalmanFilter, NoiseCovariance};
use gnssr_enkf::observation::{ObservationConfig, ObservationModel, ObservationParams};
use gnssr_enkf::process::{ForcingRecord, ProcessModel};
use gnssr_enkf::sim::{
    AssimilationRecord, AssimilationSettings, ForcingDataRecord, ReflectivityRecord,
    generate_forcings, run_assimilation, run_synthetic_experiment,
};

use chrono::NaiveDate;
use nalgebra::DVector;

fn temp_csv(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

/// A full open-loop/closed-loop comparison: assimilating observations must beat
/// running the process model blind from a biased prior.
#[test]
fn closed_loop_beats_open_loop() {
    let days = 90;
    let seed = 42;
    let experiment = run_synthetic_experiment(days, 80, seed).expect("experiment runs");

    // Open loop: same biased prior mean, no observations ever.
    let process_model = ProcessModel::default();
    let start = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
    let forcing_records = generate_forcings(days, start, seed);
    let mut state = LandState::new(0.20, 0.8);
    let mut open_loop_sm_error = 0.0;
    for (record, truth_state) in forcing_records.iter().zip(experiment.truth.states.iter()) {
        let forcing = record.to_forcing().unwrap();
        state = process_model.step(&state, &forcing);
        open_loop_sm_error += (state.soil_moisture - truth_state.soil_moisture).abs();
    }
    open_loop_sm_error /= days as f64;

    assert!(
        experiment.mean_abs_sm_error < open_loop_sm_error,
        "closed loop {} should beat open loop {}",
        experiment.mean_abs_sm_error,
        open_loop_sm_error
    );
    assert!(experiment.mean_abs_sm_error < 0.04);
}

/// The whole daily cycle keeps every member inside the physical envelope, with
/// and without observations, across a wet season's worth of forcing.
#[test]
fn members_bounded_over_long_run() {
    let days = 120;
    let start = NaiveDate::from_ymd_opt(2021, 4, 1).unwrap();
    let forcings = generate_forcings(days, start, 3);
    // Sparse coverage: one observation every five days.
    let observations: Vec<ReflectivityRecord> = forcings
        .iter()
        .step_by(5)
        .map(|record| ReflectivityRecord {
            date: record.date.clone(),
            reflectivity: 0.1,
            incidence_angle_deg: 35.0,
        })
        .collect();
    let settings = AssimilationSettings {
        ensemble_size: 60,
        seed: 9,
        ..Default::default()
    };
    let results = run_assimilation(
        ProcessModel::default(),
        ObservationModel::new(ObservationConfig::new(0.3, 0.35)),
        &forcings,
        &observations,
        &settings,
    )
    .expect("assimilation runs");

    assert_eq!(results.len(), days);
    for record in &results {
        assert!((0.0..=0.45).contains(&record.sm_analysis));
        assert!((0.0..=2.5).contains(&record.vwc_analysis));
        assert!(record.sm_spread >= 0.0);
    }
    let assimilated = results.iter().filter(|r| r.assimilated).count();
    assert_eq!(assimilated, observations.len());
}

/// Two runs from the same seed are bit-identical end to end; changing the seed
/// changes the trajectory.
#[test]
fn runs_reproduce_per_seed() {
    let a = run_synthetic_experiment(30, 40, 7).expect("run a");
    let b = run_synthetic_experiment(30, 40, 7).expect("run b");
    let c = run_synthetic_experiment(30, 40, 8).expect("run c");
    for (x, y) in a.records.iter().zip(b.records.iter()) {
        assert_eq!(x.sm_analysis, y.sm_analysis);
        assert_eq!(x.vwc_analysis, y.vwc_analysis);
    }
    assert!(
        a.records
            .iter()
            .zip(c.records.iter())
            .any(|(x, y)| x.sm_analysis != y.sm_analysis)
    );
}

/// The CSV surface round-trips the full pipeline: write forcing and observation
/// series, read them back, assimilate, export, and re-read the results.
#[test]
fn csv_pipeline_roundtrip() {
    let start = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
    let forcings = generate_forcings(20, start, 5);
    let observations: Vec<ReflectivityRecord> = forcings
        .iter()
        .map(|record| ReflectivityRecord {
            date: record.date.clone(),
            reflectivity: 0.09,
            incidence_angle_deg: 40.0,
        })
        .collect();

    let forcing_path = temp_csv("gnssr_enkf_it_forcing.csv");
    let obs_path = temp_csv("gnssr_enkf_it_obs.csv");
    let out_path = temp_csv("gnssr_enkf_it_results.csv");
    ForcingDataRecord::to_csv(&forcings, &forcing_path).expect("write forcing");
    ReflectivityRecord::to_csv(&observations, &obs_path).expect("write observations");

    let forcings_read = ForcingDataRecord::from_csv(&forcing_path).expect("read forcing");
    let observations_read = ReflectivityRecord::from_csv(&obs_path).expect("read observations");
    assert_eq!(forcings_read.len(), forcings.len());

    let settings = AssimilationSettings {
        ensemble_size: 30,
        seed: 1,
        ..Default::default()
    };
    let results = run_assimilation(
        ProcessModel::default(),
        ObservationModel::default(),
        &forcings_read,
        &observations_read,
        &settings,
    )
    .expect("assimilation runs");
    AssimilationRecord::to_csv(&results, &out_path).expect("write results");
    let metadata = std::fs::metadata(&out_path).expect("results file exists");
    assert!(metadata.len() > 0);

    let _ = std::fs::remove_file(&forcing_path);
    let _ = std::fs::remove_file(&obs_path);
    let _ = std::fs::remove_file(&out_path);
}

/// Driving the filter directly through the boundary API: repeated analyses of a
/// fixed observation pull the predicted reflectivity toward it.
#[test]
fn repeated_analyses_converge_on_observation() {
    let observation_model = ObservationModel::new(ObservationConfig::new(0.45, 0.25));
    let params = ObservationParams::default();
    let truth = LandState::new(0.32, 1.4);
    let target = observation_model.predict(&truth, &params);

    let mut filter = EnsembleKalmanFilter::for_land_surface(
        ProcessModel::default(),
        ObservationModel::new(ObservationConfig::new(0.45, 0.25)),
        150,
        13,
    );
    filter
        .initialize(
            &DVector::from_vec(vec![0.22, 0.9]),
            &NoiseCovariance::diagonal(vec![0.03 * 0.03, 0.3 * 0.3]),
        )
        .unwrap();

    let q = NoiseCovariance::diagonal(vec![0.01 * 0.01, 0.05 * 0.05]);
    let r = NoiseCovariance::scalar(0.005 * 0.005);
    let forcing = ForcingRecord {
        precipitation: 0.0,
        pet: 0.0,
        temperature: 20.0,
        day_of_year: 160.0,
    };
    for _ in 0..10 {
        filter.forecast(&forcing, &q).unwrap();
        filter
            .analysis(&DVector::from_element(1, target), &r, &params)
            .unwrap();
    }
    let predicted = observation_model.run(filter.ensemble().unwrap(), &params);
    let predicted_mean = predicted.sum() / predicted.len() as f64;
    assert!(
        (predicted_mean - target).abs() < 0.01,
        "predicted {} vs target {}",
        predicted_mean,
        target
    );
}
