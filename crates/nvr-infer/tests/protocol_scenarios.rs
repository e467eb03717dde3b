use std::collections::BTreeSet;

use nvr_core::{Constants, GridSpec, RatePair};
use nvr_infer::{
    EstimatorMethod, ForwardModel, PlannerMethod, PriorKind, Protocol, ProtocolConfig,
    SimulatedMeasurement,
};

const SEED: u64 = 42;

fn base_config(points: usize, readouts: u64) -> ProtocolConfig {
    let grid = GridSpec {
        gamma_plus_min: 0.01e3,
        gamma_plus_max: 150e3,
        n_plus: points,
        gamma_minus_min: 0.01e3,
        gamma_minus_max: 150e3,
        n_minus: points,
    };
    let mut config = ProtocolConfig::new(Constants::new(0.04, 0.1).unwrap(), grid);
    config.estimator_method = EstimatorMethod::Mixed;
    config.planner_method = PlannerMethod::BetaPlusInverse;
    config.readouts_per_iteration = readouts;
    config
}

fn run(config: ProtocolConfig, truth: RatePair, iterations: usize) -> Protocol {
    let mut port = SimulatedMeasurement::new(truth, ForwardModel::new(config.constants), SEED);
    let mut protocol = Protocol::new(config).unwrap();
    protocol.run(&mut port, iterations).unwrap();
    protocol
}

fn relative_error(estimate: f64, truth: f64) -> f64 {
    (estimate - truth).abs() / truth
}

#[test]
fn flat_prior_converges_to_the_truth() {
    let truth = RatePair::new(30e3, 60e3);
    let protocol = run(base_config(150, 10_000_000), truth, 20);
    let records = protocol.records().records();
    assert_eq!(records.len(), 20);

    let last = &records[19];
    assert!(relative_error(last.gamma_plus_hat, truth.gamma_plus) < 0.15, "{last:?}");
    assert!(relative_error(last.gamma_minus_hat, truth.gamma_minus) < 0.15, "{last:?}");
    assert!(records[5..].iter().all(|r| !r.boundary_warning));
    assert!(last.sigma_plus < records[0].sigma_plus);
    assert!(last.sigma_minus < records[0].sigma_minus);
}

#[test]
fn rediscretisation_refines_resolution_without_losing_the_estimate() {
    let truth = RatePair::new(30e3, 60e3);
    let plain = run(base_config(150, 10_000_000), truth, 20);

    let mut config = base_config(150, 10_000_000);
    config.rediscretise_schedule = BTreeSet::from([3, 6, 10, 15]);
    config.rediscretise_k_sigma = 5.0;
    let zoomed = run(config, truth, 20);

    let records = zoomed.records().records();
    let flagged: Vec<usize> = records
        .iter()
        .filter(|r| r.rediscretised)
        .map(|r| r.iteration)
        .collect();
    assert_eq!(flagged, vec![3, 6, 10, 15]);

    let last = &records[19];
    assert!(relative_error(last.gamma_plus_hat, truth.gamma_plus) < 0.15, "{last:?}");
    assert!(relative_error(last.gamma_minus_hat, truth.gamma_minus) < 0.15, "{last:?}");

    let grid = zoomed.grid();
    let original_spacing = (150e3 - 0.01e3) / 149.0;
    let spacing = grid.plus_axis().span() / 149.0;
    assert!(spacing * 2.0 <= original_spacing);
    assert!(grid.plus_axis().min() >= 0.01e3 && grid.plus_axis().max() <= 150e3);
    assert!(grid.minus_axis().min() >= 0.01e3 && grid.minus_axis().max() <= 150e3);

    let reference = plain.records().last().unwrap();
    assert!(last.sigma_plus <= 2.0 * reference.sigma_plus);
    assert!(last.sigma_minus <= 2.0 * reference.sigma_minus);
}

#[test]
fn expected_sensitivity_planner_is_no_worse() {
    let truth = RatePair::new(30e3, 60e3);
    let baseline = run(base_config(60, 10_000_000), truth, 20);

    let mut config = base_config(60, 10_000_000);
    config.planner_method = PlannerMethod::ExpectedSensitivity;
    let planned = run(config, truth, 20);

    let base = baseline.records().last().unwrap();
    let tuned = planned.records().last().unwrap();
    assert!(relative_error(tuned.gamma_plus_hat, truth.gamma_plus) < 0.15);
    assert!(relative_error(tuned.gamma_minus_hat, truth.gamma_minus) < 0.15);
    let product = |r: &nvr_infer::IterationRecord| r.sigma_plus * r.sigma_minus;
    assert!(
        product(tuned) <= 1.25 * product(base),
        "{} > {}",
        product(tuned),
        product(base)
    );
}

#[test]
fn boundary_truth_flags_early_and_clears_later() {
    // On a 30-node axis the first cell spans about 5.2 kHz, so γ₊ = 1 kHz maps to the rim.
    let truth = RatePair::new(1e3, 60e3);
    let mut config = base_config(30, 100_000_000);
    config.prior_kind = PriorKind::Gaussian;
    config.rediscretise_schedule = BTreeSet::from([3, 6, 9, 12]);
    let first_cell = (150e3 - 0.01e3) / 29.0;

    let protocol = run(config, truth, 30);
    let records = protocol.records().records();
    assert_eq!(records.len(), 30);

    for early in &records[1..3] {
        assert!(early.boundary_warning, "{early:?}");
        assert!(early.gamma_plus_hat < first_cell, "{early:?}");
        assert!(early.sigma_plus >= first_cell * (1.0 - 1e-9), "{early:?}");
    }
    let last = &records[29];
    assert!(records[..5]
        .iter()
        .filter(|r| r.boundary_warning)
        .all(|r| r.sigma_plus > last.sigma_plus));

    assert!(records[25..].iter().all(|r| !r.boundary_warning));
    assert!((last.gamma_plus_hat - truth.gamma_plus).abs() < 1e3, "{last:?}");
}
