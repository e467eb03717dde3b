use std::collections::BTreeSet;

use nvr_core::{Constants, GridSpec, MeasurementPort, Observation, RatePair, RelaxError};
use nvr_infer::{ForwardModel, Protocol, ProtocolConfig, SimulatedMeasurement};

fn config() -> ProtocolConfig {
    let grid = GridSpec {
        gamma_plus_min: 10.0,
        gamma_plus_max: 150e3,
        n_plus: 40,
        gamma_minus_min: 10.0,
        gamma_minus_max: 150e3,
        n_minus: 40,
    };
    let mut config = ProtocolConfig::new(Constants::new(0.04, 0.1).unwrap(), grid);
    config.readouts_per_iteration = 1_000_000;
    config
}

fn port(config: &ProtocolConfig) -> SimulatedMeasurement {
    SimulatedMeasurement::new(
        RatePair::new(30e3, 60e3),
        ForwardModel::new(config.constants),
        42,
    )
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let mut bad = config();
    bad.grid.n_minus = 2;
    assert!(matches!(Protocol::new(bad), Err(RelaxError::Configuration(_))));
}

#[test]
fn first_probe_comes_from_the_prior_mean() {
    let protocol = Protocol::new(config()).unwrap();
    let estimate = protocol.estimate();
    let centre = 0.5 * (10.0 + 150e3);
    assert!((estimate.gamma_plus - centre).abs() < 1.0);
    assert!((estimate.gamma_minus - centre).abs() < 1.0);
    assert!(!estimate.boundary_warning);
    let t = protocol.next_probe_time();
    let expected = 0.5 / RatePair::new(centre, centre).beta_plus();
    assert!((t / expected - 1.0).abs() < 1e-6);
    assert_eq!(protocol.iteration(), 0);
    assert!(protocol.records().is_empty());
}

#[test]
fn records_accumulate_readouts_and_time() {
    let mut config = config();
    config.compute_entropy = true;
    config.rediscretise_schedule = BTreeSet::from([2]);
    let mut protocol = Protocol::new(config.clone()).unwrap();
    let mut port = port(&config);
    protocol.run(&mut port, 4).unwrap();

    let records = protocol.records().records();
    assert_eq!(records.len(), 4);
    for (k, record) in records.iter().enumerate() {
        assert_eq!(record.iteration, k + 1);
        assert_eq!(record.cumulative_readouts, 1_000_000 * (k as u64 + 1));
        assert!(record.t_probe_s > 0.0);
        assert!(record.posterior_entropy.is_some());
        assert_eq!(record.rediscretised, k + 1 == 2);
        assert!(record.sigma_plus >= 0.0 && record.sigma_minus >= 0.0);
        assert!(record.cov_plus_minus.abs() <= record.sigma_plus * record.sigma_minus * (1.0 + 1e-12));
    }
    for pair in records.windows(2) {
        assert!(pair[1].experiment_time_s > pair[0].experiment_time_s);
        assert!(pair[1].pulse_sequence_time_s >= pair[0].pulse_sequence_time_s);
        assert!(pair[1].processing_time_s >= pair[0].processing_time_s);
    }
    let entropies: Vec<f64> = records.iter().filter_map(|r| r.posterior_entropy).collect();
    assert!(entropies[3] < entropies[0]);
    assert!(protocol.grid().plus_axis().span() < 150e3 - 10.0);
}

#[test]
fn measurement_failure_discards_the_iteration() {
    let config = config();
    let mut protocol = Protocol::new(config.clone()).unwrap();
    let mut inner = port(&config);
    let mut calls = 0;
    let mut flaky = |t: f64, readouts: u64| {
        calls += 1;
        if calls == 2 {
            Err(RelaxError::measurement("instrument-timeout", "sequencer did not answer"))
        } else {
            inner.measure(t, readouts)
        }
    };

    protocol.step(&mut flaky).unwrap();
    let before = *protocol.estimate();
    let err = protocol.step(&mut flaky).unwrap_err();
    assert!(matches!(err, RelaxError::Measurement(_)));
    assert!(!err.is_fatal());
    assert_eq!(protocol.iteration(), 1);
    assert_eq!(protocol.records().len(), 1);
    assert_eq!(protocol.estimate(), &before);

    let record = protocol.step(&mut flaky).unwrap();
    assert_eq!(record.iteration, 2);
    assert_eq!(record.cumulative_readouts, 2_000_000);
}

#[test]
fn malformed_observations_are_measurement_errors() {
    let mut protocol = Protocol::new(config()).unwrap();
    let mut broken = |t: f64, readouts: u64| -> Result<Observation, RelaxError> {
        Ok(Observation {
            t_elapsed_s: t,
            delta_plus: f64::NAN,
            delta_minus: 0.0,
            sigma_delta_plus: 0.0,
            sigma_delta_minus: 0.0,
            correlation: 0.0,
            readouts_consumed: readouts,
        })
    };
    let err = protocol.step(&mut broken).unwrap_err();
    assert_eq!(err.info().code, "non-finite-observation");
    assert!(protocol.halted().is_none());
    assert!(protocol.records().is_empty());
}

#[test]
fn numerical_degeneracy_halts_the_run() {
    let mut protocol = Protocol::new(config()).unwrap();
    let mut overflowing = |t: f64, readouts: u64| -> Result<Observation, RelaxError> {
        Ok(Observation {
            t_elapsed_s: t,
            delta_plus: 1e300,
            delta_minus: 1e300,
            sigma_delta_plus: 1.0,
            sigma_delta_minus: 1.0,
            correlation: 0.0,
            readouts_consumed: readouts,
        })
    };
    let err = protocol.step(&mut overflowing).unwrap_err();
    assert!(matches!(err, RelaxError::Numerical(_)));
    assert!(err.is_fatal());

    let halt = protocol.halted().unwrap();
    assert_eq!(halt.iteration, 1);
    assert_eq!(halt.error, err);
    assert_eq!(halt.log_likelihood_min, 0.0);
    assert_eq!(halt.log_likelihood_shape, [40, 40]);
    assert_eq!(halt.log_likelihood.len(), 40 * 40);
    assert!(halt.log_likelihood.iter().all(|v| *v == 0.0));
    let json: serde_json::Value = serde_json::to_value(halt).unwrap();
    assert_eq!(json["log_likelihood"].as_array().map(Vec::len), Some(1600));
    assert_eq!(json["log_likelihood_shape"], serde_json::json!([40, 40]));
    assert_eq!(halt.last_observation.unwrap().delta_plus, 1e300);
    assert!(protocol.records().is_empty());
    assert!(protocol.grid().log_likelihood().iter().all(|v| *v == 0.0));

    let config = config();
    let mut healthy = port(&config);
    assert_eq!(protocol.step(&mut healthy).unwrap_err(), err);
}

#[test]
fn run_while_stops_when_asked() {
    let config = config();
    let mut protocol = Protocol::new(config.clone()).unwrap();
    let mut port = port(&config);
    let records = protocol
        .run_while(&mut port, 50, |record| record.sigma_plus > 8e3)
        .unwrap();
    let last = records.last().unwrap();
    assert!(records.len() < 50);
    assert!(last.sigma_plus <= 8e3);
    assert!(records.records()[..records.len() - 1]
        .iter()
        .all(|r| r.sigma_plus > 8e3));
}

#[test]
fn readout_count_can_change_between_iterations() {
    let config = config();
    let mut protocol = Protocol::new(config.clone()).unwrap();
    let mut port = port(&config);
    protocol.step(&mut port).unwrap();
    assert!(protocol.set_readouts_per_iteration(0).is_err());
    protocol.set_readouts_per_iteration(5_000_000).unwrap();
    let record = protocol.step(&mut port).unwrap();
    assert_eq!(record.cumulative_readouts, 6_000_000);
    assert_eq!(protocol.config().readouts_per_iteration, 5_000_000);
}
