use std::time::Instant;

use nvr_core::{ErrorInfo, MeasurementPort, Observation, RelaxError};
use tracing::{debug, warn};

use crate::config::ProtocolConfig;
use crate::estimator::{self, Estimate};
use crate::grid::PosteriorGrid;
use crate::model::ForwardModel;
use crate::planner::{Planner, PlanningContext};
use crate::records::{HaltDiagnostics, IterationRecord, RecordLog};
use crate::rediscretise::rediscretise;

/// Adaptive T1 protocol: owns the grid and drives measure, update, estimate,
/// plan and rediscretise against an injected measurement port.
#[derive(Debug, Clone)]
pub struct Protocol {
    config: ProtocolConfig,
    model: ForwardModel,
    grid: PosteriorGrid,
    planner: Planner,
    estimate: Estimate,
    records: RecordLog,
    iteration: usize,
    cumulative_readouts: u64,
    pulse_sequence_time_s: f64,
    processing_time_s: f64,
    experiment_time_s: f64,
    halted: Option<HaltDiagnostics>,
}

struct Processed {
    estimate: Estimate,
    entropy: Option<f64>,
    rediscretised: bool,
}

impl Protocol {
    /// Validates the config, builds the grid and prior and reduces the prior to
    /// the initial estimate.
    pub fn new(config: ProtocolConfig) -> Result<Self, RelaxError> {
        config.validate()?;
        let model = ForwardModel::new(config.constants);
        let grid = PosteriorGrid::new(&config.grid, config.prior_kind)?;
        let estimate = Estimate::from_grid(&grid)?;
        let planner = Planner::new(config.planner_method, config.planner.clone());
        Ok(Self {
            config,
            model,
            grid,
            planner,
            estimate,
            records: RecordLog::new(),
            iteration: 0,
            cumulative_readouts: 0,
            pulse_sequence_time_s: 0.0,
            processing_time_s: 0.0,
            experiment_time_s: 0.0,
            halted: None,
        })
    }

    /// Configuration the protocol was built with.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Forward model in use.
    pub fn model(&self) -> &ForwardModel {
        &self.model
    }

    /// Current posterior grid.
    pub fn grid(&self) -> &PosteriorGrid {
        &self.grid
    }

    /// Current estimate; the prior reduction before the first iteration.
    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    /// Records of all completed iterations.
    pub fn records(&self) -> &RecordLog {
        &self.records
    }

    /// Consumes the protocol, keeping the records.
    pub fn into_records(self) -> RecordLog {
        self.records
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Diagnostics of the numerical failure that halted the run, if any.
    pub fn halted(&self) -> Option<&HaltDiagnostics> {
        self.halted.as_ref()
    }

    /// Changes the readouts requested from the next iteration on.
    pub fn set_readouts_per_iteration(&mut self, readouts: u64) -> Result<(), RelaxError> {
        if readouts == 0 {
            return Err(RelaxError::config(
                "zero-readouts",
                "readouts_per_iteration must be positive",
            ));
        }
        self.config.readouts_per_iteration = readouts;
        Ok(())
    }

    /// Wait time the next iteration will measure at.
    pub fn next_probe_time(&self) -> f64 {
        let context = PlanningContext {
            grid: &self.grid,
            model: &self.model,
            likelihood: self.config.likelihood_model,
            estimator: self.config.estimator_method,
            readouts: self.config.readouts_per_iteration,
            elapsed_s: self.experiment_time_s,
        };
        self.planner.plan(&self.estimate, &context)
    }

    /// Runs one iteration.
    ///
    /// A measurement failure leaves the protocol untouched and is returned to
    /// the caller. A numerical failure halts the protocol; every later call
    /// returns the halting error.
    pub fn step<P: MeasurementPort + ?Sized>(
        &mut self,
        port: &mut P,
    ) -> Result<&IterationRecord, RelaxError> {
        if let Some(halt) = &self.halted {
            return Err(halt.error.clone());
        }
        let index = self.iteration + 1;
        let t_probe = self.next_probe_time();
        let readouts = self.config.readouts_per_iteration;

        let started = Instant::now();
        let measured = port
            .measure(t_probe, readouts)
            .and_then(|obs| obs.validate().map(|()| obs));
        let pulse_s = started.elapsed().as_secs_f64();
        let obs = match measured {
            Ok(obs) => obs,
            Err(err) => {
                warn!(iteration = index, t_probe_s = t_probe, error = %err, "measurement failed");
                return Err(err);
            }
        };

        let started = Instant::now();
        let processed = match self.process(index, t_probe, &obs) {
            Ok(processed) => processed,
            Err(err) => return Err(self.halt(index, err, obs)),
        };
        let processing_s = started.elapsed().as_secs_f64();

        self.iteration = index;
        self.estimate = processed.estimate;
        self.cumulative_readouts += obs.readouts_consumed;
        self.pulse_sequence_time_s += pulse_s;
        self.processing_time_s += processing_s;
        self.experiment_time_s += obs.t_elapsed_s;

        let estimate = processed.estimate;
        debug!(
            iteration = index,
            t_probe_s = t_probe,
            gamma_plus = estimate.gamma_plus,
            gamma_minus = estimate.gamma_minus,
            sigma_plus = estimate.sigma_plus,
            sigma_minus = estimate.sigma_minus,
            correlation = estimate.correlation(),
            "iteration complete"
        );
        self.records.push(IterationRecord {
            iteration: index,
            t_probe_s: t_probe,
            gamma_plus_hat: estimate.gamma_plus,
            gamma_minus_hat: estimate.gamma_minus,
            sigma_plus: estimate.sigma_plus,
            sigma_minus: estimate.sigma_minus,
            cov_plus_minus: estimate.cov,
            cumulative_readouts: self.cumulative_readouts,
            pulse_sequence_time_s: self.pulse_sequence_time_s,
            processing_time_s: self.processing_time_s,
            experiment_time_s: self.experiment_time_s,
            posterior_entropy: processed.entropy,
            boundary_warning: estimate.boundary_warning,
            hessian_fallback: estimate.hessian_fallback,
            rediscretised: processed.rediscretised,
        });
        self.records.last().ok_or_else(|| {
            RelaxError::Numerical(ErrorInfo::new("missing-record", "record was not appended"))
        })
    }

    /// Runs `iterations` further iterations, stopping at the first error.
    pub fn run<P: MeasurementPort + ?Sized>(
        &mut self,
        port: &mut P,
        iterations: usize,
    ) -> Result<&RecordLog, RelaxError> {
        for _ in 0..iterations {
            self.step(port)?;
        }
        Ok(&self.records)
    }

    /// Steps while `keep_going` accepts the latest record, up to `max_iterations`.
    pub fn run_while<P, F>(
        &mut self,
        port: &mut P,
        max_iterations: usize,
        mut keep_going: F,
    ) -> Result<&RecordLog, RelaxError>
    where
        P: MeasurementPort + ?Sized,
        F: FnMut(&IterationRecord) -> bool,
    {
        for _ in 0..max_iterations {
            let record = self.step(port)?;
            if !keep_going(record) {
                break;
            }
        }
        Ok(&self.records)
    }

    fn process(
        &mut self,
        index: usize,
        t_probe: f64,
        obs: &Observation,
    ) -> Result<Processed, RelaxError> {
        self.grid.accumulate(
            &self.model,
            self.config.likelihood_model,
            t_probe,
            obs.delta_plus,
            obs.delta_minus,
            obs.readouts_consumed,
        )?;
        let posterior = self.grid.posterior()?;
        let estimate = estimator::reduce(&self.grid, &posterior, self.config.estimator_method);
        if estimate.boundary_warning {
            warn!(
                iteration = index,
                gamma_plus = estimate.gamma_plus,
                gamma_minus = estimate.gamma_minus,
                method = ?self.config.estimator_method,
                "posterior mode on grid boundary; using fallback variance"
            );
        }
        let entropy = self
            .config
            .compute_entropy
            .then(|| self.grid.entropy(&posterior));

        let rediscretised = self.config.rediscretise_schedule.contains(&index);
        if rediscretised {
            rediscretise(&mut self.grid, &estimate, self.config.rediscretise_k_sigma)?;
        }
        Ok(Processed {
            estimate,
            entropy,
            rediscretised,
        })
    }

    fn halt(&mut self, index: usize, err: RelaxError, obs: Observation) -> RelaxError {
        let accumulator = self.grid.log_likelihood();
        let (rows, cols) = accumulator.dim();
        let (lo, hi) = accumulator
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        warn!(
            iteration = index,
            log_likelihood_min = lo,
            log_likelihood_max = hi,
            error = %err,
            "numerical degeneracy; protocol halted"
        );
        self.halted = Some(HaltDiagnostics {
            iteration: index,
            error: err.clone(),
            log_likelihood_min: lo,
            log_likelihood_max: hi,
            log_likelihood_shape: [rows, cols],
            log_likelihood: accumulator.iter().copied().collect(),
            last_estimate: self.estimate,
            last_observation: Some(obs),
        });
        err
    }
}
