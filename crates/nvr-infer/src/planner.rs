use nvr_core::RatePair;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::estimator::{self, Estimate, EstimatorMethod};
use crate::grid::PosteriorGrid;
use crate::likelihood::LikelihoodModel;
use crate::model::ForwardModel;

/// Strategy used to choose the next wait time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMethod {
    /// `t = 0.5 / β⁺` at the current estimate.
    #[default]
    BetaPlusInverse,
    /// Local minimisation of the predicted `(σ₊² + σ₋²)·t_total`.
    ExpectedSensitivity,
}

/// Tuning of the expected-sensitivity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Initialisation plus readout time per single shot (s), added to every wait.
    #[serde(default = "default_shot_overhead")]
    pub shot_overhead_s: f64,
    /// Search stops once the step in ln t falls below this value.
    #[serde(default = "default_log_tolerance")]
    pub log_tolerance: f64,
    /// Maximum number of objective evaluations per plan.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    /// The search stays within this factor of the β⁺-inverse guess.
    #[serde(default = "default_search_span")]
    pub search_span: f64,
}

fn default_shot_overhead() -> f64 {
    5e-6
}

fn default_log_tolerance() -> f64 {
    0.05
}

fn default_max_evaluations() -> usize {
    32
}

fn default_search_span() -> f64 {
    20.0
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            shot_overhead_s: default_shot_overhead(),
            log_tolerance: default_log_tolerance(),
            max_evaluations: default_max_evaluations(),
            search_span: default_search_span(),
        }
    }
}

/// Everything the expected-sensitivity search needs to simulate one more iteration.
#[derive(Debug, Clone, Copy)]
pub struct PlanningContext<'a> {
    /// Current grid; cloned per candidate, never modified.
    pub grid: &'a PosteriorGrid,
    /// Forward model used to predict the next observation.
    pub model: &'a ForwardModel,
    /// Likelihood used for the predicted update.
    pub likelihood: LikelihoodModel,
    /// Estimator used to read σ off the predicted posterior.
    pub estimator: EstimatorMethod,
    /// Readouts the next iteration will request.
    pub readouts: u64,
    /// Experiment time already spent (s).
    pub elapsed_s: f64,
}

/// Wait time at which the fast eigenmode has decayed by `e^{-1/2}`.
pub fn beta_plus_inverse(rates: &RatePair) -> f64 {
    0.5 / rates.beta_plus()
}

/// Experiment time of one iteration: three variants of `readouts` shots each.
pub fn sequence_time(t: f64, readouts: u64, shot_overhead_s: f64) -> f64 {
    3.0 * readouts as f64 * (t + shot_overhead_s)
}

/// Chooses the next wait time from the current estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Planner {
    method: PlannerMethod,
    settings: PlannerSettings,
}

impl Planner {
    /// Creates a planner.
    pub fn new(method: PlannerMethod, settings: PlannerSettings) -> Self {
        Self { method, settings }
    }

    /// Configured method.
    pub fn method(&self) -> PlannerMethod {
        self.method
    }

    /// Returns a strictly positive wait time (s).
    pub fn plan(&self, estimate: &Estimate, context: &PlanningContext<'_>) -> f64 {
        let guess = self.initial_guess(estimate, context.grid);
        match self.method {
            PlannerMethod::BetaPlusInverse => guess,
            PlannerMethod::ExpectedSensitivity => self.minimise_sensitivity(estimate, context, guess),
        }
    }

    /// β⁺-inverse at the estimate, kept within the range spanned by the grid corners.
    pub fn initial_guess(&self, estimate: &Estimate, grid: &PosteriorGrid) -> f64 {
        let bounds = grid.bounds();
        let shortest = beta_plus_inverse(&RatePair::new(bounds.gamma_plus_max, bounds.gamma_minus_max));
        let longest = beta_plus_inverse(&RatePair::new(bounds.gamma_plus_min, bounds.gamma_minus_min));
        let rates = RatePair::new(
            estimate.gamma_plus.max(bounds.gamma_plus_min),
            estimate.gamma_minus.max(bounds.gamma_minus_min),
        );
        let t = beta_plus_inverse(&rates);
        if t.is_finite() {
            t.clamp(shortest, longest)
        } else {
            longest
        }
    }

    /// Predicted `(σ₊² + σ₋²)·t_total` after one more noise-free iteration at `t`.
    pub fn expected_sensitivity(
        &self,
        estimate: &Estimate,
        context: &PlanningContext<'_>,
        t: f64,
    ) -> f64 {
        let rates = estimate.rates();
        let (delta_plus, delta_minus) = context.model.expected_deltas(t, &rates);
        let mut trial = context.grid.clone();
        if trial
            .accumulate(
                context.model,
                context.likelihood,
                t,
                delta_plus,
                delta_minus,
                context.readouts,
            )
            .is_err()
        {
            return f64::INFINITY;
        }
        let Ok(posterior) = trial.posterior() else {
            return f64::INFINITY;
        };
        let predicted = estimator::reduce(&trial, &posterior, context.estimator);
        let total = context.elapsed_s
            + sequence_time(t, context.readouts, self.settings.shot_overhead_s);
        let spread = predicted.sigma_plus.powi(2) + predicted.sigma_minus.powi(2);
        let value = spread * total;
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    }

    /// Compass search in ln t starting from the β⁺-inverse guess.
    fn minimise_sensitivity(
        &self,
        estimate: &Estimate,
        context: &PlanningContext<'_>,
        guess: f64,
    ) -> f64 {
        let span = self.settings.search_span.max(1.0).ln();
        let (lo, hi) = (guess.ln() - span, guess.ln() + span);
        let objective = |u: f64| self.expected_sensitivity(estimate, context, u.exp());

        let mut best_u = guess.ln();
        let mut best = objective(best_u);
        let mut evaluations = 1;
        let mut step = std::f64::consts::LN_2;
        while step >= self.settings.log_tolerance && evaluations < self.settings.max_evaluations {
            let mut moved = false;
            for candidate in [best_u + step, best_u - step] {
                if candidate < lo || candidate > hi || evaluations >= self.settings.max_evaluations {
                    continue;
                }
                let value = objective(candidate);
                evaluations += 1;
                if value < best {
                    best = value;
                    best_u = candidate;
                    moved = true;
                    break;
                }
            }
            if !moved {
                step *= 0.5;
            }
        }
        let t = best_u.exp();
        debug!(
            guess_s = guess,
            planned_s = t,
            objective = best,
            evaluations,
            "expected-sensitivity search finished"
        );
        t
    }
}
