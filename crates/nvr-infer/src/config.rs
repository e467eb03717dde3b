use std::collections::BTreeSet;

use nvr_core::{Constants, ErrorInfo, GridSpec, RelaxError};
use serde::{Deserialize, Serialize};

use crate::estimator::EstimatorMethod;
use crate::grid::PriorKind;
use crate::likelihood::LikelihoodModel;
use crate::planner::{PlannerMethod, PlannerSettings};

/// YAML-configurable parameters of a protocol run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Optical constants of the NV.
    pub constants: Constants,
    /// Declared rate bounds and grid resolution.
    pub grid: GridSpec,
    /// Prior shape over the declared bounds.
    #[serde(default)]
    pub prior_kind: PriorKind,
    /// Posterior reduction strategy.
    #[serde(default)]
    pub estimator_method: EstimatorMethod,
    /// Wait-time selection strategy.
    #[serde(default)]
    pub planner_method: PlannerMethod,
    /// Tuning of the expected-sensitivity planner.
    #[serde(default)]
    pub planner: PlannerSettings,
    /// Noise model of the count differences.
    #[serde(default)]
    pub likelihood_model: LikelihoodModel,
    /// Single-shot readouts requested per variant and iteration.
    #[serde(default = "default_readouts")]
    pub readouts_per_iteration: u64,
    /// 1-based iteration indices after which the grid is zoomed.
    #[serde(default)]
    pub rediscretise_schedule: BTreeSet<usize>,
    /// Half-width of the zoom window in posterior standard deviations.
    #[serde(default = "default_k_sigma")]
    pub rediscretise_k_sigma: f64,
    /// Record the posterior entropy every iteration.
    #[serde(default)]
    pub compute_entropy: bool,
}

fn default_readouts() -> u64 {
    1_000
}

fn default_k_sigma() -> f64 {
    5.0
}

impl ProtocolConfig {
    /// Config with defaults for everything but the constants and grid.
    pub fn new(constants: Constants, grid: GridSpec) -> Self {
        Self {
            constants,
            grid,
            prior_kind: PriorKind::default(),
            estimator_method: EstimatorMethod::default(),
            planner_method: PlannerMethod::default(),
            planner: PlannerSettings::default(),
            likelihood_model: LikelihoodModel::default(),
            readouts_per_iteration: default_readouts(),
            rediscretise_schedule: BTreeSet::new(),
            rediscretise_k_sigma: default_k_sigma(),
            compute_entropy: false,
        }
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, RelaxError> {
        let config: Self = serde_yaml::from_str(text).map_err(|err| {
            RelaxError::Configuration(
                ErrorInfo::new("config-parse", err.to_string())
                    .with_hint("check option names and enum values"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises the config to YAML.
    pub fn to_yaml_string(&self) -> Result<String, RelaxError> {
        serde_yaml::to_string(self)
            .map_err(|err| RelaxError::Serde(ErrorInfo::new("config-serialize", err.to_string())))
    }

    /// Checks every option; all failures are configuration errors.
    pub fn validate(&self) -> Result<(), RelaxError> {
        self.constants.validate()?;
        self.grid.validate()?;
        if self.readouts_per_iteration == 0 {
            return Err(RelaxError::config(
                "zero-readouts",
                "readouts_per_iteration must be positive",
            ));
        }
        if !(self.rediscretise_k_sigma.is_finite() && self.rediscretise_k_sigma > 0.0) {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("invalid-k-sigma", "rediscretise_k_sigma must be positive")
                    .with_value("k_sigma", self.rediscretise_k_sigma),
            ));
        }
        if self.rediscretise_schedule.contains(&0) {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("invalid-schedule", "iterations are numbered from 1")
                    .with_hint("remove 0 from rediscretise_schedule"),
            ));
        }
        let planner = &self.planner;
        if !(planner.shot_overhead_s.is_finite() && planner.shot_overhead_s >= 0.0) {
            return Err(RelaxError::config(
                "invalid-shot-overhead",
                "planner.shot_overhead_s must be finite and non-negative",
            ));
        }
        if !(planner.log_tolerance > 0.0) || planner.max_evaluations == 0 {
            return Err(RelaxError::config(
                "invalid-planner-search",
                "planner search needs a positive tolerance and evaluation budget",
            ));
        }
        Ok(())
    }
}
