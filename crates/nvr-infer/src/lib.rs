#![deny(missing_docs)]
#![doc = "Adaptive Bayesian estimation of the two NV spin-relaxation rates: forward model, posterior grid, estimators, wait-time planner, grid zoom and the iteration driver."]

//! The engine is single-threaded and owns its grid. Measurements come in
//! through [`nvr_core::MeasurementPort`]; per-iteration statistics go out as
//! [`IterationRecord`]s.

/// YAML configuration schema and defaults.
pub mod config;
/// Iteration driver owning the grid and the record log.
pub mod driver;
/// Posterior reductions to a point estimate with covariance.
pub mod estimator;
/// Rate axes, prior and log-likelihood accumulator.
pub mod grid;
/// Noise models for the count differences.
pub mod likelihood;
/// Closed-form photoluminescence model.
pub mod model;
/// Wait-time selection.
pub mod planner;
/// Per-iteration records and their export.
pub mod records;
/// Zoom and reinterpolation of the rate grid.
pub mod rediscretise;
/// Synthetic Poisson measurement port.
pub mod simulate;

pub use config::ProtocolConfig;
pub use driver::Protocol;
pub use estimator::{Estimate, EstimatorMethod};
pub use grid::{PosteriorGrid, PriorKind, RateAxis};
pub use likelihood::LikelihoodModel;
pub use model::{ForwardModel, ModeCoefficients};
pub use planner::{Planner, PlannerMethod, PlannerSettings, PlanningContext};
pub use records::{HaltDiagnostics, IterationRecord, RecordLog};
pub use rediscretise::{rediscretise, zoom_window, Interval, ZoomWindow};
pub use simulate::SimulatedMeasurement;
