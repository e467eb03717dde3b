#![deny(missing_docs)]
#![doc = "Core data types for NV spin-relaxation (T1) rate inference: physical constants, grid bounds, measurement observations and the injectable measurement port."]

use serde::{Deserialize, Serialize};

pub mod errors;
pub mod rng;

pub use errors::{ErrorInfo, RelaxError};
pub use rng::{derive_stream_seed, RngHandle};

/// Electron spin projection used to label initialisation and readout states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinState {
    /// ms = 0, the bright state.
    Zero,
    /// ms = +1.
    Plus,
    /// ms = -1.
    Minus,
}

impl SpinState {
    /// All three states in canonical order.
    pub const ALL: [SpinState; 3] = [SpinState::Zero, SpinState::Plus, SpinState::Minus];

    /// Row/column index of the state in the rate matrix.
    pub fn index(self) -> usize {
        match self {
            SpinState::Zero => 0,
            SpinState::Plus => 1,
            SpinState::Minus => 2,
        }
    }

    /// Short label used in tables and logs.
    pub fn label(self) -> &'static str {
        match self {
            SpinState::Zero => "0",
            SpinState::Plus => "+",
            SpinState::Minus => "-",
        }
    }
}

/// Optical constants of the NV readout. Immutable once validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constants {
    /// Mean photon count per single readout of the bright state.
    pub pl0: f64,
    /// Fractional contrast between bright and dark states, in (0, 1).
    pub contrast: f64,
}

impl Constants {
    /// Validates and builds the constants.
    pub fn new(pl0: f64, contrast: f64) -> Result<Self, RelaxError> {
        let constants = Self { pl0, contrast };
        constants.validate()?;
        Ok(constants)
    }

    /// Checks `pl0 > 0` and `0 < contrast < 1`.
    pub fn validate(&self) -> Result<(), RelaxError> {
        if !(self.pl0.is_finite() && self.pl0 > 0.0) {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("invalid-pl0", "baseline photon count must be positive")
                    .with_value("pl0", self.pl0),
            ));
        }
        if !(self.contrast > 0.0 && self.contrast < 1.0) {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("invalid-contrast", "contrast must lie strictly in (0, 1)")
                    .with_value("contrast", self.contrast),
            ));
        }
        Ok(())
    }
}

/// A pair of relaxation rates in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePair {
    /// Rate between ms = 0 and ms = +1.
    pub gamma_plus: f64,
    /// Rate between ms = 0 and ms = -1.
    pub gamma_minus: f64,
}

impl RatePair {
    /// Creates a new rate pair.
    pub fn new(gamma_plus: f64, gamma_minus: f64) -> Self {
        Self {
            gamma_plus,
            gamma_minus,
        }
    }

    /// G0 = sqrt(γ₊² + γ₋² − γ₊γ₋).
    pub fn g0(&self) -> f64 {
        let (p, m) = (self.gamma_plus, self.gamma_minus);
        (p * p + m * m - p * m).max(0.0).sqrt()
    }

    /// Decay rate of the fast eigenmode, γ₊ + γ₋ + G0.
    pub fn beta_plus(&self) -> f64 {
        self.gamma_plus + self.gamma_minus + self.g0()
    }

    /// Decay rate of the slow eigenmode, γ₊ + γ₋ − G0.
    pub fn beta_minus(&self) -> f64 {
        self.gamma_plus + self.gamma_minus - self.g0()
    }
}

/// Declared bounds and resolution of the rate grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Lower bound of the γ₊ axis (Hz).
    pub gamma_plus_min: f64,
    /// Upper bound of the γ₊ axis (Hz).
    pub gamma_plus_max: f64,
    /// Number of γ₊ grid points.
    pub n_plus: usize,
    /// Lower bound of the γ₋ axis (Hz).
    pub gamma_minus_min: f64,
    /// Upper bound of the γ₋ axis (Hz).
    pub gamma_minus_max: f64,
    /// Number of γ₋ grid points.
    pub n_minus: usize,
}

impl GridSpec {
    /// Validates positivity, ordering and sizes of both axes.
    pub fn validate(&self) -> Result<(), RelaxError> {
        check_axis(
            "gamma_plus",
            self.gamma_plus_min,
            self.gamma_plus_max,
            self.n_plus,
        )?;
        check_axis(
            "gamma_minus",
            self.gamma_minus_min,
            self.gamma_minus_max,
            self.n_minus,
        )
    }

    /// Returns true when the rate pair lies within the declared bounds.
    pub fn contains(&self, rates: &RatePair) -> bool {
        (self.gamma_plus_min..=self.gamma_plus_max).contains(&rates.gamma_plus)
            && (self.gamma_minus_min..=self.gamma_minus_max).contains(&rates.gamma_minus)
    }
}

fn check_axis(axis: &str, min: f64, max: f64, n: usize) -> Result<(), RelaxError> {
    if !(min.is_finite() && max.is_finite()) || min <= 0.0 {
        return Err(RelaxError::Configuration(
            ErrorInfo::new("invalid-bounds", "axis bounds must be finite and positive")
                .with_context("axis", axis)
                .with_value("min", min)
                .with_value("max", max),
        ));
    }
    if max <= min {
        return Err(RelaxError::Configuration(
            ErrorInfo::new("empty-axis", "axis maximum must exceed its minimum")
                .with_context("axis", axis)
                .with_value("min", min)
                .with_value("max", max),
        ));
    }
    if n < 3 {
        return Err(RelaxError::Configuration(
            ErrorInfo::new("axis-too-small", "each axis needs at least three points")
                .with_context("axis", axis)
                .with_context("n", n.to_string())
                .with_hint("use at least 16 points per axis"),
        ));
    }
    Ok(())
}

/// Result of one execution of the pulse sequence at a given wait time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Duration of the executed sequence as reported by the port (s).
    pub t_elapsed_s: f64,
    /// Mean count difference PL₀ − PL₊ per readout.
    pub delta_plus: f64,
    /// Mean count difference PL₀ − PL₋ per readout.
    pub delta_minus: f64,
    /// Standard error of `delta_plus`.
    pub sigma_delta_plus: f64,
    /// Standard error of `delta_minus`.
    pub sigma_delta_minus: f64,
    /// Correlation between the two differences, in [-1, 1].
    pub correlation: f64,
    /// Single-shot readouts actually performed per variant.
    pub readouts_consumed: u64,
}

impl Observation {
    /// Checks that the port returned usable numbers.
    pub fn validate(&self) -> Result<(), RelaxError> {
        let finite = [
            self.t_elapsed_s,
            self.delta_plus,
            self.delta_minus,
            self.sigma_delta_plus,
            self.sigma_delta_minus,
            self.correlation,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(RelaxError::Measurement(ErrorInfo::new(
                "non-finite-observation",
                "measurement returned non-finite values",
            )));
        }
        if self.readouts_consumed == 0 {
            return Err(RelaxError::Measurement(ErrorInfo::new(
                "no-readouts",
                "measurement consumed zero readouts",
            )));
        }
        if !(-1.0..=1.0).contains(&self.correlation) {
            return Err(RelaxError::Measurement(
                ErrorInfo::new("invalid-correlation", "correlation must lie in [-1, 1]")
                    .with_value("correlation", self.correlation),
            ));
        }
        Ok(())
    }
}

/// Port through which the protocol engine executes pulse sequences.
///
/// Implementations may block for as long as the hardware needs. Failures are
/// returned as [`RelaxError::Measurement`]; the engine never retries.
pub trait MeasurementPort {
    /// Runs the sequence at wait time `t_probe` (s) with `readouts` shots per variant.
    fn measure(&mut self, t_probe: f64, readouts: u64) -> Result<Observation, RelaxError>;
}

impl<F> MeasurementPort for F
where
    F: FnMut(f64, u64) -> Result<Observation, RelaxError>,
{
    fn measure(&mut self, t_probe: f64, readouts: u64) -> Result<Observation, RelaxError> {
        self(t_probe, readouts)
    }
}
