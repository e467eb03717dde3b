use ndarray::{Array2, Zip};
use nvr_core::{ErrorInfo, GridSpec, RatePair, RelaxError};
use serde::{Deserialize, Serialize};

use crate::likelihood::LikelihoodModel;
use crate::model::ForwardModel;

/// Prior shape over the declared rate bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    /// Constant density.
    #[default]
    Flat,
    /// Gaussian centred on the midpoint of the bounds, width = half-range per axis.
    Gaussian,
}

impl PriorKind {
    /// Unnormalised prior density at `rates` for the declared bounds.
    pub fn density(self, bounds: &GridSpec, rates: &RatePair) -> f64 {
        match self {
            PriorKind::Flat => 1.0,
            PriorKind::Gaussian => {
                let z = |x: f64, lo: f64, hi: f64| {
                    let centre = 0.5 * (lo + hi);
                    let width = 0.5 * (hi - lo);
                    (x - centre) / width
                };
                let zp = z(rates.gamma_plus, bounds.gamma_plus_min, bounds.gamma_plus_max);
                let zm = z(
                    rates.gamma_minus,
                    bounds.gamma_minus_min,
                    bounds.gamma_minus_max,
                );
                (-0.5 * (zp * zp + zm * zm)).exp()
            }
        }
    }
}

/// Strictly increasing, strictly positive grid axis with trapezoid weights.
#[derive(Debug, Clone, PartialEq)]
pub struct RateAxis {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl RateAxis {
    /// Evenly spaced axis of `n` points covering `[min, max]`.
    pub fn linspace(min: f64, max: f64, n: usize) -> Result<Self, RelaxError> {
        if n < 3 {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("axis-too-small", "an axis needs at least three points")
                    .with_context("n", n.to_string()),
            ));
        }
        let step = (max - min) / (n - 1) as f64;
        let mut values: Vec<f64> = (0..n).map(|k| min + step * k as f64).collect();
        values[n - 1] = max;
        Self::from_values(values)
    }

    /// Builds an axis from explicit node positions.
    pub fn from_values(values: Vec<f64>) -> Result<Self, RelaxError> {
        if values.len() < 3 {
            return Err(RelaxError::config(
                "axis-too-small",
                "an axis needs at least three points",
            ));
        }
        if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(RelaxError::config(
                "invalid-bounds",
                "axis values must be finite and positive",
            ));
        }
        if values.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(RelaxError::config(
                "non-monotonic-axis",
                "axis values must be strictly increasing",
            ));
        }
        let n = values.len();
        let weights = (0..n)
            .map(|k| {
                let left = if k > 0 { values[k] - values[k - 1] } else { 0.0 };
                let right = if k + 1 < n { values[k + 1] - values[k] } else { 0.0 };
                0.5 * (left + right)
            })
            .collect();
        Ok(Self { values, weights })
    }

    /// Node positions.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Trapezoid quadrature weights aligned with [`RateAxis::values`].
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; axes carry at least three nodes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First node.
    pub fn min(&self) -> f64 {
        self.values[0]
    }

    /// Last node.
    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// `max − min`.
    pub fn span(&self) -> f64 {
        self.max() - self.min()
    }

    /// Largest node spacing adjacent to the node nearest `x`.
    pub fn local_spacing(&self, x: f64) -> f64 {
        let (idx, _) = self.bracket(x);
        self.values[idx + 1] - self.values[idx]
    }

    /// Cell index `k` and fraction `f` such that `x ≈ v[k] + f·(v[k+1] − v[k])`.
    ///
    /// Points outside the axis are clamped to the end cells.
    pub fn bracket(&self, x: f64) -> (usize, f64) {
        let n = self.values.len();
        let upper = self.values.partition_point(|v| *v <= x);
        let k = upper.saturating_sub(1).min(n - 2);
        let (lo, hi) = (self.values[k], self.values[k + 1]);
        (k, ((x - lo) / (hi - lo)).clamp(0.0, 1.0))
    }
}

/// Two-dimensional rate grid carrying prior and accumulated log-likelihood.
///
/// Arrays are shaped `(n_minus, n_plus)`: row `i` is γ₋[i], column `j` is γ₊[j].
/// The accumulator `L` holds the summed negative log-likelihood and only ever grows
/// by addition until the grid is rediscretised.
#[derive(Debug, Clone)]
pub struct PosteriorGrid {
    bounds: GridSpec,
    prior_kind: PriorKind,
    plus: RateAxis,
    minus: RateAxis,
    prior: Array2<f64>,
    neg_log_likelihood: Array2<f64>,
}

impl PosteriorGrid {
    /// Allocates the grid over the declared bounds with `L ≡ 0`.
    pub fn new(bounds: &GridSpec, prior_kind: PriorKind) -> Result<Self, RelaxError> {
        bounds.validate()?;
        let plus = RateAxis::linspace(bounds.gamma_plus_min, bounds.gamma_plus_max, bounds.n_plus)?;
        let minus = RateAxis::linspace(
            bounds.gamma_minus_min,
            bounds.gamma_minus_max,
            bounds.n_minus,
        )?;
        let prior = evaluate_prior(prior_kind, bounds, &plus, &minus);
        let neg_log_likelihood = Array2::zeros((minus.len(), plus.len()));
        Ok(Self {
            bounds: bounds.clone(),
            prior_kind,
            plus,
            minus,
            prior,
            neg_log_likelihood,
        })
    }

    /// Declared bounds the grid may never leave.
    pub fn bounds(&self) -> &GridSpec {
        &self.bounds
    }

    /// Prior kind, fixed for the lifetime of the grid.
    pub fn prior_kind(&self) -> PriorKind {
        self.prior_kind
    }

    /// γ₊ axis.
    pub fn plus_axis(&self) -> &RateAxis {
        &self.plus
    }

    /// γ₋ axis.
    pub fn minus_axis(&self) -> &RateAxis {
        &self.minus
    }

    /// Prior evaluated on the current axes.
    pub fn prior(&self) -> &Array2<f64> {
        &self.prior
    }

    /// Accumulated negative log-likelihood `L`.
    pub fn log_likelihood(&self) -> &Array2<f64> {
        &self.neg_log_likelihood
    }

    /// Rate pair at grid cell `(i, j)`.
    pub fn rates_at(&self, i: usize, j: usize) -> RatePair {
        RatePair::new(self.plus.values()[j], self.minus.values()[i])
    }

    /// Whether cell `(i, j)` lies on the outer rim of the grid.
    pub fn is_boundary(&self, i: usize, j: usize) -> bool {
        i == 0 || j == 0 || i + 1 == self.minus.len() || j + 1 == self.plus.len()
    }

    /// Per-cell negative log-likelihood of one observation.
    pub fn log_likelihood_term(
        &self,
        model: &ForwardModel,
        likelihood: LikelihoodModel,
        t: f64,
        delta_plus: f64,
        delta_minus: f64,
        readouts: u64,
    ) -> Array2<f64> {
        let r = readouts as f64;
        let (dp, dm) = (r * delta_plus, r * delta_minus);
        Array2::from_shape_fn((self.minus.len(), self.plus.len()), |(i, j)| {
            let expected = model.expected_counts(t, &self.rates_at(i, j), r);
            likelihood.neg_log_likelihood(expected, dp, dm)
        })
    }

    /// Adds the contribution of one observation to `L`.
    ///
    /// Leaves `L` untouched and reports a numerical error if any cell is non-finite.
    pub fn accumulate(
        &mut self,
        model: &ForwardModel,
        likelihood: LikelihoodModel,
        t: f64,
        delta_plus: f64,
        delta_minus: f64,
        readouts: u64,
    ) -> Result<(), RelaxError> {
        let term = self.log_likelihood_term(model, likelihood, t, delta_plus, delta_minus, readouts);
        self.add_log_likelihood(&term).map_err(|err| match err {
            RelaxError::Numerical(info) => RelaxError::Numerical(
                info.with_value("t_probe_s", t)
                    .with_value("delta_plus", delta_plus)
                    .with_value("delta_minus", delta_minus),
            ),
            other => other,
        })
    }

    /// Adds an externally computed negative log-likelihood array to `L`.
    pub fn add_log_likelihood(&mut self, term: &Array2<f64>) -> Result<(), RelaxError> {
        if term.dim() != self.neg_log_likelihood.dim() {
            return Err(RelaxError::Configuration(
                ErrorInfo::new("shape-mismatch", "likelihood term does not match the grid")
                    .with_context("expected", format!("{:?}", self.neg_log_likelihood.dim()))
                    .with_context("found", format!("{:?}", term.dim())),
            ));
        }
        if let Some(bad) = term.iter().position(|v| !v.is_finite()) {
            let (i, j) = (bad / self.plus.len(), bad % self.plus.len());
            return Err(RelaxError::Numerical(
                ErrorInfo::new("non-finite-likelihood", "likelihood term is not finite")
                    .with_value("gamma_plus", self.plus.values()[j])
                    .with_value("gamma_minus", self.minus.values()[i]),
            ));
        }
        self.neg_log_likelihood += term;
        Ok(())
    }

    /// `Q = L − ln(prior)`, shifted so that its minimum is zero.
    pub fn neg_log_posterior(&self) -> Array2<f64> {
        let mut q = Array2::zeros(self.neg_log_likelihood.dim());
        Zip::from(&mut q)
            .and(&self.neg_log_likelihood)
            .and(&self.prior)
            .for_each(|q, &l, &p| *q = l - p.ln());
        let min = q.iter().copied().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            q.mapv_inplace(|v| v - min);
        }
        q
    }

    /// Posterior `exp(−L)·prior`, normalised to unit trapezoid integral.
    pub fn posterior(&self) -> Result<Array2<f64>, RelaxError> {
        let mut posterior = self.neg_log_posterior().mapv(|q| (-q).exp());
        let total = self.integrate(&posterior);
        if !total.is_finite() || total <= 0.0 || posterior.iter().any(|v| !v.is_finite()) {
            return Err(RelaxError::Numerical(
                ErrorInfo::new("degenerate-posterior", "posterior is non-finite or has no mass")
                    .with_value("integral", total),
            ));
        }
        posterior.mapv_inplace(|v| v / total);
        Ok(posterior)
    }

    /// Trapezoid integral of `f` over the grid.
    pub fn integrate(&self, f: &Array2<f64>) -> f64 {
        let wp = self.plus.weights();
        let wm = self.minus.weights();
        f.indexed_iter()
            .map(|((i, j), v)| wm[i] * wp[j] * v)
            .sum()
    }

    /// Differential entropy `−∫ P ln P` of a normalised posterior.
    pub fn entropy(&self, posterior: &Array2<f64>) -> f64 {
        let integrand = posterior.mapv(|p| if p > 0.0 { -p * p.ln() } else { 0.0 });
        self.integrate(&integrand)
    }

    /// Swaps in new axes and an interpolated accumulator; the prior is re-evaluated.
    pub(crate) fn replace_axes(
        &mut self,
        plus: RateAxis,
        minus: RateAxis,
        neg_log_likelihood: Array2<f64>,
    ) {
        self.prior = evaluate_prior(self.prior_kind, &self.bounds, &plus, &minus);
        self.plus = plus;
        self.minus = minus;
        self.neg_log_likelihood = neg_log_likelihood;
    }
}

fn evaluate_prior(
    kind: PriorKind,
    bounds: &GridSpec,
    plus: &RateAxis,
    minus: &RateAxis,
) -> Array2<f64> {
    Array2::from_shape_fn((minus.len(), plus.len()), |(i, j)| {
        kind.density(bounds, &RatePair::new(plus.values()[j], minus.values()[i]))
    })
}
