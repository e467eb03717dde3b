use ndarray::Array2;
use nvr_core::RatePair;
use serde::{Deserialize, Serialize};

use crate::grid::PosteriorGrid;

/// Strategy used to reduce the posterior to a point estimate and covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMethod {
    /// Posterior mean and covariance by trapezoid integration.
    Integral,
    /// Grid MAP refined by a local quadratic fit; covariance is the inverse Hessian.
    Parabola,
    /// Parabola in the interior; integral spread about the MAP on the rim, at least
    /// one edge cell wide.
    #[default]
    Mixed,
    /// Parabola in the interior; half the axis span as σ on the rim.
    BoundaryWide,
    /// MAP point estimate with the integral spread about it.
    MapThenIntegralCov,
}

/// Point estimate with uncertainty and diagnostic flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Estimated γ₊ (Hz).
    pub gamma_plus: f64,
    /// Estimated γ₋ (Hz).
    pub gamma_minus: f64,
    /// Standard deviation of γ₊ (Hz).
    pub sigma_plus: f64,
    /// Standard deviation of γ₋ (Hz).
    pub sigma_minus: f64,
    /// Covariance of γ₊ and γ₋ (Hz²).
    pub cov: f64,
    /// The grid MAP lies on the outer rim; the variance came from a fallback rule.
    pub boundary_warning: bool,
    /// The local Hessian was not positive definite; the variance came from integration.
    pub hessian_fallback: bool,
}

impl Estimate {
    /// Point estimate as a rate pair.
    pub fn rates(&self) -> RatePair {
        RatePair::new(self.gamma_plus, self.gamma_minus)
    }

    /// Correlation coefficient, zero when either σ vanishes.
    pub fn correlation(&self) -> f64 {
        let denom = self.sigma_plus * self.sigma_minus;
        if denom > 0.0 {
            self.cov / denom
        } else {
            0.0
        }
    }

    /// Integral reduction of the grid's current posterior (prior only before any data).
    pub fn from_grid(grid: &PosteriorGrid) -> Result<Self, nvr_core::RelaxError> {
        let posterior = grid.posterior()?;
        let moments = integral_moments(grid, &posterior, None);
        Ok(moments.into_estimate(false, false))
    }
}

/// First and second moments of the posterior about a centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    /// Centre along γ₊.
    pub centre_plus: f64,
    /// Centre along γ₋.
    pub centre_minus: f64,
    /// `∫(γ₊ − centre)²P`.
    pub var_plus: f64,
    /// `∫(γ₋ − centre)²P`.
    pub var_minus: f64,
    /// `∫(γ₊ − centre)(γ₋ − centre)P`.
    pub cov: f64,
}

impl Moments {
    fn into_estimate(self, boundary_warning: bool, hessian_fallback: bool) -> Estimate {
        let sigma_plus = self.var_plus.max(0.0).sqrt();
        let sigma_minus = self.var_minus.max(0.0).sqrt();
        Estimate {
            gamma_plus: self.centre_plus,
            gamma_minus: self.centre_minus,
            sigma_plus,
            sigma_minus,
            cov: clamp_cov(self.cov, sigma_plus, sigma_minus),
            boundary_warning,
            hessian_fallback,
        }
    }
}

/// Moments about `centre`, or about the posterior mean when `centre` is `None`.
pub fn integral_moments(
    grid: &PosteriorGrid,
    posterior: &Array2<f64>,
    centre: Option<RatePair>,
) -> Moments {
    let xs = grid.plus_axis().values();
    let ys = grid.minus_axis().values();
    let weighted = |f: &dyn Fn(f64, f64) -> f64| {
        let integrand = Array2::from_shape_fn(posterior.dim(), |(i, j)| {
            f(xs[j], ys[i]) * posterior[[i, j]]
        });
        grid.integrate(&integrand)
    };
    let centre = centre.unwrap_or_else(|| RatePair::new(weighted(&|x, _| x), weighted(&|_, y| y)));
    let (cx, cy) = (centre.gamma_plus, centre.gamma_minus);
    Moments {
        centre_plus: cx,
        centre_minus: cy,
        var_plus: weighted(&|x, _| (x - cx).powi(2)),
        var_minus: weighted(&|_, y| (y - cy).powi(2)),
        cov: weighted(&|x, y| (x - cx) * (y - cy)),
    }
}

/// Index `(i, j)` of the smallest entry; ties resolve to the first in row-major order.
pub fn map_index(neg_log_posterior: &Array2<f64>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_value = f64::INFINITY;
    for ((i, j), &v) in neg_log_posterior.indexed_iter() {
        if v < best_value {
            best_value = v;
            best = (i, j);
        }
    }
    best
}

/// Local quadratic model of `Q = −ln P` around the grid MAP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolaFit {
    /// MAP cell `(i, j)`.
    pub map_index: (usize, usize),
    /// Cell at which the finite differences were evaluated (shifted off the rim).
    pub eval_index: (usize, usize),
    /// Rates at the MAP cell.
    pub map: RatePair,
    /// Hessian `[[A, C], [C, B]]` in (γ₊, γ₋).
    pub hessian: [[f64; 2]; 2],
    /// Gradient at the evaluation cell.
    pub gradient: [f64; 2],
}

impl ParabolaFit {
    /// `AB − C²`.
    pub fn determinant(&self) -> f64 {
        let [[a, c], [_, b]] = self.hessian;
        a * b - c * c
    }

    /// Inverse Hessian when it is positive definite.
    pub fn covariance(&self) -> Option<[[f64; 2]; 2]> {
        let [[a, c], [_, b]] = self.hessian;
        let det = self.determinant();
        if !(det > 0.0 && a > 0.0 && det.is_finite()) {
            return None;
        }
        Some([[b / det, -c / det], [-c / det, a / det]])
    }

    /// Vertex of the quadratic model, kept within one cell of the evaluation point.
    pub fn vertex(&self, grid: &PosteriorGrid) -> Option<RatePair> {
        let cov = self.covariance()?;
        let (i, j) = self.eval_index;
        let xs = grid.plus_axis().values();
        let ys = grid.minus_axis().values();
        let [gx, gy] = self.gradient;
        let dx = -(cov[0][0] * gx + cov[0][1] * gy);
        let dy = -(cov[1][0] * gx + cov[1][1] * gy);
        Some(RatePair::new(
            (xs[j] + dx).clamp(xs[j - 1], xs[j + 1]),
            (ys[i] + dy).clamp(ys[i - 1], ys[i + 1]),
        ))
    }
}

/// Fits the local quadratic around the MAP of `q`.
pub fn fit_parabola(grid: &PosteriorGrid, q: &Array2<f64>) -> ParabolaFit {
    let (mi, mj) = map_index(q);
    let (nm, np) = q.dim();
    let i = mi.clamp(1, nm - 2);
    let j = mj.clamp(1, np - 2);
    let xs = grid.plus_axis().values();
    let ys = grid.minus_axis().values();

    let (hx_lo, hx_hi) = (xs[j] - xs[j - 1], xs[j + 1] - xs[j]);
    let (hy_lo, hy_hi) = (ys[i] - ys[i - 1], ys[i + 1] - ys[i]);
    let q0 = q[[i, j]];
    let (qx_lo, qx_hi) = (q[[i, j - 1]], q[[i, j + 1]]);
    let (qy_lo, qy_hi) = (q[[i - 1, j]], q[[i + 1, j]]);

    let second = |lo: f64, hi: f64, h_lo: f64, h_hi: f64| {
        2.0 * ((hi - q0) / h_hi - (q0 - lo) / h_lo) / (h_lo + h_hi)
    };
    let first = |lo: f64, hi: f64, h_lo: f64, h_hi: f64| {
        ((hi - q0) * h_lo / h_hi + (q0 - lo) * h_hi / h_lo) / (h_lo + h_hi)
    };
    let a = second(qx_lo, qx_hi, hx_lo, hx_hi);
    let b = second(qy_lo, qy_hi, hy_lo, hy_hi);
    let c = (q[[i + 1, j + 1]] - q[[i + 1, j - 1]] - q[[i - 1, j + 1]] + q[[i - 1, j - 1]])
        / ((hx_lo + hx_hi) * (hy_lo + hy_hi));

    ParabolaFit {
        map_index: (mi, mj),
        eval_index: (i, j),
        map: grid.rates_at(mi, mj),
        hessian: [[a, c], [c, b]],
        gradient: [
            first(qx_lo, qx_hi, hx_lo, hx_hi),
            first(qy_lo, qy_hi, hy_lo, hy_hi),
        ],
    }
}

/// Reduces the grid posterior with the requested method.
pub fn reduce(grid: &PosteriorGrid, posterior: &Array2<f64>, method: EstimatorMethod) -> Estimate {
    let q = grid.neg_log_posterior();
    let fit = fit_parabola(grid, &q);
    let (mi, mj) = fit.map_index;
    let on_rim = grid.is_boundary(mi, mj);

    match method {
        EstimatorMethod::Integral => integral_moments(grid, posterior, None).into_estimate(on_rim, false),
        EstimatorMethod::MapThenIntegralCov => {
            let centre = if on_rim {
                fit.map
            } else {
                fit.vertex(grid).unwrap_or(fit.map)
            };
            integral_moments(grid, posterior, Some(centre)).into_estimate(on_rim, false)
        }
        EstimatorMethod::Parabola => parabola_estimate(grid, posterior, &fit, on_rim),
        EstimatorMethod::Mixed => {
            if on_rim {
                let spread = integral_moments(grid, posterior, Some(fit.map)).into_estimate(true, false);
                floor_to_rim_cell(grid, fit.map_index, spread)
            } else {
                parabola_estimate(grid, posterior, &fit, false)
            }
        }
        EstimatorMethod::BoundaryWide => {
            if on_rim {
                Estimate {
                    gamma_plus: fit.map.gamma_plus,
                    gamma_minus: fit.map.gamma_minus,
                    sigma_plus: 0.5 * grid.plus_axis().span(),
                    sigma_minus: 0.5 * grid.minus_axis().span(),
                    cov: 0.0,
                    boundary_warning: true,
                    hessian_fallback: false,
                }
            } else {
                parabola_estimate(grid, posterior, &fit, false)
            }
        }
    }
}

fn parabola_estimate(
    grid: &PosteriorGrid,
    posterior: &Array2<f64>,
    fit: &ParabolaFit,
    boundary_warning: bool,
) -> Estimate {
    let Some(cov) = fit.covariance() else {
        let spread = integral_moments(grid, posterior, Some(fit.map)).into_estimate(boundary_warning, true);
        return if boundary_warning {
            floor_to_rim_cell(grid, fit.map_index, spread)
        } else {
            spread
        };
    };
    let centre = if boundary_warning {
        fit.map
    } else {
        fit.vertex(grid).unwrap_or(fit.map)
    };

    let mut var_plus = cov[0][0];
    let mut var_minus = cov[1][1];
    let negative = !(var_plus >= 0.0 && var_minus >= 0.0);
    if negative || boundary_warning {
        let fallback = integral_moments(grid, posterior, Some(centre));
        // On the rim the curvature is taken one cell inward and may understate the spread.
        if boundary_warning || !(var_plus >= 0.0) {
            var_plus = var_plus.max(fallback.var_plus);
        }
        if boundary_warning || !(var_minus >= 0.0) {
            var_minus = var_minus.max(fallback.var_minus);
        }
    }
    let estimate = Moments {
        centre_plus: centre.gamma_plus,
        centre_minus: centre.gamma_minus,
        var_plus,
        var_minus,
        cov: cov[0][1],
    }
    .into_estimate(boundary_warning, false);
    if boundary_warning {
        floor_to_rim_cell(grid, fit.map_index, estimate)
    } else {
        estimate
    }
}

/// A mode on the rim is only located to within its edge cell, so σ along a rim
/// axis is at least that cell's width.
fn floor_to_rim_cell(
    grid: &PosteriorGrid,
    (mi, mj): (usize, usize),
    mut estimate: Estimate,
) -> Estimate {
    let plus = grid.plus_axis();
    let minus = grid.minus_axis();
    if mj == 0 || mj + 1 == plus.len() {
        estimate.sigma_plus = estimate
            .sigma_plus
            .max(plus.local_spacing(plus.values()[mj]));
    }
    if mi == 0 || mi + 1 == minus.len() {
        estimate.sigma_minus = estimate
            .sigma_minus
            .max(minus.local_spacing(minus.values()[mi]));
    }
    estimate.cov = clamp_cov(estimate.cov, estimate.sigma_plus, estimate.sigma_minus);
    estimate
}

fn clamp_cov(cov: f64, sigma_plus: f64, sigma_minus: f64) -> f64 {
    let limit = sigma_plus * sigma_minus;
    if cov.is_finite() {
        cov.clamp(-limit, limit)
    } else {
        0.0
    }
}
