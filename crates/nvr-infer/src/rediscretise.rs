use ndarray::Array2;
use nvr_core::RelaxError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::estimator::Estimate;
use crate::grid::{PosteriorGrid, RateAxis};

/// Inclusive rate interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower edge (Hz).
    pub lo: f64,
    /// Upper edge (Hz).
    pub hi: f64,
}

impl Interval {
    /// `hi − lo`.
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

/// Zoom window chosen for the next grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomWindow {
    /// γ₊ range.
    pub plus: Interval,
    /// γ₋ range.
    pub minus: Interval,
}

fn window_along(axis: &RateAxis, centre: f64, sigma: f64, k_sigma: f64, lo: f64, hi: f64) -> Interval {
    let spacing = axis.local_spacing(centre);
    let half = (k_sigma * sigma).max(2.0 * spacing);
    let centre = centre.clamp(lo, hi);
    let mut window = Interval {
        lo: (centre - half).max(lo),
        hi: (centre + half).min(hi),
    };
    // Clipping at a bound must not leave fewer than four current cells.
    let min_width = (4.0 * spacing).min(hi - lo);
    if window.width() < min_width {
        if window.lo <= lo {
            window.hi = (lo + min_width).min(hi);
        } else {
            window.lo = (hi - min_width).max(lo);
        }
    }
    window
}

/// Window of half-width `k_sigma·σ` around the estimate, clipped to the declared bounds.
///
/// The window may reach past the current axes; the accumulated log-likelihood is
/// then held at its edge value outside them.
pub fn zoom_window(grid: &PosteriorGrid, estimate: &Estimate, k_sigma: f64) -> ZoomWindow {
    let bounds = grid.bounds();
    ZoomWindow {
        plus: window_along(
            grid.plus_axis(),
            estimate.gamma_plus,
            estimate.sigma_plus,
            k_sigma,
            bounds.gamma_plus_min,
            bounds.gamma_plus_max,
        ),
        minus: window_along(
            grid.minus_axis(),
            estimate.gamma_minus,
            estimate.sigma_minus,
            k_sigma,
            bounds.gamma_minus_min,
            bounds.gamma_minus_max,
        ),
    }
}

/// Bilinear interpolation of `values` (shaped `(ys.len(), xs.len())`) at `(x, y)`.
pub fn bilinear(xs: &RateAxis, ys: &RateAxis, values: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (j, fx) = xs.bracket(x);
    let (i, fy) = ys.bracket(y);
    let v00 = values[[i, j]];
    let v01 = values[[i, j + 1]];
    let v10 = values[[i + 1, j]];
    let v11 = values[[i + 1, j + 1]];
    (1.0 - fy) * ((1.0 - fx) * v00 + fx * v01) + fy * ((1.0 - fx) * v10 + fx * v11)
}

/// Zooms the grid onto the estimate, keeping the axis sizes.
///
/// The accumulated log-likelihood is interpolated onto the new nodes; the prior
/// is re-evaluated there and the posterior follows from both.
pub fn rediscretise(
    grid: &mut PosteriorGrid,
    estimate: &Estimate,
    k_sigma: f64,
) -> Result<ZoomWindow, RelaxError> {
    let window = zoom_window(grid, estimate, k_sigma);
    let plus = RateAxis::linspace(window.plus.lo, window.plus.hi, grid.plus_axis().len())?;
    let minus = RateAxis::linspace(window.minus.lo, window.minus.hi, grid.minus_axis().len())?;

    let old_l = grid.log_likelihood();
    let new_l = Array2::from_shape_fn((minus.len(), plus.len()), |(i, j)| {
        bilinear(
            grid.plus_axis(),
            grid.minus_axis(),
            old_l,
            plus.values()[j],
            minus.values()[i],
        )
    });

    info!(
        plus_lo = window.plus.lo,
        plus_hi = window.plus.hi,
        minus_lo = window.minus.lo,
        minus_hi = window.minus.hi,
        k_sigma,
        "rediscretised rate grid"
    );
    grid.replace_axes(plus, minus, new_l);
    Ok(window)
}
