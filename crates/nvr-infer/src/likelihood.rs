use serde::{Deserialize, Serialize};

/// Noise model linking expected counts to the observed count differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodModel {
    /// The ms = 0 reference count is one shared measurement; marginalising it
    /// couples Δ₊ and Δ₋.
    #[default]
    SharedBaseline,
    /// Each difference is treated as its own Gaussian with variance E₀ + E±.
    Independent,
}

impl LikelihoodModel {
    /// Negative log-likelihood of one observation, up to an additive constant.
    ///
    /// `expected` holds (E₀, E₊, E₋) and `d_plus`/`d_minus` are the
    /// readout-scaled differences `R·Δ`. All expected counts must be positive.
    pub fn neg_log_likelihood(self, expected: [f64; 3], d_plus: f64, d_minus: f64) -> f64 {
        match self {
            LikelihoodModel::SharedBaseline => shared_baseline(expected, d_plus, d_minus),
            LikelihoodModel::Independent => independent(expected, d_plus, d_minus),
        }
    }
}

fn shared_baseline([e0, ep, em]: [f64; 3], dp: f64, dm: f64) -> f64 {
    let z = ep * em + e0 * (ep + em);
    let a = e0 + ep + em + 2.0 * (dp + dm) + dp * dp / ep + dm * dm / em;
    let b = (ep * dm + em * (3.0 * ep + dp)).powi(2);
    let c = e0 / (ep * em * z);
    0.5 * (z.ln() + a - b * c)
}

fn independent([e0, ep, em]: [f64; 3], dp: f64, dm: f64) -> f64 {
    let term = |e: f64, d: f64| {
        let var = e0 + e;
        let resid = d - (e0 - e);
        var.ln() + resid * resid / var
    };
    0.5 * (term(ep, dp) + term(em, dm))
}
