use nvr_core::{Constants, RatePair, SpinState};

/// Spectral coefficients of the two decaying eigenmodes for one (init, read) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeCoefficients {
    /// Weight of the slow mode, decaying as exp(−β⁻t).
    pub slow: f64,
    /// Weight of the fast mode, decaying as exp(−β⁺t).
    pub fast: f64,
}

/// Closed-form photoluminescence model of the three-level relaxation problem.
///
/// Populations evolve under the symmetric rate matrix
/// `M = [[−(γ₊+γ₋), γ₊, γ₋], [γ₊, −γ₊, 0], [γ₋, 0, −γ₋]]` whose non-zero
/// eigenvalues are −β⁺ and −β⁻. The coefficient table is six times the
/// spectral projectors `M(M + β∓)/(±2G₀β±)`, so every entry is a rational
/// function of γ₊, γ₋ and G₀ and stays finite on the γ₊ = γ₋ diagonal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardModel {
    constants: Constants,
    baseline: f64,
    amplitude: f64,
}

impl ForwardModel {
    /// Builds the model for the given optical constants.
    pub fn new(constants: Constants) -> Self {
        Self {
            constants,
            baseline: constants.pl0 * (1.0 - 2.0 * constants.contrast / 3.0),
            amplitude: constants.pl0 * constants.contrast / 6.0,
        }
    }

    /// Optical constants backing the model.
    pub fn constants(&self) -> Constants {
        self.constants
    }

    /// Steady-state count per readout, `A = PL0·(1 − 2c/3)`.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Mode amplitude scale, `B = PL0·c/6`.
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    /// Coefficients (c⁻, c⁺) for all nine (read, init) pairs, indexed `[read][init]`.
    pub fn coefficient_table(rates: &RatePair) -> [[ModeCoefficients; 3]; 3] {
        let (gp, gm) = (rates.gamma_plus, rates.gamma_minus);
        let m = [
            [-(gp + gm), gp, gm],
            [gp, -gp, 0.0],
            [gm, 0.0, -gm],
        ];
        let mut m2 = [[0.0; 3]; 3];
        for (r, row) in m2.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| m[r][k] * m[k][c]).sum();
            }
        }

        let g0 = rates.g0();
        let beta_fast = rates.beta_plus();
        let beta_slow = rates.beta_minus();
        let fast_norm = 6.0 / (2.0 * g0 * beta_fast);
        let slow_norm = -6.0 / (2.0 * g0 * beta_slow);

        let mut table = [[ModeCoefficients {
            slow: 0.0,
            fast: 0.0,
        }; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                table[r][c] = ModeCoefficients {
                    fast: fast_norm * (m2[r][c] + beta_slow * m[r][c]),
                    slow: slow_norm * (m2[r][c] + beta_fast * m[r][c]),
                };
            }
        }
        table
    }

    /// Coefficients for a single (init, read) pair.
    pub fn coefficients(init: SpinState, read: SpinState, rates: &RatePair) -> ModeCoefficients {
        Self::coefficient_table(rates)[read.index()][init.index()]
    }

    /// Mean count per readout after initialising `init`, waiting `t` and reading `read`.
    pub fn pl(&self, init: SpinState, read: SpinState, t: f64, rates: &RatePair) -> f64 {
        let coeff = Self::coefficients(init, read, rates);
        self.combine(coeff, t, rates)
    }

    fn combine(&self, coeff: ModeCoefficients, t: f64, rates: &RatePair) -> f64 {
        self.baseline
            + self.amplitude
                * (coeff.slow * (-t * rates.beta_minus()).exp()
                    + coeff.fast * (-t * rates.beta_plus()).exp())
    }

    /// Mean counts per readout (PL₀, PL₊, PL₋) for the three initial states read in ms = 0.
    pub fn readout_means(&self, t: f64, rates: &RatePair) -> [f64; 3] {
        let table = Self::coefficient_table(rates);
        let zero = SpinState::Zero.index();
        SpinState::ALL.map(|init| self.combine(table[zero][init.index()], t, rates))
    }

    /// Expected counts (E₀, E₊, E₋) for `readouts` single shots per variant.
    pub fn expected_counts(&self, t: f64, rates: &RatePair, readouts: f64) -> [f64; 3] {
        self.readout_means(t, rates).map(|pl| pl * readouts)
    }

    /// Noise-free (Δ₊, Δ₋) = (PL₀ − PL₊, PL₀ − PL₋) per readout.
    pub fn expected_deltas(&self, t: f64, rates: &RatePair) -> (f64, f64) {
        let [zero, plus, minus] = self.readout_means(t, rates);
        (zero - plus, zero - minus)
    }

    /// Symbolic bound `|c⁻| + |c⁺|` of the mode weights for one pair.
    pub fn envelope(init: SpinState, read: SpinState, rates: &RatePair) -> f64 {
        let coeff = Self::coefficients(init, read, rates);
        coeff.slow.abs() + coeff.fast.abs()
    }
}
