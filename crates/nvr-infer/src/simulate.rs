use nvr_core::{ErrorInfo, MeasurementPort, Observation, RatePair, RelaxError, RngHandle};
use rand_distr::{Distribution, Poisson};

use crate::model::ForwardModel;
use crate::planner::sequence_time;

/// Synthetic measurement port drawing Poisson photon counts at fixed true rates.
///
/// Each call counts photons for the three initial states (0, +, −) read in
/// ms = 0 and reports the differences against the shared ms = 0 count.
#[derive(Debug, Clone)]
pub struct SimulatedMeasurement {
    truth: RatePair,
    model: ForwardModel,
    rng: RngHandle,
    shot_overhead_s: f64,
    calls: u64,
}

impl SimulatedMeasurement {
    /// Creates a port seeded with `seed`.
    pub fn new(truth: RatePair, model: ForwardModel, seed: u64) -> Self {
        Self::with_rng(truth, model, RngHandle::from_seed(seed))
    }

    /// Creates a port on an explicit RNG stream.
    pub fn with_rng(truth: RatePair, model: ForwardModel, rng: RngHandle) -> Self {
        Self {
            truth,
            model,
            rng,
            shot_overhead_s: 5e-6,
            calls: 0,
        }
    }

    /// Overrides the per-shot initialisation and readout time used for `t_elapsed`.
    pub fn with_shot_overhead(mut self, shot_overhead_s: f64) -> Self {
        self.shot_overhead_s = shot_overhead_s;
        self
    }

    /// True rates the counts are drawn from.
    pub fn truth(&self) -> RatePair {
        self.truth
    }

    /// Number of sequences executed so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn draw(&mut self, mean: f64) -> Result<f64, RelaxError> {
        let poisson = Poisson::new(mean).map_err(|err| {
            RelaxError::Measurement(
                ErrorInfo::new("invalid-photon-rate", err.to_string())
                    .with_value("mean_counts", mean),
            )
        })?;
        Ok(poisson.sample(self.rng.inner_mut()))
    }
}

impl MeasurementPort for SimulatedMeasurement {
    fn measure(&mut self, t_probe: f64, readouts: u64) -> Result<Observation, RelaxError> {
        if !(t_probe.is_finite() && t_probe >= 0.0) {
            return Err(RelaxError::Measurement(
                ErrorInfo::new("invalid-wait-time", "wait time must be finite and non-negative")
                    .with_value("t_probe_s", t_probe),
            ));
        }
        if readouts == 0 {
            return Err(RelaxError::measurement(
                "no-readouts",
                "at least one readout per variant is required",
            ));
        }
        let r = readouts as f64;
        let [e0, ep, em] = self.model.expected_counts(t_probe, &self.truth, r);
        let n0 = self.draw(e0)?;
        let np = self.draw(ep)?;
        let nm = self.draw(em)?;
        self.calls += 1;

        let denom = ((n0 + np) * (n0 + nm)).sqrt();
        Ok(Observation {
            t_elapsed_s: sequence_time(t_probe, readouts, self.shot_overhead_s),
            delta_plus: (n0 - np) / r,
            delta_minus: (n0 - nm) / r,
            sigma_delta_plus: (n0 + np).sqrt() / r,
            sigma_delta_minus: (n0 + nm).sqrt() / r,
            correlation: if denom > 0.0 { n0 / denom } else { 0.0 },
            readouts_consumed: readouts,
        })
    }
}
