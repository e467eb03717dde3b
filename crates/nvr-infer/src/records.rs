use std::fs;
use std::path::Path;

use nvr_core::{ErrorInfo, Observation, RelaxError};
use serde::{Deserialize, Serialize};

use crate::estimator::Estimate;

/// Flat per-iteration record emitted by the driver.
///
/// Times are running totals since the start of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based index; equals the number of completed iterations.
    pub iteration: usize,
    /// Wait time measured in this iteration (s).
    pub t_probe_s: f64,
    /// Estimated γ₊ after this iteration (Hz).
    pub gamma_plus_hat: f64,
    /// Estimated γ₋ after this iteration (Hz).
    pub gamma_minus_hat: f64,
    /// Standard deviation of γ₊ (Hz).
    pub sigma_plus: f64,
    /// Standard deviation of γ₋ (Hz).
    pub sigma_minus: f64,
    /// Covariance of γ₊ and γ₋ (Hz²).
    pub cov_plus_minus: f64,
    /// Readouts consumed per variant so far.
    pub cumulative_readouts: u64,
    /// Wall-clock time spent inside the measurement port (s).
    pub pulse_sequence_time_s: f64,
    /// Wall-clock time spent updating, reducing and rediscretising (s).
    pub processing_time_s: f64,
    /// Sequence time reported by the port (s).
    pub experiment_time_s: f64,
    /// Differential entropy of the posterior, when enabled.
    pub posterior_entropy: Option<f64>,
    /// The MAP lay on the grid rim and a fallback variance was used.
    pub boundary_warning: bool,
    /// The local Hessian was not positive definite.
    pub hessian_fallback: bool,
    /// The grid was zoomed after this iteration.
    pub rediscretised: bool,
}

impl IterationRecord {
    /// Estimate carried by the record.
    pub fn estimate(&self) -> Estimate {
        Estimate {
            gamma_plus: self.gamma_plus_hat,
            gamma_minus: self.gamma_minus_hat,
            sigma_plus: self.sigma_plus,
            sigma_minus: self.sigma_minus,
            cov: self.cov_plus_minus,
            boundary_warning: self.boundary_warning,
            hessian_fallback: self.hessian_fallback,
        }
    }

    /// Sensitivities η± = σ±·√t of the rates over the experiment time so far (Hz/√Hz).
    pub fn sensitivities(&self) -> (f64, f64) {
        let root = self.experiment_time_s.max(0.0).sqrt();
        (self.sigma_plus * root, self.sigma_minus * root)
    }
}

/// Why a run stopped on numerical degeneracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltDiagnostics {
    /// Iteration whose update failed.
    pub iteration: usize,
    /// The error that halted the run.
    pub error: RelaxError,
    /// Smallest finite entry of the accumulator before the failed update.
    pub log_likelihood_min: f64,
    /// Largest finite entry of the accumulator before the failed update.
    pub log_likelihood_max: f64,
    /// `(n_minus, n_plus)` shape of the accumulator.
    pub log_likelihood_shape: [usize; 2],
    /// The accumulator itself, row-major (row `i` is γ₋[i]).
    pub log_likelihood: Vec<f64>,
    /// Estimate in force when the run halted.
    pub last_estimate: Estimate,
    /// Observation that triggered the failure.
    pub last_observation: Option<Observation>,
}

/// Append-only store of iteration records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordLog {
    records: Vec<IterationRecord>,
}

impl RecordLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record; iterations must increase.
    pub fn push(&mut self, record: IterationRecord) {
        debug_assert!(self
            .records
            .last()
            .map_or(true, |last| last.iteration < record.iteration));
        self.records.push(record);
    }

    /// All records in order.
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no iteration has completed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many iterations fell back because the MAP was on the rim.
    pub fn boundary_warnings(&self) -> usize {
        self.records.iter().filter(|r| r.boundary_warning).count()
    }

    /// How many iterations fell back because the Hessian was not positive definite.
    pub fn hessian_fallbacks(&self) -> usize {
        self.records.iter().filter(|r| r.hessian_fallback).count()
    }

    /// Writes the records to a CSV file with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<(), RelaxError> {
        let mut writer = csv::Writer::from_path(path).map_err(|err| wrap_csv(path, err))?;
        for record in &self.records {
            writer.serialize(record).map_err(|err| wrap_csv(path, err))?;
        }
        writer.flush().map_err(|err| {
            RelaxError::Serde(
                ErrorInfo::new("records-csv", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    /// Reads records back from a CSV file written by [`RecordLog::write_csv`].
    pub fn read_csv(path: &Path) -> Result<Self, RelaxError> {
        let mut reader = csv::Reader::from_path(path).map_err(|err| wrap_csv(path, err))?;
        let mut log = Self::new();
        for row in reader.deserialize() {
            log.push(row.map_err(|err| wrap_csv(path, err))?);
        }
        Ok(log)
    }

    /// Pretty JSON array of the records.
    pub fn to_json(&self) -> Result<String, RelaxError> {
        serde_json::to_string_pretty(&self.records)
            .map_err(|err| RelaxError::Serde(ErrorInfo::new("records-json", err.to_string())))
    }

    /// Writes the JSON array to `path`.
    pub fn write_json(&self, path: &Path) -> Result<(), RelaxError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|err| {
            RelaxError::Serde(
                ErrorInfo::new("records-json", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }
}

fn wrap_csv(path: &Path, err: csv::Error) -> RelaxError {
    RelaxError::Serde(
        ErrorInfo::new("records-csv", "record CSV failure")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}
