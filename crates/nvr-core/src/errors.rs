//! Structured error types shared across NVR crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coded payload carried by every [`RelaxError`].
///
/// `code` is a stable kebab-case identifier such as `invalid-bounds` or
/// `non-finite-likelihood`; tests and callers match on it rather than on the
/// message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable kebab-case code.
    pub code: String,
    /// What went wrong, in one sentence.
    pub message: String,
    /// Offending quantities keyed by name (`t_probe_s`, `gamma_plus`, `path`, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Suggested remedy, usually a config key to change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Payload with the given code and message and no context.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records a named quantity as text.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Records a named numeric quantity (rate, time, count difference).
    pub fn with_value(self, key: impl Into<String>, value: f64) -> Self {
        self.with_context(key, value.to_string())
    }

    /// Attaches a remedy.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the relaxation-rate protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum RelaxError {
    /// Invalid bounds, grid sizes, constants or option values. Raised at construction.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// The measurement port failed; the current iteration is discarded.
    #[error("measurement error: {0}")]
    Measurement(ErrorInfo),
    /// The posterior became non-finite or lost all mass. Fatal for the run.
    #[error("numerical degeneracy: {0}")]
    Numerical(ErrorInfo),
    /// Serialization and file errors around configuration and record export.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            write!(f, " {{{}}}", pairs.join(", "))?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {hint}")?;
        }
        Ok(())
    }
}

impl RelaxError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            RelaxError::Configuration(info)
            | RelaxError::Measurement(info)
            | RelaxError::Numerical(info)
            | RelaxError::Serde(info) => info,
        }
    }

    /// Whether the error terminates the run rather than a single iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelaxError::Configuration(_) | RelaxError::Numerical(_))
    }

    /// Shorthand for a configuration error with the given code and message.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        RelaxError::Configuration(ErrorInfo::new(code, message))
    }

    /// Shorthand for a measurement error with the given code and message.
    pub fn measurement(code: &str, message: impl Into<String>) -> Self {
        RelaxError::Measurement(ErrorInfo::new(code, message))
    }
}
