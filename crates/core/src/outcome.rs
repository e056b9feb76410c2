use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Warning(String),
    Failure(String),
}

impl Outcome {
    /// Only an unsupported storage class downgrades a stream error to a warning.
    pub fn classify(result: std::result::Result<(), &Error>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(e) if e.kind() == ErrorKind::UnsupportedStorage => Outcome::Warning(e.to_string()),
            Err(e) => Outcome::Failure(e.to_string()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Warning(_) => "warning",
            Outcome::Failure(_) => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutcome {
    pub stream: String,
    pub outcome: Outcome,
}

impl StreamOutcome {
    pub fn reason(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Warning(r) | Outcome::Failure(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcomes {
    pub succeeded: usize,
    pub warnings: Vec<StreamOutcome>,
    pub failures: Vec<StreamOutcome>,
}

impl RunOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, stream: &str, result: &crate::Result<T>) -> StreamOutcome {
        let outcome = StreamOutcome {
            stream: stream.to_string(),
            outcome: Outcome::classify(result.as_ref().map(|_| ())),
        };
        match outcome.outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Warning(_) => self.warnings.push(outcome.clone()),
            Outcome::Failure(_) => self.failures.push(outcome.clone()),
        }
        outcome
    }

    pub fn failed(&self, fail_on_warning: bool) -> bool {
        !self.failures.is_empty() || (!self.warnings.is_empty() && fail_on_warning)
    }

    pub fn into_result(self, fail_on_warning: bool) -> crate::Result<Self> {
        if self.failed(fail_on_warning) {
            return Err(Error::BackupFailed {
                failures: self.failures.len(),
                warnings: self.warnings.len(),
            });
        }
        Ok(self)
    }
}
