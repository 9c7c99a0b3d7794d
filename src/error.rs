//! Worker creation error types

use std::fmt;

use thiserror::Error;

/// Where in a delivery attempt a strategy failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    /// The strategy could not turn the script into a locator
    Encoding,
    /// The environment refused the locator synchronously
    Constructing,
    /// The worker started but reported an error before announcing readiness
    Handshake,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStage::Encoding => f.write_str("encoding"),
            AttemptStage::Constructing => f.write_str("constructing"),
            AttemptStage::Handshake => f.write_str("handshake"),
        }
    }
}

/// One failed delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub strategy: String,
    pub stage: AttemptStage,
    pub message: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} failed: {}", self.strategy, self.stage, self.message)
    }
}

/// Errors returned by worker creation
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker main must be a function")]
    NotCallable { reason: String },

    #[error("Failed to create worker: all delivery strategies failed")]
    Exhausted { failures: Vec<AttemptFailure> },
}

impl WorkerError {
    pub(crate) fn not_callable(reason: impl Into<String>) -> Self {
        WorkerError::NotCallable {
            reason: reason.into(),
        }
    }

    /// Per-strategy causes, in attempt order. Empty for `NotCallable`.
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            WorkerError::Exhausted { failures } => failures,
            WorkerError::NotCallable { .. } => &[],
        }
    }

    /// Multi-line report listing every cause
    pub fn report(&self) -> String {
        match self {
            WorkerError::NotCallable { reason } => format!("{}: {}", self, reason),
            WorkerError::Exhausted { failures } => {
                let mut out = self.to_string();
                for failure in failures {
                    out.push_str("\n  ");
                    out.push_str(&failure.to_string());
                }
                out
            }
        }
    }
}

/// Result type for worker creation
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_messages_differ() {
        let not_callable = WorkerError::not_callable("string literal");
        let exhausted = WorkerError::Exhausted { failures: vec![] };

        assert_eq!(not_callable.to_string(), "Worker main must be a function");
        assert_ne!(not_callable.to_string(), exhausted.to_string());
        assert!(not_callable.failures().is_empty());
    }

    #[test]
    fn test_report_lists_causes_in_order() {
        let err = WorkerError::Exhausted {
            failures: vec![
                AttemptFailure {
                    strategy: "data-url".to_string(),
                    stage: AttemptStage::Handshake,
                    message: "blocked".to_string(),
                },
                AttemptFailure {
                    strategy: "object-url".to_string(),
                    stage: AttemptStage::Encoding,
                    message: "no store".to_string(),
                },
            ],
        };

        let report = err.report();
        let data = report.find("[data-url] handshake failed: blocked").unwrap();
        let object = report.find("[object-url] encoding failed: no store").unwrap();
        assert!(data < object);
        assert_eq!(err.failures().len(), 2);
    }
}
