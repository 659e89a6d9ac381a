use serde::Serialize;
use thiserror::Error;

/// Failure classes a backend job can terminate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SubmitError,
    TransportError,
    MissingOutput,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::SubmitError => "submit_error",
            FailureKind::TransportError => "transport_error",
            FailureKind::MissingOutput => "missing_output",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("submit failed: {0}")]
    Submit(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("completion message carried no output")]
    MissingOutput,
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("unsupported selection: {0}")]
    UnsupportedSelection(String),
    #[error("a previous request is still in progress")]
    Busy,
    #[error("{operation} timed out after {seconds:.1}s")]
    Timeout { operation: String, seconds: f64 },
    #[error("image compression failed: {0}")]
    Compression(String),
    #[error("access denied for {0}")]
    Denied(String),
    #[error("language model failed: {0}")]
    Model(String),
    #[error("all {attempts} attempts failed; last error: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<GenerationError>,
    },
}

impl GenerationError {
    pub fn timeout(operation: impl Into<String>, seconds: f64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Errors worth re-attempting as a whole unit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Submit(_)
                | GenerationError::Transport(_)
                | GenerationError::MissingOutput
                | GenerationError::Model(_)
                | GenerationError::Timeout { .. }
        )
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            GenerationError::Submit(_) => Some(FailureKind::SubmitError),
            GenerationError::Transport(_) => Some(FailureKind::TransportError),
            GenerationError::MissingOutput => Some(FailureKind::MissingOutput),
            GenerationError::Exhausted { last, .. } => last.failure_kind(),
            _ => None,
        }
    }

    /// The innermost cause, unwrapping retry exhaustion.
    pub fn root(&self) -> &GenerationError {
        match self {
            GenerationError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_selection_errors_are_not_retryable() {
        assert!(!GenerationError::Busy.is_retryable());
        assert!(!GenerationError::UnsupportedSelection("Wide".to_string()).is_retryable());
        assert!(!GenerationError::Denied("troll".to_string()).is_retryable());
        assert!(GenerationError::MissingOutput.is_retryable());
        assert!(GenerationError::Transport("reset".to_string()).is_retryable());
    }

    #[test]
    fn exhausted_error_reports_last_cause() {
        let err = GenerationError::Exhausted {
            attempts: 4,
            last: Box::new(GenerationError::Submit("503".to_string())),
        };
        assert_eq!(err.failure_kind(), Some(FailureKind::SubmitError));
        assert_eq!(err.root(), &GenerationError::Submit("503".to_string()));
        assert_eq!(
            err.to_string(),
            "all 4 attempts failed; last error: submit failed: 503"
        );
    }
}
