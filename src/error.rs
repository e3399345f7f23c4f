use thiserror::Error;

/// Classified failure for a single task attempt.
///
/// The pipeline classifies; the retry controller is the only component that
/// acts on the classification.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Malformed or empty input. Never retried.
    #[error("{0}")]
    Validation(String),
    /// The compute resource, or an upstream it depends on, is unavailable or
    /// failed to initialize.
    #[error("dependency error: {0}")]
    Dependency(String),
    /// Network or timing failure during an otherwise valid operation.
    #[error("transient error: {0}")]
    Transient(String),
    /// Anything uncategorized.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl TaskError {
    pub fn error_type(&self) -> &'static str {
        match self {
            TaskError::Validation(_) => "validation",
            TaskError::Dependency(_) => "dependency",
            TaskError::Transient(_) => "transient",
            TaskError::Unexpected(_) => "unexpected",
        }
    }

    /// Retrying a validation failure cannot change the outcome; everything
    /// else is eligible for another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Validation(_))
    }
}

impl From<candle_core::Error> for TaskError {
    fn from(err: candle_core::Error) -> Self {
        TaskError::Dependency(format!("inference backend error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_not_retryable() {
        assert!(!TaskError::Validation("empty".into()).is_retryable());
        assert!(TaskError::Dependency("down".into()).is_retryable());
        assert!(TaskError::Transient("timeout".into()).is_retryable());
        assert!(TaskError::Unexpected("boom".into()).is_retryable());
    }

    #[test]
    fn error_type_labels() {
        assert_eq!(TaskError::Validation("x".into()).error_type(), "validation");
        assert_eq!(TaskError::Dependency("x".into()).error_type(), "dependency");
        assert_eq!(TaskError::Transient("x".into()).error_type(), "transient");
        assert_eq!(TaskError::Unexpected("x".into()).error_type(), "unexpected");
    }

    #[test]
    fn validation_message_is_bare() {
        let err = TaskError::Validation("Lyric is required".into());
        assert_eq!(err.to_string(), "Lyric is required");
    }
}
