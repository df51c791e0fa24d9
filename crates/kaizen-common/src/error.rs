//! Error types and result handling for the Kaizen agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification used by the orchestrator's retry policy.
///
/// Each [`Error`] variant maps onto exactly one kind so that retry and
/// quality decisions are decidable by inspection rather than by string
/// matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O glitches, subprocess timeouts, provider rate limits. Retry
    /// locally or fall back; counts against the circuit breaker.
    Transient,
    /// Guard rejections (path, command, protected file). Not retriable
    /// within the cycle.
    Policy,
    /// Schema-invalid persistent data or rejected generated artifacts.
    Validation,
    /// Unhandled failure inside the orchestrator.
    Fatal,
}

/// Main error type for Kaizen agent operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("A cycle is already in progress")]
    CycleInProgress,

    #[error("System is paused after repeated failures")]
    SystemPaused,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Map the error onto the retry-policy taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Provider(_)
            | Error::Subprocess(_)
            | Error::Timeout(_)
            | Error::Git(_)
            | Error::Io(_) => ErrorKind::Transient,
            Error::Policy(_) | Error::CycleInProgress | Error::SystemPaused => ErrorKind::Policy,
            Error::Validation(_) | Error::Serialization(_) | Error::Store(_) => {
                ErrorKind::Validation
            }
            Error::Configuration(_) | Error::Internal(_) | Error::Generic(_) => ErrorKind::Fatal,
        }
    }

    /// Check if the error is retryable within the same cycle
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Get error category for logging and trouble records
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Store(_) => "store",
            Error::Provider(_) => "provider",
            Error::Subprocess(_) => "subprocess",
            Error::Timeout(_) => "timeout",
            Error::Policy(_) => "policy",
            Error::Validation(_) => "validation",
            Error::Git(_) => "git",
            Error::CycleInProgress => "cycle-in-progress",
            Error::SystemPaused => "system-paused",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
            Error::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Timeout("build".into()).kind(), ErrorKind::Transient);
        assert_eq!(Error::Policy("protected".into()).kind(), ErrorKind::Policy);
        assert_eq!(
            Error::Validation("unbalanced".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::Internal("boom".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Subprocess("killed".into()).is_retryable());
        assert!(!Error::CycleInProgress.is_retryable());
        assert!(!Error::Validation("bad json".into()).is_retryable());
    }
}
