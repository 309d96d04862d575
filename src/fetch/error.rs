use thiserror::Error;

/// How a single network operation failed
///
/// Wrapped operations return this so the retry loop knows whether another attempt
/// can help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Timeout, connection reset, 5xx, 429: worth retrying
    #[error("{0}")]
    Transient(String),

    /// The resource is gone or the request is wrong: retrying cannot help
    #[error("{0}")]
    Permanent(String),

    /// The response arrived but could not be understood
    #[error("{0}")]
    Parse(String),
}

impl OperationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Returns true if the retry loop should try again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Final outcome of a retried operation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Every attempt failed transiently
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Passed through from the operation unchanged, never retried
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Returns true if a later run could plausibly succeed
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
