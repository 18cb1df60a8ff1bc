use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Completion error: {0}")]
    CompletionError(String),

    #[error("Rerank error: {0}")]
    RerankError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Circuit open for dependency: {0}")]
    CircuitOpen(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl MemoryError {
    /// Whether the resilience wrapper may retry a call that failed with
    /// this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::NetworkError(_)
                | MemoryError::TimeoutError(_)
                | MemoryError::RateLimited(_)
                | MemoryError::IndexError(_)
                | MemoryError::CompletionError(_)
        )
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_is_not_retryable() {
        assert!(!MemoryError::CircuitOpen("vector index".to_string()).is_retryable());
        assert!(MemoryError::NetworkError("reset".to_string()).is_retryable());
    }

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!MemoryError::ValidationError("bad input".to_string()).is_retryable());
        assert!(MemoryError::RateLimited("slow down".to_string()).is_retryable());
    }
}
