//! Error types for session persistence.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error reading or writing session data.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(StoreError::from(io), StoreError::Io(_)));

        let json = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        assert!(matches!(StoreError::from(json), StoreError::Json(_)));
    }
}
