//! Error types for permstat

use thiserror::Error;

/// permstat error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration / input validation error (fatal, raised before any work starts)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error (raised while evaluating a shuffle)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_variant() {
        let e = Error::Validation("blocks overlap".to_string());
        assert_eq!(e.to_string(), "Validation error: blocks overlap");
        let e = Error::Computation("singular design".to_string());
        assert_eq!(e.to_string(), "Computation error: singular design");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.txt");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
