use thiserror::Error;

/// Top-level error type for the Lumen system.
///
/// Each variant covers one failure class. Subsystem crates construct these
/// directly so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LumenError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller handed the index a vector it cannot accept (zero norm,
    /// non-finite components, or wrong dimension).
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The snapshot pair on disk is internally inconsistent. Loading from it
    /// would desynchronize index positions from image ids.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Remote blob transfer failed. Always recoverable: the local snapshot
    /// remains the source of truth.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The embedding or captioning model failed for one operation.
    #[error("Upstream model error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for LumenError {
    fn from(err: toml::de::Error) -> Self {
        LumenError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LumenError {
    fn from(err: toml::ser::Error) -> Self {
        LumenError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        LumenError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Lumen operations.
pub type Result<T> = std::result::Result<T, LumenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LumenError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = LumenError::InvalidVector("zero norm".to_string());
        assert_eq!(err.to_string(), "Invalid vector: zero norm");

        let err = LumenError::CorruptSnapshot("mapping missing".to_string());
        assert_eq!(err.to_string(), "Corrupt snapshot: mapping missing");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LumenError = io_err.into();
        assert!(matches!(err, LumenError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let bad_toml = "invalid = [[[";
        let parsed: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: LumenError = parsed.unwrap_err().into();
        assert!(matches!(err, LumenError::Config(_)));
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let bad_json = "{ not json }";
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str(bad_json);
        let err: LumenError = parsed.unwrap_err().into();
        assert!(matches!(err, LumenError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<i32> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(7);
            Ok(io_result?)
        }
        assert_eq!(inner().unwrap(), 7);
    }
}
