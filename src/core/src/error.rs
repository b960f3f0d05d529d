use thiserror::Error;

/// A3S Airgap error types
#[derive(Error, Debug)]
pub enum AirgapError {
    /// Manifest input could not be read or decoded
    #[error("Input error: {path} - {message}")]
    InputError { path: String, message: String },

    /// Malformed extraction rule (bad path expression)
    #[error("Invalid extraction rule {rule}: {message}")]
    RuleError { rule: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Image reference failed to parse
    #[error("Invalid image reference '{reference}': {message}")]
    ReferenceError { reference: String, message: String },

    /// Registry fetch failed for a reference
    #[error("Registry error: {reference} - {message}")]
    RegistryError { reference: String, message: String },

    /// OCI layout error
    #[error("OCI layout error: {0}")]
    LayoutError(String),

    /// Archive could not be written
    #[error("Archive error: {path} - {message}")]
    ArchiveError { path: String, message: String },

    /// Run was interrupted before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AirgapError {
    fn from(err: serde_json::Error) -> Self {
        AirgapError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AirgapError {
    fn from(err: serde_yaml::Error) -> Self {
        AirgapError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Airgap operations
pub type Result<T> = std::result::Result<T, AirgapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_display() {
        let error = AirgapError::InputError {
            path: "manifests/pod.yaml".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Input error: manifests/pod.yaml - No such file or directory"
        );
    }

    #[test]
    fn test_rule_error_display() {
        let error = AirgapError::RuleError {
            rule: "Pod v1".to_string(),
            message: "unterminated bracket at offset 12".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid extraction rule Pod v1: unterminated bracket at offset 12"
        );
    }

    #[test]
    fn test_reference_error_display() {
        let error = AirgapError::ReferenceError {
            reference: "NGINX".to_string(),
            message: "repository must be lowercase".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid image reference 'NGINX': repository must be lowercase"
        );
    }

    #[test]
    fn test_registry_error_names_reference() {
        let error = AirgapError::RegistryError {
            reference: "ghcr.io/org/app:v1".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io/org/app:v1 - manifest unknown"
        );
    }

    #[test]
    fn test_archive_error_display() {
        let error = AirgapError::ArchiveError {
            path: "images.tar".to_string(),
            message: "No space left on device".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Archive error: images.tar - No space left on device"
        );
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(AirgapError::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AirgapError = io_error.into();
        assert!(matches!(error, AirgapError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ invalid");
        let error: AirgapError = result.unwrap_err().into();
        assert!(matches!(error, AirgapError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: AirgapError = result.unwrap_err().into();
        assert!(matches!(error, AirgapError::SerializationError(_)));
    }
}
