use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the ETL toolkit
#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq)]
pub enum EtlError {
    /// Validation errors from schema checks or pipeline validators
    #[error("Validation error: {0}")]
    Validation(String),

    /// Errors raised while a transformer was running
    #[error("Transform error: {context}")]
    Transform {
        context: String,
        #[source]
        #[serde(skip)]
        source: Option<Box<EtlError>>,
    },

    /// Invalid registrations or malformed option trees
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No chain of registered migrations connects the two versions
    #[error("No migration path found from {from} to {to}")]
    NoMigrationPath { from: String, to: String },

    /// A migrator failed while being applied
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON/CSV deserialization errors
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// JSON/CSV serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Codec errors and unsupported compression formats
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(String),

    /// Transport errors from the sync channel
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Any other errors
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl EtlError {
    /// Creates a new transform error with context
    pub fn transform<S: Into<String>>(context: S, source: Option<EtlError>) -> Self {
        EtlError::Transform {
            context: context.into(),
            source: source.map(Box::new),
        }
    }

    /// Convert from std::io::Error
    pub fn from_io(err: std::io::Error) -> Self {
        EtlError::Io(err.to_string())
    }

    /// Convert from serde_json::Error
    pub fn from_serde(err: serde_json::Error) -> Self {
        EtlError::Deserialization(err.to_string())
    }

    /// Determines if this error is worth retrying
    ///
    /// Transient infrastructure failures are retryable. Data, schema and
    /// configuration problems fail the same way on every attempt.
    pub fn retryable(&self) -> bool {
        match self {
            EtlError::Io(_) => true,
            EtlError::Connection(_) => true,
            EtlError::Timeout(_) => true,
            EtlError::Transform { source, .. } => {
                source.as_ref().map(|e| e.retryable()).unwrap_or(false)
            }

            EtlError::Validation(_) => false,
            EtlError::Configuration(_) => false,
            EtlError::NoMigrationPath { .. } => false,
            EtlError::Migration(_) => false,
            EtlError::Deserialization(_) => false,
            EtlError::Serialization(_) => false,
            EtlError::Compression(_) => false,
            EtlError::Unknown(_) => false,
        }
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            EtlError::Validation(_) => "VALIDATION_ERROR",
            EtlError::Transform { .. } => "TRANSFORM_ERROR",
            EtlError::Configuration(_) => "CONFIGURATION_ERROR",
            EtlError::NoMigrationPath { .. } => "NO_MIGRATION_PATH",
            EtlError::Migration(_) => "MIGRATION_ERROR",
            EtlError::Deserialization(_) => "DESERIALIZATION_ERROR",
            EtlError::Serialization(_) => "SERIALIZATION_ERROR",
            EtlError::Compression(_) => "COMPRESSION_ERROR",
            EtlError::Io(_) => "IO_ERROR",
            EtlError::Connection(_) => "CONNECTION_ERROR",
            EtlError::Timeout(_) => "TIMEOUT_ERROR",
            EtlError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Type alias for Result with EtlError
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(EtlError::Io("disk unavailable".to_string()).retryable());
        assert!(EtlError::Connection("socket closed".to_string()).retryable());
        assert!(EtlError::Timeout("upstream timed out".to_string()).retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!EtlError::Validation("bad record".to_string()).retryable());
        assert!(!EtlError::Configuration("duplicate version".to_string()).retryable());
        assert!(
            !EtlError::NoMigrationPath {
                from: "v1".to_string(),
                to: "v9".to_string()
            }
            .retryable()
        );
        assert!(!EtlError::Compression("unsupported format".to_string()).retryable());
        assert!(!EtlError::Unknown("?".to_string()).retryable());
    }

    #[test]
    fn test_transform_error_inherits_retryability() {
        let transient = EtlError::transform(
            "enrichment lookup failed",
            Some(EtlError::Timeout("lookup".to_string())),
        );
        let permanent = EtlError::transform(
            "record rejected",
            Some(EtlError::Validation("missing id".to_string())),
        );
        let bare = EtlError::transform("stage panicked", None);

        assert!(transient.retryable());
        assert!(!permanent.retryable());
        assert!(!bare.retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = EtlError::NoMigrationPath {
            from: "v1".to_string(),
            to: "v3".to_string(),
        };
        assert_eq!(err.to_string(), "No migration path found from v1 to v3");
        assert_eq!(err.code(), "NO_MIGRATION_PATH");

        let err = EtlError::from_serde(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(err.code(), "DESERIALIZATION_ERROR");
    }
}
