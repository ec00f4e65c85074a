//! Error types for the registry layer.

use std::path::PathBuf;
use thiserror::Error;

/// Registry operation result type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// IO error (reading or replacing a registry file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON value inside a registry line could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither the registry file nor its template exists
    #[error("Missing registry {registry} and its template {template}")]
    MissingTemplate { registry: PathBuf, template: PathBuf },

    /// A record block could not be decoded into typed fields
    #[error("Malformed record '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// The temp file could not be renamed over the registry
    #[error("Failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Create a malformed record error.
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for the one configuration error the operator must fix by hand.
    pub fn is_missing_template(&self) -> bool {
        matches!(self, Self::MissingTemplate { .. })
    }
}
