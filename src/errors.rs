//! Unified error type for the drug catalog.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped by how a
//! caller is expected to react to them, see [`ErrorKind`].

use thiserror::Error;
use uuid::Uuid;

/// How a caller should treat an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broken configuration. Fatal at first use, not retried.
    Configuration,
    /// Expected, recoverable condition. Retry after a backoff.
    Transient,
    /// The operation was rejected without any state change.
    Integrity,
    /// A bulk import was rejected as a whole.
    BulkImport,
    /// Storage or I/O failure.
    Internal,
}

/// Catalog error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("No current dataset version for source '{source_name}'")]
    NoCurrentVersion { source_name: String },

    #[error("Dataset version '{version_label}' of source '{source_name}' already exists")]
    DuplicateVersion {
        source_name: String,
        version_label: String,
    },

    #[error("Dataset version {version_id} cannot go from '{from}' to '{to}'")]
    InvalidTransition {
        version_id: i64,
        from: String,
        to: String,
    },

    #[error("Invalid version label '{version_label}': {reason}")]
    InvalidVersionLabel {
        version_label: String,
        reason: String,
    },

    #[error("Dataset version {version_id} not found")]
    VersionNotFound { version_id: i64 },

    #[error("Dataset version {version_id} is read-only: {detail}")]
    ReadOnlyDataset { version_id: i64, detail: String },

    #[error("Bulk import rejected at row {row}: {reason}")]
    BulkImport { row: usize, reason: String },

    #[error("Drug {drug_id} not found")]
    DrugNotFound { drug_id: Uuid },

    #[error("Invalid drug: {message}")]
    InvalidDrug { message: String },

    #[error("A drug with code '{code_system}:{code}' already exists ({drug_id})")]
    DuplicateCode {
        code_system: String,
        code: String,
        drug_id: Uuid,
    },

    #[error("Search index of engine '{engine}' is not ready")]
    IndexNotReady { engine: String },

    #[error("Search engine '{name}' is not configured")]
    SearchEngineNotConfigured { name: String },

    #[error("Search engine not ready, try again later: {reason}")]
    SearchEngineNotReady { reason: String },

    #[error("Unknown importer plugin '{name}'")]
    UnknownImporter { name: String },

    #[error("Importer '{importer}' failed: {message}")]
    Importer { importer: String, message: String },

    #[error("Import of '{version_label}' for '{source_name}' is already in progress")]
    ImportInProgress {
        source_name: String,
        version_label: String,
    },

    #[error("Import of dataset version {version_id} timed out after {seconds}s")]
    ImportTimedOut { version_id: i64, seconds: u64 },
}

impl Error {
    /// Classifies the error for callers deciding between retry, reject and abort.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. }
            | Self::EnvVar(_)
            | Self::SearchEngineNotConfigured { .. }
            | Self::UnknownImporter { .. } => ErrorKind::Configuration,
            Self::NoCurrentVersion { .. }
            | Self::IndexNotReady { .. }
            | Self::SearchEngineNotReady { .. }
            | Self::ImportInProgress { .. } => ErrorKind::Transient,
            Self::DuplicateVersion { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidVersionLabel { .. }
            | Self::VersionNotFound { .. }
            | Self::ReadOnlyDataset { .. }
            | Self::DrugNotFound { .. }
            | Self::InvalidDrug { .. }
            | Self::DuplicateCode { .. } => ErrorKind::Integrity,
            Self::BulkImport { .. } | Self::ImportTimedOut { .. } => ErrorKind::BulkImport,
            Self::Database(_) | Self::Io(_) | Self::Importer { .. } => ErrorKind::Internal,
        }
    }

    /// True when the caller should retry after a backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        let not_ready = Error::SearchEngineNotReady {
            reason: "building".to_string(),
        };
        assert_eq!(not_ready.kind(), ErrorKind::Transient);
        assert!(not_ready.is_transient());

        let unknown = Error::SearchEngineNotConfigured {
            name: "elastic".to_string(),
        };
        assert_eq!(unknown.kind(), ErrorKind::Configuration);
        assert!(!unknown.is_transient());

        let read_only = Error::ReadOnlyDataset {
            version_id: 1,
            detail: format!("drug {} cannot be updated", Uuid::nil()),
        };
        assert_eq!(read_only.kind(), ErrorKind::Integrity);

        let bulk = Error::BulkImport {
            row: 3,
            reason: "bad".to_string(),
        };
        assert_eq!(bulk.kind(), ErrorKind::BulkImport);
        assert_eq!(bulk.to_string(), "Bulk import rejected at row 3: bad");
    }
}
