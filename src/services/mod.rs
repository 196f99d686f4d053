pub mod matcher;
pub mod verification;
pub mod resolver;
pub mod scanner;
pub mod importer;
pub mod exporter;
pub mod reevaluator;
pub mod aliases;

use uuid::Uuid;

use crate::domain::ValidationError;
use crate::repository::RepositoryError;

/// Errors surfaced to the operator from the verification surface. Everything
/// here maps to a specific refusal; none of these leave side effects behind.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Queue item not found for signature {0}.")]
    QueueItemNotFound(String),

    #[error("Work <{0}> not found.")]
    WorkNotFound(Uuid),

    #[error("Recording <{0}> not found.")]
    RecordingNotFound(Uuid),

    #[error("Audit entry <{0}> not found.")]
    AuditNotFound(Uuid),

    #[error("Signature mismatch: expected {expected}, got {got}. The queue entry drifted or the request is stale.")]
    SignatureMismatch { expected: String, got: String },

    #[error("An active bridge for this signature already points at work <{existing_work_id}>. Undo the existing link first.")]
    BridgeConflict { existing_work_id: Uuid },

    #[error("A bridge already exists for this signature.")]
    BridgeExists,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Permission denied at {path}: {source}")]
    RootDirAccessError { path: String, source: std::io::Error },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Validation error has occured: {0}")]
    DomainStructValidationError(#[from] ValidationError),

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Log file not found: {0}")]
    FileNotFound(String),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("CSV writing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}
