//! Error types for the backup operator

use thiserror::Error;

/// Main error type for the operator
///
/// Schedule-expression parse failures never surface here: they are terminal
/// for a cycle rather than retryable, so the reconciler reports them as an
/// outcome instead of an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("CRD not installed. Please install the BackupSchedule CRD first.")]
    CrdNotInstalled,

    #[error("object is missing required field: {0}")]
    MissingObjectKey(&'static str),
}
