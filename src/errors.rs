use thiserror::Error;

/// Failures of the request ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Restore request {0} already exists")]
    AlreadyExists(String),

    #[error("Restore request {0} not found")]
    NotFound(String),

    #[error("Restore request {0} has no bucket paths")]
    NoPaths(String),
}

/// Failures of a single object-store call.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("{0} cancelled")]
    Cancelled(&'static str),
}

impl StoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled(_))
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Role assumption for {role_arn} failed: {message}")]
    AssumeRole { role_arn: String, message: String },

    #[error("Role assumption for {0} returned no credentials")]
    MissingCredentials(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification sink unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Path-level failure. The path stays pending in the ledger.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Invalid bucket path: {0}")]
    InvalidPath(String),

    #[error("Failed to list objects: {0}")]
    Listing(#[source] StoreError),

    #[error("Failed to update processed paths: {0}")]
    Ledger(#[source] LedgerError),

    #[error("Restoration cancelled")]
    Cancelled,

    #[error("Path restorer aborted: {0}")]
    Aborted(String),
}

/// Object-level failure. Logged and skipped; never fails the path.
#[derive(Error, Debug)]
pub enum ObjectFailure {
    #[error("Failed to change storage tier: {0}")]
    ChangeTier(#[source] StoreError),

    #[error("Failed to fetch storage tier for verification: {0}")]
    Verify(#[source] StoreError),

    #[error("Storage tier reads {actual} after restoration, expected {expected}")]
    TierMismatch { expected: String, actual: String },
}

impl ObjectFailure {
    pub fn is_cancelled(&self) -> bool {
        match self {
            ObjectFailure::ChangeTier(e) | ObjectFailure::Verify(e) => e.is_cancelled(),
            ObjectFailure::TierMismatch { .. } => false,
        }
    }
}
