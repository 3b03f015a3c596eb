//! Top-level error taxonomy, shared by every component so the MCP layer can
//! map errors onto JSON-RPC error codes in one place (see `haivemind-mcp`'s
//! `protocol::error_code`).

/// Closed set of error kinds every component reports into. Each component
/// keeps its own `thiserror` enum internally (see `StorageError`,
/// `RegistryError`, `SyncError`) and converts into this one at its public
/// boundary, so callers outside `haivemind-core` only ever match on this.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum HaiveError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("duplicate detected: {0}")]
    DuplicateDetected(String),

    #[error("deletion expired: {0}")]
    DeletionExpired(String),

    #[error("content too large: {0}")]
    ContentTooLarge(String),

    #[error("storage error: {0}")]
    Storage(crate::storage::StorageError),

    #[error("conflict detected: {0}")]
    ConflictDetected(String),

    #[error("try again later: {0}")]
    TryAgainLater(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HaiveError>;

impl HaiveError {
    /// Stable string discriminant used by the MCP tool layer to build the
    /// `error.data.code` field without pattern-matching on the enum, and to
    /// pick the JSON-RPC error class (`-32602` vs `-32603` vs a tool-level
    /// error payload).
    pub fn kind(&self) -> &'static str {
        match self {
            HaiveError::InvalidArgument(_) => "invalid_argument",
            HaiveError::NotFound(_) => "not_found",
            HaiveError::Forbidden(_) => "forbidden",
            HaiveError::ConfirmationRequired(_) => "confirmation_required",
            HaiveError::DuplicateDetected(_) => "duplicate_detected",
            HaiveError::DeletionExpired(_) => "deletion_expired",
            HaiveError::ContentTooLarge(_) => "content_too_large",
            HaiveError::Storage(_) => "storage_error",
            HaiveError::ConflictDetected(_) => "conflict_detected",
            HaiveError::TryAgainLater(_) => "try_again_later",
            HaiveError::Timeout(_) => "timeout",
            HaiveError::Unavailable(_) => "unavailable",
            HaiveError::Internal(_) => "internal",
        }
    }

    /// Whether this error should retry-after at the transport layer.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            HaiveError::Storage(_)
                | HaiveError::TryAgainLater(_)
                | HaiveError::Timeout(_)
                | HaiveError::Unavailable(_)
        )
    }
}

impl From<crate::storage::StorageError> for HaiveError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError as SE;
        match err {
            SE::NotFound(msg) => HaiveError::NotFound(msg),
            SE::InvalidArgument(msg) => HaiveError::InvalidArgument(msg),
            SE::ConfidentialityDowngrade(msg) => HaiveError::InvalidArgument(msg),
            SE::DeletionExpired(msg) => HaiveError::DeletionExpired(msg),
            SE::Forbidden(msg) => HaiveError::Forbidden(msg),
            other => HaiveError::Storage(other),
        }
    }
}
