use thiserror::Error;

/// Application-wide error type.
///
/// Every variant maps to exactly one JSON-RPC error code via
/// [`AppError::rpc_code`], completing the taxonomy described in the
/// specification's error handling section.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error("insufficient permissions: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("camera not found: {0}")]
    CameraNotFound(String),

    #[error("recording already in progress for {0}")]
    RecordingInProgress(String),

    #[error("mediamtx unavailable: {0}")]
    MediaMtxUnavailable(String),

    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("subprocess failed: {0}")]
    SubprocessFailed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Map this error to its JSON-RPC 2.0 numeric error code.
    pub fn rpc_code(&self) -> i64 {
        match self {
            AppError::InvalidParam(_) => -32602,
            AppError::Unauthorized => -32001,
            AppError::Forbidden(_) => -32003,
            AppError::RateLimited => -32002,
            AppError::CameraNotFound(_) => -32004,
            AppError::RecordingInProgress(_) => -32005,
            AppError::MediaMtxUnavailable(_) => -32006,
            AppError::InsufficientStorage(_) => -32007,
            AppError::CapabilityNotSupported(_) => -32008,
            AppError::NotFound(_) => -32603,
            AppError::AlreadyRunning => -32603,
            AppError::NotRunning => -32603,
            AppError::Upstream(_) => -32603,
            AppError::SubprocessFailed(_) => -32603,
            AppError::Timeout(_) => -32603,
            AppError::Cancelled => -32603,
            AppError::Config(_) => -32603,
            AppError::Io(_) => -32603,
            AppError::Serialization(_) => -32603,
            AppError::Internal(_) => -32603,
        }
    }

    /// Whether this is a client-input mistake rather than an internal
    /// failure. Client errors are still counted as requests but must
    /// never bump alert-worthy failure counters the way unexpected
    /// internal errors do.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidParam(_)
                | AppError::Unauthorized
                | AppError::Forbidden(_)
                | AppError::RateLimited
                | AppError::CameraNotFound(_)
                | AppError::RecordingInProgress(_)
                | AppError::NotFound(_)
        )
    }
}
