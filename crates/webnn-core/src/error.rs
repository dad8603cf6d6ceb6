//! Error types for execution contexts

use std::fmt;

use webnn_backends::BackendError;
use webnn_graph::ValidationError;

/// Result type for context operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The graph is structurally wrong
    Validation,
    /// The graph is well formed but this backend cannot run it
    NotSupported,
    /// The caller broke the calling protocol
    InvalidRequest,
    /// Device or internal failure
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Validation => "validation",
            ErrorCode::NotSupported => "not_supported",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Why a context stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LostReason {
    OutOfMemory,
    DeviceRemoved,
    Internal,
}

impl LostReason {
    /// Loss reason implied by a backend error, if it is a loss at all.
    pub fn from_backend(err: &BackendError) -> Option<Self> {
        match err {
            BackendError::OutOfMemory { .. } => Some(LostReason::OutOfMemory),
            BackendError::DeviceLost(_) => Some(LostReason::DeviceRemoved),
            _ => None,
        }
    }
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            LostReason::OutOfMemory => "out of memory",
            LostReason::DeviceRemoved => "device removed",
            LostReason::Internal => "internal error",
        };
        f.write_str(reason)
    }
}

/// Errors returned by [`crate::Context`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Graph failed validation
    #[error("invalid graph: {0}")]
    Validation(#[from] ValidationError),

    /// Backend cannot lower or compile the graph
    #[error("{0}")]
    NotSupported(String),

    /// Missing or unknown name, wrong byte length, foreign buffer
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The context is lost; nothing further will run on it
    #[error("context lost: {0}")]
    ContextLost(LostReason),

    /// Non-fatal device failure
    #[error("device error: {0}")]
    Device(BackendError),
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) => ErrorCode::Validation,
            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Error::ContextLost(_) | Error::Device(_) => ErrorCode::Unknown,
        }
    }

    /// Human-readable message, the same text as `Display`.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn lost_reason(&self) -> Option<LostReason> {
        match self {
            Error::ContextLost(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotSupported { .. } | BackendError::TypeMismatch { .. } => {
                Error::NotSupported(err.to_string())
            }
            err => match LostReason::from_backend(&err) {
                Some(reason) => Error::ContextLost(reason),
                None => Error::Device(err),
            },
        }
    }
}
