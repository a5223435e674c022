//! Error types and the status code taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes surfaced to callers and carried on failed responses.
///
/// Every public operation resolves to success or to exactly one of these
/// codes; `Code::Ok` only appears on the wire (an absent communication
/// status on a response means the same thing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    Ok,
    InvalidArgument,
    AlreadyExists,
    Aborted,
    Unavailable,
    Cancelled,
    DeadlineExceeded,
    PermissionDenied,
    NotFound,
    Unauthenticated,
    Unknown,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::Aborted => "ABORTED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Cancelled => "CANCELLED",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::NotFound => "NOT_FOUND",
            Code::Unauthenticated => "UNAUTHENTICATED",
            Code::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for devbus operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed addresses, non-positive timeouts and the like
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A conflicting registration already holds the slot
    #[error("Already exists: {message}")]
    AlreadyExists { message: String },

    /// The operation was abandoned before it could take effect
    #[error("Aborted: {message}")]
    Aborted { message: String },

    /// Transport failures: bind, send, or dispatch-enablement errors
    #[error("Unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The client was disconnected or torn down mid-operation
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// No response arrived within the call's time-to-live
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    DeadlineExceeded { operation: String, duration_ms: u64 },

    /// Remote handler refused the call
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Remote handler had no target for the call
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Remote handler rejected the caller's credentials
    #[error("Unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// Anything without a more precise classification
    #[error("Unknown: {message}")]
    Unknown { message: String },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Create an aborted error
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Create an unavailable error with source
    pub fn unavailable<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unavailable error without source
    pub fn unavailable_msg(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cancelled error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create a deadline-exceeded error
    pub fn deadline_exceeded(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Build an error from a wire status code, e.g. the communication
    /// status on a failed response. `Code::Ok` never names a failure, so it
    /// maps to `Unknown` defensively.
    pub fn from_code(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Code::InvalidArgument => Self::InvalidArgument { message },
            Code::AlreadyExists => Self::AlreadyExists { message },
            Code::Aborted => Self::Aborted { message },
            Code::Unavailable => Self::Unavailable {
                message,
                source: None,
            },
            Code::Cancelled => Self::Cancelled { message },
            Code::DeadlineExceeded => Self::DeadlineExceeded {
                operation: message,
                duration_ms: 0,
            },
            Code::PermissionDenied => Self::PermissionDenied { message },
            Code::NotFound => Self::NotFound { message },
            Code::Unauthenticated => Self::Unauthenticated { message },
            Code::Ok | Code::Unknown => Self::Unknown { message },
        }
    }

    /// The status code this error reduces to
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument { .. } => Code::InvalidArgument,
            Error::AlreadyExists { .. } => Code::AlreadyExists,
            Error::Aborted { .. } => Code::Aborted,
            Error::Unavailable { .. } => Code::Unavailable,
            Error::Cancelled { .. } => Code::Cancelled,
            Error::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            Error::PermissionDenied { .. } => Code::PermissionDenied,
            Error::NotFound { .. } => Code::NotFound,
            Error::Unauthenticated { .. } => Code::Unauthenticated,
            Error::Unknown { .. } => Code::Unknown,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unavailable { .. } | Error::DeadlineExceeded { .. } | Error::Aborted { .. }
        )
    }
}

/// Result type for devbus operations
pub type Result<T> = std::result::Result<T, Error>;
