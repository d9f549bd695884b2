//! Normalized error taxonomy / 统一错误分类
//!
//! Every driver translates its backend's native failures into [`BlobError`]
//! before they cross the driver boundary. The facade forwards them as-is.

use std::fmt;
use std::io;

/// Result alias used across the crate / 通用结果类型
pub type Result<T> = std::result::Result<T, BlobError>;

/// Error kind without the message, for matching and display / 错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Permission,
    Throttled,
    Connection,
    Cancelled,
    UnsupportedProvider,
    Authentication,
    ClosedHandle,
    InvalidArgument,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Permission => "PermissionError",
            ErrorKind::Throttled => "ThrottledError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::UnsupportedProvider => "UnsupportedProviderError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::ClosedHandle => "ClosedHandleError",
            ErrorKind::InvalidArgument => "InvalidArgumentError",
            ErrorKind::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

/// Storage error surfaced identically by every backend / 存储错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("handle already closed: {0}")]
    ClosedHandle(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unknown(String),
}

impl BlobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlobError::NotFound(_) => ErrorKind::NotFound,
            BlobError::Permission(_) => ErrorKind::Permission,
            BlobError::Throttled(_) => ErrorKind::Throttled,
            BlobError::Connection(_) => ErrorKind::Connection,
            BlobError::Cancelled(_) => ErrorKind::Cancelled,
            BlobError::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            BlobError::Authentication(_) => ErrorKind::Authentication,
            BlobError::ClosedHandle(_) => ErrorKind::ClosedHandle,
            BlobError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BlobError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Message without the kind prefix / 错误消息
    pub fn message(&self) -> &str {
        match self {
            BlobError::NotFound(m)
            | BlobError::Permission(m)
            | BlobError::Throttled(m)
            | BlobError::Connection(m)
            | BlobError::Cancelled(m)
            | BlobError::UnsupportedProvider(m)
            | BlobError::Authentication(m)
            | BlobError::ClosedHandle(m)
            | BlobError::InvalidArgument(m)
            | BlobError::Unknown(m) => m,
        }
    }

    /// Only transient failures are worth another attempt / 是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::Throttled(_) | BlobError::Connection(_))
    }

    pub fn cancelled() -> Self {
        BlobError::Cancelled("operation cancelled or deadline exceeded".to_string())
    }

    /// Generic HTTP status mapping; drivers refine it with provider error codes
    /// 通用HTTP状态码映射
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => BlobError::NotFound(message),
            401 | 403 => BlobError::Permission(message),
            408 => BlobError::Connection(message),
            429 | 503 => BlobError::Throttled(message),
            500 | 502 | 504 => BlobError::Connection(message),
            400 | 411 | 413 | 414 | 416 => BlobError::InvalidArgument(message),
            _ => BlobError::Unknown(message),
        }
    }

    /// Map a transport-level reqwest failure / 映射传输层错误
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return BlobError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            BlobError::Connection(err.to_string())
        } else {
            BlobError::Unknown(err.to_string())
        }
    }
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::from_transport(&err)
    }
}

impl From<BlobError> for io::Error {
    fn from(err: BlobError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Permission | ErrorKind::Authentication => io::ErrorKind::PermissionDenied,
            ErrorKind::Connection => io::ErrorKind::ConnectionAborted,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl From<io::Error> for BlobError {
    fn from(err: io::Error) -> Self {
        // Errors raised by drivers inside AsyncRead/AsyncWrite keep their kind
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<BlobError>()) {
            return inner.clone();
        }
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound(message),
            io::ErrorKind::PermissionDenied => BlobError::Permission(message),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof => BlobError::Connection(message),
            io::ErrorKind::InvalidInput => BlobError::InvalidArgument(message),
            io::ErrorKind::Interrupted => BlobError::Cancelled(message),
            _ => BlobError::Unknown(message),
        }
    }
}
