use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Gateway transport/runtime error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Queue operation error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Transport errors raised by the protocol adapters
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network/connection-level failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS setup/handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Listener/endpoint could not be created.
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// Malformed frame or payload on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Backend operation that produced a [`BackendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    Connect,
    Put,
    Get,
    OpenBrowse,
    BrowseFirst,
    BrowseNext,
    CloseBrowse,
    Inquire,
    Disconnect,
}

impl BackendOp {
    /// Short operation label used in error messages and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::OpenBrowse => "OPEN(BROWSE)",
            Self::BrowseFirst => "GET(BROWSE_FIRST)",
            Self::BrowseNext => "GET(BROWSE_NEXT)",
            Self::CloseBrowse => "CLOSE(BROWSE)",
            Self::Inquire => "INQUIRE",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl std::fmt::Display for BackendOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a queue client adapter.
///
/// `NoMessageAvailable` is the backend's "nothing to read" sentinel. The
/// gateway core turns it into an empty delivery, so callers never see it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No message arrived within the wait interval.
    #[error("no message available (reason {})", Self::NO_MSG_AVAILABLE)]
    NoMessageAvailable,

    /// The connection to the queue manager is unusable.
    #[error("connection broken: {0}")]
    Connection(String),

    /// The named queue does not exist on the queue manager.
    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    /// Puts or gets are inhibited on the queue.
    #[error("{operation} inhibited on queue '{queue}'")]
    Inhibited { queue: String, operation: String },

    /// The queue reached its maximum depth.
    #[error("queue '{queue}' is full (max depth {max_depth})")]
    QueueFull { queue: String, max_depth: i32 },

    /// The message is larger than the caller's buffer.
    #[error("message of {length} bytes exceeds buffer of {max_bytes} bytes")]
    Truncated { length: usize, max_bytes: usize },

    /// The browse handle was already closed.
    #[error("handle {0} is not open")]
    HandleClosed(u64),

    /// Any other adapter failure.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub const NO_MSG_AVAILABLE: i32 = 2033;

    /// Numeric reason code in the queue-manager style, for diagnostics.
    pub fn reason_code(&self) -> i32 {
        match self {
            Self::NoMessageAvailable => Self::NO_MSG_AVAILABLE,
            Self::Connection(_) => 2009,
            Self::UnknownQueue(_) => 2085,
            Self::Inhibited { operation, .. } if operation == "put" => 2051,
            Self::Inhibited { .. } => 2016,
            Self::QueueFull { .. } => 2053,
            Self::Truncated { .. } => 2080,
            Self::HandleClosed(_) => 2019,
            Self::Other(_) => 2195,
        }
    }

    /// Returns `true` when the failure concerns the connection rather than a queue.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Transport-agnostic classification of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Backend,
    SessionNotFound,
    Internal,
}

/// Errors returned by the gateway core operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// A required field was missing; the backend was not touched.
    #[error("{0} required")]
    Validation(String),

    /// The queue client adapter failed.
    #[error("{op}: {source}")]
    Backend {
        op: BackendOp,
        #[source]
        source: BackendError,
    },

    /// Browse token is unknown or its session was evicted.
    #[error("browse_id not found or expired: {0}")]
    SessionNotFound(String),

    /// A browse token could not be generated.
    #[error("browse id: {0}")]
    Token(String),
}

impl QueueError {
    /// Wraps an adapter failure with the operation that produced it.
    pub fn backend(op: BackendOp, source: BackendError) -> Self {
        Self::Backend { op, source }
    }

    /// Classification used by protocol adapters to pick a status code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::Token(_) => ErrorKind::Internal,
        }
    }
}
