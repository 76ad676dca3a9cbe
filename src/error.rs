//! Error handling for the conference hub

use std::fmt;

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Conference hub error types
#[derive(Debug, Clone)]
pub enum HubError {
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol errors (malformed or unexpected frames)
    Protocol(String),
    /// Connection errors
    Connection(String),
    /// Configuration error
    Config(String),
    /// Missing or malformed request fields
    InvalidArgument(String),
    /// Entity already exists (username taken, duplicate attachment)
    AlreadyExists(String),
    /// Entity not found (recipient, transfer id)
    NotFound(String),
    /// Arbitration or attachment window elapsed
    DeadlineExceeded(String),
    /// Peer stream closed unexpectedly mid-transfer
    Unavailable(String),
    /// Unexpected failure in the relay path
    Internal(String),
}

impl HubError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            HubError::Network(_) => 1000,
            HubError::Serialization(_) => 1001,
            HubError::Protocol(_) => 1002,
            HubError::Connection(_) => 1003,
            HubError::Config(_) => 1004,
            HubError::InvalidArgument(_) => 1005,
            HubError::AlreadyExists(_) => 1006,
            HubError::NotFound(_) => 1007,
            HubError::DeadlineExceeded(_) => 1008,
            HubError::Unavailable(_) => 1009,
            HubError::Internal(_) => 1010,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            HubError::Network(msg) => msg,
            HubError::Serialization(msg) => msg,
            HubError::Protocol(msg) => msg,
            HubError::Connection(msg) => msg,
            HubError::Config(msg) => msg,
            HubError::InvalidArgument(msg) => msg,
            HubError::AlreadyExists(msg) => msg,
            HubError::NotFound(msg) => msg,
            HubError::DeadlineExceeded(msg) => msg,
            HubError::Unavailable(msg) => msg,
            HubError::Internal(msg) => msg,
        }
    }

    /// Reconstruct an error from a wire code and message
    pub fn from_code(code: u32, msg: String) -> Self {
        match code {
            1000 => HubError::Network(msg),
            1001 => HubError::Serialization(msg),
            1002 => HubError::Protocol(msg),
            1003 => HubError::Connection(msg),
            1004 => HubError::Config(msg),
            1005 => HubError::InvalidArgument(msg),
            1006 => HubError::AlreadyExists(msg),
            1007 => HubError::NotFound(msg),
            1008 => HubError::DeadlineExceeded(msg),
            1009 => HubError::Unavailable(msg),
            _ => HubError::Internal(msg),
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        HubError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        HubError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        HubError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        HubError::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        HubError::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<T: Into<String>>(msg: T) -> Self {
        HubError::InvalidArgument(msg.into())
    }

    /// Create an already exists error
    pub fn already_exists<T: Into<String>>(msg: T) -> Self {
        HubError::AlreadyExists(msg.into())
    }

    /// Create a not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        HubError::NotFound(msg.into())
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded<T: Into<String>>(msg: T) -> Self {
        HubError::DeadlineExceeded(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable<T: Into<String>>(msg: T) -> Self {
        HubError::Unavailable(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        HubError::Internal(msg.into())
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Network(msg) => write!(f, "Network error: {}", msg),
            HubError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            HubError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            HubError::Connection(msg) => write!(f, "Connection error: {}", msg),
            HubError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HubError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            HubError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            HubError::NotFound(msg) => write!(f, "Not found: {}", msg),
            HubError::DeadlineExceeded(msg) => write!(f, "Deadline exceeded: {}", msg),
            HubError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            HubError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for HubError {}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::Network(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectError> for HubError {
    fn from(err: quinn::ConnectError) -> Self {
        HubError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ConnectionError> for HubError {
    fn from(err: quinn::ConnectionError) -> Self {
        HubError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for HubError {
    fn from(err: quinn::ReadError) -> Self {
        HubError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for HubError {
    fn from(err: quinn::WriteError) -> Self {
        HubError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for HubError {
    fn from(err: quinn::ClosedStream) -> Self {
        HubError::Connection(format!("Stream closed: {}", err))
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<uuid::Error> for HubError {
    fn from(err: uuid::Error) -> Self {
        HubError::Internal(format!("UUID error: {}", err))
    }
}

impl From<anyhow::Error> for HubError {
    fn from(err: anyhow::Error) -> Self {
        HubError::Internal(format!("Anyhow error: {}", err))
    }
}
