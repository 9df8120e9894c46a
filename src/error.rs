use thiserror::Error;

/// Reasons a datagram could not be decoded. Network loops drop such packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad magic cookie {0:#010x}")]
    BadMagic(u32),
    #[error("unknown message type {0:#04x}")]
    BadTag(u8),
    #[error("truncated message: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// An invalid test plan, rejected before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} is not a non-negative integer: {value:?}")]
    NotANumber { field: &'static str, value: String },
    #[error("transfer size must be positive")]
    ZeroSize,
    #[error("at least one TCP or UDP connection is required")]
    NoConnections,
    #[error("{field} exceeds the limit of {limit} connections")]
    TooManyConnections { field: &'static str, limit: usize },
}

#[derive(Debug, Error)]
pub enum LanspeedError {
    #[error("invalid test plan: {0}")]
    Config(#[from] ConfigError),
    #[error("bad size line: {0:?}")]
    BadSizeLine(String),
    #[error("operation timed out")]
    Timeout,
    #[error("serialize error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tokio::time::error::Elapsed> for LanspeedError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LanspeedError::Timeout
    }
}

pub type Result<T> = std::result::Result<T, LanspeedError>;
