//! Error types for Burrow.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Missing Request-ID header")]
    MissingCorrelationId,

    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    #[error("Unknown or retired request id: {0}")]
    UnknownId(String),

    #[error("Request queue full ({0} pending)")]
    QueueFull(usize),

    #[error("Body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// HTTP status the relay answers with when this error reaches a caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Protocol(_) | Error::MissingCorrelationId | Error::Json(_) => 400,
            Error::UnknownId(_) => 404,
            Error::DuplicateId(_) => 409,
            Error::BodyTooLarge(_) => 413,
            Error::Connection(_) => 502,
            Error::QueueFull(_) => 503,
            Error::Timeout => 504,
            Error::Config(_) | Error::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::MissingCorrelationId.status_code(), 400);
        assert_eq!(Error::UnknownId("x".into()).status_code(), 404);
        assert_eq!(Error::DuplicateId("x".into()).status_code(), 409);
        assert_eq!(Error::QueueFull(3).status_code(), 503);
        assert_eq!(Error::Timeout.status_code(), 504);
    }
}
