//! Error taxonomy for the ingestion boundary.
//!
//! Connection handles report `ConnectionError` from `open` and `ReadError` from
//! `read_frame`. The capture loop folds both into `IngestError`, which is what the
//! facade and the health report surface.

use std::time::Duration;

use thiserror::Error;

/// Failure to open a connection handle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The source identifier can never be opened (bad URI, unsupported scheme,
    /// backend not compiled in). Never retried.
    #[error("invalid source configuration: {0}")]
    Configuration(String),

    /// The source exists but could not be reached right now.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single `read_frame` call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    /// No frame arrived within the configured read timeout.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// A frame arrived but could not be decoded or normalized.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// The underlying transport is gone.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl ReadError {
    /// Transient failures are counted and skipped; connection loss escalates.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::ConnectionLost(_))
    }
}

/// Errors surfaced by the ingestion subsystem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// Invalid or unopenable source; fatal and reported from `start()`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single failed or malformed read.
    #[error("transient read error: {0}")]
    TransientRead(String),

    /// The transport went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The reconnect budget ran out without a successful read.
    #[error("reconnect attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),
}

impl From<ConnectionError> for IngestError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Configuration(reason) => Self::Configuration(reason),
            ConnectionError::Unavailable(reason) => Self::ConnectionLost(reason),
        }
    }
}

impl From<ReadError> for IngestError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::ConnectionLost(reason) => Self::ConnectionLost(reason),
            other => Self::TransientRead(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_loss_escalates() {
        assert!(ReadError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ReadError::Decode("bad jpeg".into()).is_transient());
        assert!(!ReadError::ConnectionLost("eof".into()).is_transient());
    }

    #[test]
    fn configuration_errors_keep_their_class() {
        let err: IngestError = ConnectionError::Configuration("ftp://cam".into()).into();
        assert!(matches!(err, IngestError::Configuration(_)));

        let err: IngestError = ConnectionError::Unavailable("refused".into()).into();
        assert!(matches!(err, IngestError::ConnectionLost(_)));
    }
}
