//! Runtime error types.

use cn_dbc::{CodecError, DatabaseError};
use thiserror::Error;

/// Errors returned by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Bus busy, arbitration loss, read timeout... The loop keeps going.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Device gone or unusable. Ends the loop that hit it.
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// End of stream.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Transient(_))
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the scheduler, dispatcher and runner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("unknown message id 0x{0:X}")]
    UnknownMessage(u32),

    #[error("transport error (transient): {0}")]
    TransportTransient(String),

    #[error("transport error (fatal): {0}")]
    TransportFatal(String),

    #[error("runner already stopped")]
    AlreadyStopped,

    #[error("runner already running")]
    AlreadyRunning,

    #[error("message 0x{id:X} is not transmitted by node {node}")]
    NotTransmitted { id: u32, node: String },

    #[error("message 0x{0:X} is already scheduled")]
    AlreadyScheduled(u32),

    #[error("message 0x{0:X} is not scheduled")]
    NotScheduled(u32),

    #[error("message 0x{0:X} has no transmission period")]
    NoPeriod(u32),

    #[error("message 0x{id:X} is {length} bytes; transport carries at most {max}")]
    FrameTooLong { id: u32, length: usize, max: usize },
}

impl RunnerError {
    /// Whether this error ends the loop that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunnerError::TransportFatal(_))
    }
}

impl From<TransportError> for RunnerError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Transient(msg) => RunnerError::TransportTransient(msg),
            TransportError::Fatal(msg) => RunnerError::TransportFatal(msg),
            TransportError::Closed => RunnerError::TransportFatal("transport closed".into()),
        }
    }
}

/// Convenience alias for runner results.
pub type RunnerResult<T> = Result<T, RunnerError>;
