//! Codec and database error types.

use thiserror::Error;

/// Errors raised while packing or unpacking a single message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("signal {signal}: value {value} outside [{min}, {max}]")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("signal {signal}: raw value {raw} does not fit in {length} bits")]
    RawOutOfRange {
        signal: String,
        raw: f64,
        length: u8,
    },

    #[error("message {message}: missing value for signal {signal}")]
    MissingSignal { message: String, signal: String },

    #[error("message 0x{id:X}: frame has {actual} bytes, expected {expected}")]
    FrameTooShort {
        id: u32,
        expected: usize,
        actual: usize,
    },
}

/// Convenience alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while building a [`Database`](crate::Database).
///
/// All of these are construction-time failures: no runtime loop can start
/// against a database that failed to build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
    #[error("duplicate message id 0x{id:X} ({first} and {second})")]
    DuplicateMessageId {
        id: u32,
        first: String,
        second: String,
    },

    #[error("duplicate message name {0}")]
    DuplicateMessageName(String),

    #[error("message {message}: invalid length {length} (expected 1..=64 bytes)")]
    InvalidLength { message: String, length: usize },

    #[error("message {message}: signal {signal} is invalid: {reason}")]
    InvalidSignal {
        message: String,
        signal: String,
        reason: String,
    },

    #[error("message {message}: signal {signal} does not fit in {length} bytes")]
    SignalOutOfFrame {
        message: String,
        signal: String,
        length: usize,
    },

    #[error("message {message}: signals {first} and {second} overlap at bit {bit}")]
    OverlappingSignals {
        message: String,
        first: String,
        second: String,
        bit: usize,
    },

    #[error("message {message}: more than one multiplexor ({first}, {second})")]
    MultipleSelectors {
        message: String,
        first: String,
        second: String,
    },

    #[error("message {message}: signal {signal} is multiplexed but the message has no multiplexor")]
    MissingSelector { message: String, signal: String },

    #[error("database JSON error: {0}")]
    Json(String),
}

/// Convenience alias for database construction results.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
