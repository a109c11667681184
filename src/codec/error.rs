//! Codec error types

use thiserror::Error;

/// Errors raised while decoding a log entry
///
/// Any of these is fatal for the entry: a partially-typed mutation must never
/// be applied, so the materializer surfaces the error instead of skipping.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Buffer shorter than the frame header
    #[error("truncated frame: {len} bytes")]
    Truncated { len: usize },

    /// CRC checksum mismatch
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Unknown mutation kind discriminator
    #[error("unknown mutation kind: {0}")]
    UnknownKind(u8),

    /// Declared body length disagrees with the buffer
    #[error("length mismatch: header declares {declared} body bytes, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Body deserialization failure
    #[error("invalid mutation body: {0}")]
    Body(String),
}

/// Errors raised while encoding a mutation
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Body serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Body exceeds the frame size limit
    #[error("mutation too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result type for encode operations
pub type EncodeResult<T> = Result<T, EncodeError>;
