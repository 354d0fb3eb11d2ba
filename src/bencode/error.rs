use thiserror::Error;

/// A malformed bencoded buffer.
///
/// Always recoverable: the offending message (or connection) is dropped and
/// nothing else is affected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected byte 0x{byte:02x} at offset {position}")]
    UnexpectedByte { byte: u8, position: usize },

    #[error("dictionary key is not a byte string")]
    NonStringKey,

    #[error("dictionary keys are not in ascending order")]
    UnsortedKeys,

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },
}
