use thiserror::Error;

use crate::bencode::BencodeError;

/// Errors that can occur when loading torrent metadata.
///
/// These are surfaced to whoever asked for the torrent to be loaded.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The torrent file contains invalid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// A required field is missing from the torrent file.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field has an invalid value or type.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The info hash has an invalid length.
    #[error("invalid info hash length")]
    InvalidInfoHashLength,

    /// The torrent uses a layout this engine was configured not to load.
    #[error("unsupported torrent version: {0}")]
    UnsupportedVersion(&'static str),

    /// A file path escapes the torrent directory.
    #[error("unsafe path component in {0}")]
    UnsafePath(String),
}
