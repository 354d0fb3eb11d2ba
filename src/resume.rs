//! Fast-resume snapshots.
//!
//! A snapshot records which pieces of a torrent were verified so a restart
//! can skip re-hashing. It is a bencoded dictionary:
//!
//! | Key | Value |
//! |-----|-------|
//! | `bitfield` | packed piece bitfield |
//! | `bitfield_length` | number of pieces |
//! | `infohash` | 20-byte info hash |
//! | `version` | `1` |
//!
//! # Examples
//!
//! ```
//! use btengine::bitfield::Bitfield;
//! use btengine::metainfo::InfoHash;
//! use btengine::resume::FastResume;
//!
//! let mut have = Bitfield::new(10);
//! have.set(3, true);
//! let snapshot = FastResume::new(InfoHash([7u8; 20]), have);
//!
//! let restored = FastResume::decode(&snapshot.encode()).unwrap();
//! assert_eq!(restored, snapshot);
//! ```

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::bencode::{self, BencodeError, Dict, Value};
use crate::bitfield::Bitfield;
use crate::constants::FAST_RESUME_VERSION;
use crate::metainfo::InfoHash;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing or invalid key: {0}")]
    MissingKey(&'static str),

    #[error("unsupported resume version {0}")]
    UnsupportedVersion(i64),

    #[error("invalid bitfield: {0}")]
    InvalidBitfield(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastResume {
    pub info_hash: InfoHash,
    pub bitfield: Bitfield,
}

impl FastResume {
    pub fn new(info_hash: InfoHash, bitfield: Bitfield) -> Self {
        Self {
            info_hash,
            bitfield,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut dict = Dict::with_capacity(4);
        dict.insert("bitfield", Value::Bytes(self.bitfield.to_bytes()));
        dict.insert("bitfield_length", Value::Integer(self.bitfield.len() as i64));
        dict.insert("infohash", Value::bytes(self.info_hash.as_bytes()));
        dict.insert("version", Value::Integer(FAST_RESUME_VERSION));
        Value::Dict(dict)
    }

    pub fn from_value(value: &Value) -> Result<Self, ResumeError> {
        let dict = value.as_dict().ok_or(ResumeError::MissingKey("root dict"))?;

        let version = dict
            .get(b"version")
            .and_then(Value::as_integer)
            .ok_or(ResumeError::MissingKey("version"))?;
        if version != FAST_RESUME_VERSION {
            return Err(ResumeError::UnsupportedVersion(version));
        }

        let info_hash = dict
            .get(b"infohash")
            .and_then(Value::as_bytes)
            .and_then(|b| InfoHash::from_bytes(b).ok())
            .ok_or(ResumeError::MissingKey("infohash"))?;

        let length = dict
            .get(b"bitfield_length")
            .and_then(Value::as_integer)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(ResumeError::MissingKey("bitfield_length"))?;

        let packed = dict
            .get(b"bitfield")
            .and_then(Value::as_bytes)
            .ok_or(ResumeError::MissingKey("bitfield"))?;
        let bitfield = Bitfield::from_bytes(packed, length)
            .map_err(|e| ResumeError::InvalidBitfield(e.to_string()))?;

        Ok(Self {
            info_hash,
            bitfield,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        bencode::encode(&self.to_value())
    }

    pub fn decode(data: &[u8]) -> Result<Self, ResumeError> {
        Self::from_value(&bencode::decode(data)?)
    }

    /// Writes the snapshot next to `path` and renames it into place, so a
    /// crash never leaves a truncated file behind.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ResumeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("resume.tmp");
        tokio::fs::write(&tmp, self.encode()).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(info_hash = %self.info_hash, path = %path.display(), "saved resume data");
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ResumeError> {
        let data = tokio::fs::read(path.as_ref()).await?;
        Self::decode(&data)
    }
}
