//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! A message is a bencoded dictionary, optionally followed by a raw piece
//! of the info dictionary for `data` messages.

use bytes::{BufMut, Bytes};

use super::error::PeerError;
use crate::bencode::{self, decode_prefix, Dict, Value};
use crate::constants::METADATA_PIECE_SIZE;

/// Message types for the ut_metadata extension (BEP-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_integer(v: i64) -> Option<Self> {
        match v {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Size of the whole info dictionary; data messages only.
    pub total_size: Option<u32>,
    /// The metadata piece; data messages only.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: u32, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    fn header(&self) -> Value {
        let mut dict = Dict::with_capacity(3);
        dict.insert("msg_type", self.msg_type as i64);
        dict.insert("piece", self.piece as i64);
        if let Some(total_size) = self.total_size {
            dict.insert("total_size", total_size as i64);
        }
        Value::Dict(dict)
    }

    pub fn encoded_len(&self) -> usize {
        self.header().encoded_len() + self.data.as_ref().map_or(0, |d| d.len())
    }

    pub fn encode_to<B: BufMut>(&self, buf: &mut B) {
        bencode::encode_to(&self.header(), buf);
        if let Some(ref data) = self.data {
            buf.put_slice(data);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        Bytes::from(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let (value, consumed) = decode_prefix(payload)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("expected dict".into()))?;

        let msg_type = dict
            .get(b"msg_type")
            .and_then(|v| v.as_integer())
            .and_then(MetadataMessageType::from_integer)
            .ok_or_else(|| PeerError::Extension("invalid msg_type".into()))?;

        let piece = dict
            .get(b"piece")
            .and_then(|v| v.as_integer())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| PeerError::Extension("missing piece".into()))?;

        let total_size = dict
            .get(b"total_size")
            .and_then(|v| v.as_integer())
            .and_then(|v| u32::try_from(v).ok());

        let rest = &payload[consumed..];
        let data = match msg_type {
            MetadataMessageType::Data => Some(Bytes::copy_from_slice(rest)),
            _ if !rest.is_empty() => {
                return Err(PeerError::Extension("trailing bytes after metadata header".into()))
            }
            _ => None,
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Number of metadata pieces for a given metadata size.
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Size of a specific metadata piece.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

/// Slices piece `piece` out of a raw info dictionary, if it exists.
pub fn metadata_piece(raw_info: &Bytes, piece: u32) -> Option<Bytes> {
    let size = metadata_piece_size(piece, raw_info.len());
    if size == 0 {
        return None;
    }
    let offset = piece as usize * METADATA_PIECE_SIZE;
    Some(raw_info.slice(offset..offset + size))
}
