use super::capabilities::PeerCapabilities;
use super::error::PeerError;
use super::extension::ExtensionMessage;
use crate::constants::{CLIENT_PREFIX, HANDSHAKE_LEN, PROTOCOL_STRING};
use crate::metainfo::InfoHash;
use crate::picker::BlockRequest;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng as _;
use std::fmt;

/// The 20-byte id a client sends in its handshake.
///
/// Ours is `CLIENT_PREFIX` followed by 12 random bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill(&mut id[CLIENT_PREFIX.len()..]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Client and version from an Azureus-style `-XX0000-` prefix.
    pub fn client_id(&self) -> Option<&str> {
        if self.0[0] != b'-' || self.0[7] != b'-' {
            return None;
        }
        std::str::from_utf8(&self.0[1..7]).ok()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id() {
            Some(client) => write!(f, "PeerId({client})"),
            None => write!(f, "PeerId({:02x?})", &self.0[..8]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
    // Fast extension (BEP-6)
    Suggest = 13,
    HaveAll = 14,
    HaveNone = 15,
    Reject = 16,
    AllowedFast = 17,
    // Extension protocol (BEP-10)
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            13 => Ok(MessageId::Suggest),
            14 => Ok(MessageId::HaveAll),
            15 => Ok(MessageId::HaveNone),
            16 => Ok(MessageId::Reject),
            17 => Ok(MessageId::AllowedFast),
            20 => Ok(MessageId::Extended),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

impl MessageId {
    /// Payload size after the id byte for fixed-size messages.
    fn fixed_payload_len(self) -> Option<usize> {
        match self {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested
            | MessageId::HaveAll
            | MessageId::HaveNone => Some(0),
            MessageId::Have | MessageId::Suggest | MessageId::AllowedFast => Some(4),
            MessageId::Request | MessageId::Cancel | MessageId::Reject => Some(12),
            MessageId::Port => Some(2),
            MessageId::Bitfield | MessageId::Piece | MessageId::Extended => None,
        }
    }
}

/// The fixed 68-byte opening of every peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub reserved: [u8; 8],
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self::with_capabilities(info_hash, peer_id, PeerCapabilities::all())
    }

    pub fn with_capabilities(info_hash: InfoHash, peer_id: PeerId, caps: PeerCapabilities) -> Self {
        Self {
            info_hash,
            peer_id,
            reserved: caps.to_reserved(),
        }
    }

    pub fn capabilities(&self) -> PeerCapabilities {
        PeerCapabilities::from_reserved(&self.reserved)
    }

    pub fn supports_extension_protocol(&self) -> bool {
        self.capabilities().extension_protocol
    }

    pub fn supports_fast_extension(&self) -> bool {
        self.capabilities().fast
    }

    pub fn supports_dht(&self) -> bool {
        self.capabilities().dht
    }

    pub fn byte_length(&self) -> usize {
        HANDSHAKE_LEN
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() != HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }

        if data[0] != 19 || &data[1..20] != PROTOCOL_STRING {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let info_hash =
            InfoHash::from_bytes(&data[28..48]).map_err(|_| PeerError::InvalidHandshake)?;
        let peer_id = data[48..68]
            .try_into()
            .map(PeerId)
            .map_err(|_| PeerError::InvalidHandshake)?;

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire message (BEP-3, BEP-6, BEP-10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
    // Fast extension
    Suggest { piece: u32 },
    HaveAll,
    HaveNone,
    Reject { index: u32, begin: u32, length: u32 },
    AllowedFast { piece: u32 },
    // Extension protocol; `id` is the sub-id the receiver asked for.
    Extended { id: u8, message: ExtensionMessage },
}

impl Message {
    pub fn request(req: &BlockRequest) -> Self {
        Message::Request {
            index: req.piece,
            begin: req.offset,
            length: req.length,
        }
    }

    pub fn cancel(req: &BlockRequest) -> Self {
        Message::Cancel {
            index: req.piece,
            begin: req.offset,
            length: req.length,
        }
    }

    pub fn reject(req: &BlockRequest) -> Self {
        Message::Reject {
            index: req.piece,
            begin: req.offset,
            length: req.length,
        }
    }

    pub fn id(&self) -> Option<MessageId> {
        Some(match self {
            Message::KeepAlive => return None,
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
            Message::Cancel { .. } => MessageId::Cancel,
            Message::Port(_) => MessageId::Port,
            Message::Suggest { .. } => MessageId::Suggest,
            Message::HaveAll => MessageId::HaveAll,
            Message::HaveNone => MessageId::HaveNone,
            Message::Reject { .. } => MessageId::Reject,
            Message::AllowedFast { .. } => MessageId::AllowedFast,
            Message::Extended { .. } => MessageId::Extended,
        })
    }

    /// True for messages that only exist with the fast extension.
    pub fn requires_fast(&self) -> bool {
        matches!(
            self,
            Message::Suggest { .. }
                | Message::HaveAll
                | Message::HaveNone
                | Message::Reject { .. }
                | Message::AllowedFast { .. }
        )
    }

    pub fn requires_extension_protocol(&self) -> bool {
        matches!(self, Message::Extended { .. })
    }

    /// Total encoded size, length prefix included.
    pub fn byte_length(&self) -> usize {
        4 + match self {
            Message::KeepAlive => 0,
            Message::Bitfield(bits) => 1 + bits.len(),
            Message::Piece { data, .. } => 9 + data.len(),
            Message::Extended { message, .. } => 2 + message.encoded_len(),
            other => match other.id().and_then(MessageId::fixed_payload_len) {
                Some(len) => 1 + len,
                None => 0,
            },
        }
    }

    /// Writes the framed message to `buf`.
    pub fn encode_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32((self.byte_length() - 4) as u32);

        let Some(id) = self.id() else {
            return;
        };
        buf.put_u8(id as u8);

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::HaveAll
            | Message::HaveNone => {}
            Message::Have { piece }
            | Message::Suggest { piece }
            | Message::AllowedFast { piece } => buf.put_u32(*piece),
            Message::Bitfield(bits) => buf.put_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            }
            | Message::Reject {
                index,
                begin,
                length,
            } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Port(port) => buf.put_u16(*port),
            Message::Extended { id, message } => {
                buf.put_u8(*id);
                message.encode_to(buf);
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.byte_length());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Encodes into `buf` starting at `offset`, returning the bytes written.
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) -> Result<usize, PeerError> {
        let len = self.byte_length();
        let available = buf.len().saturating_sub(offset);
        if available < len {
            return Err(PeerError::InvalidMessage(format!(
                "buffer too small: need {len} bytes, have {available}"
            )));
        }
        let mut window = &mut buf[offset..offset + len];
        self.encode_to(&mut window);
        Ok(len)
    }

    /// Encodes the message if the connection negotiated the features it needs.
    pub fn encode_for(&self, caps: &PeerCapabilities) -> Result<Bytes, PeerError> {
        self.check_allowed(caps)?;
        Ok(self.encode())
    }

    pub fn check_allowed(&self, caps: &PeerCapabilities) -> Result<(), PeerError> {
        if self.requires_fast() && !caps.fast {
            return Err(PeerError::Protocol(format!(
                "{:?} requires the fast extension",
                self.id()
            )));
        }
        if self.requires_extension_protocol() && !caps.extension_protocol {
            return Err(PeerError::Protocol(
                "extended messages require the extension protocol".into(),
            ));
        }
        Ok(())
    }

    /// Decodes one complete frame, length prefix included.
    ///
    /// The frame must hold exactly one message, and fixed-size messages must
    /// have exactly their fixed size.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;

        if data.remaining() != length {
            return Err(PeerError::InvalidMessage(format!(
                "length prefix {} but {} bytes follow",
                length,
                data.remaining()
            )));
        }

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(data.get_u8())?;
        let payload_len = length - 1;

        if let Some(expected) = id.fixed_payload_len() {
            if payload_len != expected {
                return Err(PeerError::InvalidMessage(format!(
                    "{:?} payload must be {} bytes, got {}",
                    id, expected, payload_len
                )));
            }
        }

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => Ok(Message::Have {
                piece: data.get_u32(),
            }),
            MessageId::Bitfield => Ok(Message::Bitfield(data)),
            MessageId::Request => Ok(Message::Request {
                index: data.get_u32(),
                begin: data.get_u32(),
                length: data.get_u32(),
            }),
            MessageId::Piece => {
                if payload_len < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                Ok(Message::Piece { index, begin, data })
            }
            MessageId::Cancel => Ok(Message::Cancel {
                index: data.get_u32(),
                begin: data.get_u32(),
                length: data.get_u32(),
            }),
            MessageId::Port => Ok(Message::Port(data.get_u16())),
            MessageId::Suggest => Ok(Message::Suggest {
                piece: data.get_u32(),
            }),
            MessageId::HaveAll => Ok(Message::HaveAll),
            MessageId::HaveNone => Ok(Message::HaveNone),
            MessageId::Reject => Ok(Message::Reject {
                index: data.get_u32(),
                begin: data.get_u32(),
                length: data.get_u32(),
            }),
            MessageId::AllowedFast => Ok(Message::AllowedFast {
                piece: data.get_u32(),
            }),
            MessageId::Extended => {
                if payload_len < 1 {
                    return Err(PeerError::InvalidMessage("extended too short".into()));
                }
                let ext_id = data.get_u8();
                let message = ExtensionMessage::decode(ext_id, &data)?;
                Ok(Message::Extended {
                    id: ext_id,
                    message,
                })
            }
        }
    }
}
