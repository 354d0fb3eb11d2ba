use super::error::PeerError;
use super::metadata::MetadataMessage;
use crate::bencode::{self, Dict, Value};
use crate::constants::{
    CLIENT_NAME, EXTENSION_HANDSHAKE_ID, MAX_UPLOAD_QUEUE, UT_METADATA_ID, UT_PEX_ID,
};
use crate::pex::PexMessage;
use bytes::{BufMut, Bytes};
use std::collections::BTreeMap;

pub const UT_PEX: &str = "ut_pex";
pub const UT_METADATA: &str = "ut_metadata";

/// The BEP-10 extension handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHandshake {
    /// Extension name to the message id the sender wants to receive it on.
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
    pub listen_port: Option<u16>,
    pub yourip: Option<Bytes>,
    pub reqq: Option<i64>,
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handshake this engine sends.
    pub fn local(metadata_size: Option<usize>) -> Self {
        let mut hs = Self::with_extensions(&[(UT_PEX, UT_PEX_ID), (UT_METADATA, UT_METADATA_ID)]);
        hs.client = Some(CLIENT_NAME.to_string());
        hs.reqq = Some(MAX_UPLOAD_QUEUE as i64);
        hs.metadata_size = metadata_size.map(|s| s as i64);
        hs
    }

    pub fn with_extensions(extensions: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.insert((*name).to_string(), *id);
        }
        hs
    }

    /// Builds the handshake dictionary, keys in sorted order.
    pub fn to_value(&self) -> Value {
        let mut dict = Dict::new();

        let m: Dict = self
            .extensions
            .iter()
            .map(|(name, id)| (Bytes::copy_from_slice(name.as_bytes()), Value::Integer(*id as i64)))
            .collect();
        dict.insert("m", m);

        if let Some(size) = self.metadata_size {
            dict.insert("metadata_size", size);
        }
        if let Some(port) = self.listen_port {
            dict.insert("p", port as i64);
        }
        if let Some(reqq) = self.reqq {
            dict.insert("reqq", reqq);
        }
        if let Some(ref client) = self.client {
            dict.insert("v", client.as_str());
        }
        if let Some(ref ip) = self.yourip {
            dict.insert("yourip", ip.clone());
        }

        Value::Dict(dict)
    }

    pub fn from_value(value: &Value) -> Result<Self, PeerError> {
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("expected dict".into()))?;

        let mut hs = Self::new();

        if let Some(m) = dict.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m.iter() {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    // Id 0 disables the extension.
                    if let Ok(id @ 1..) = u8::try_from(id) {
                        hs.extensions.insert(name.to_string(), id);
                    }
                }
            }
        }

        hs.client = dict.get(b"v").and_then(|v| v.as_str()).map(String::from);
        hs.listen_port = dict
            .get(b"p")
            .and_then(|v| v.as_integer())
            .and_then(|p| u16::try_from(p).ok());
        hs.yourip = dict.get(b"yourip").and_then(|v| v.as_bytes()).cloned();
        hs.reqq = dict.get(b"reqq").and_then(|v| v.as_integer());
        hs.metadata_size = dict.get(b"metadata_size").and_then(|v| v.as_integer());

        Ok(hs)
    }

    pub fn get_extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }
}

/// Payload of an extended (id 20) message.
///
/// Which variant a payload decodes to depends on the sub-id it arrived on;
/// peers address us with the ids from our own handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionMessage {
    Handshake(ExtensionHandshake),
    Pex(PexMessage),
    Metadata(MetadataMessage),
    /// A sub-id we never advertised; kept raw and ignored.
    Unknown(Bytes),
}

impl ExtensionMessage {
    pub fn decode(id: u8, payload: &[u8]) -> Result<Self, PeerError> {
        match id {
            EXTENSION_HANDSHAKE_ID => Ok(ExtensionMessage::Handshake(
                ExtensionHandshake::from_value(&bencode::decode(payload)?)?,
            )),
            UT_PEX_ID => Ok(ExtensionMessage::Pex(PexMessage::decode(payload)?)),
            UT_METADATA_ID => Ok(ExtensionMessage::Metadata(MetadataMessage::decode(payload)?)),
            _ => Ok(ExtensionMessage::Unknown(Bytes::copy_from_slice(payload))),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            ExtensionMessage::Handshake(hs) => hs.to_value().encoded_len(),
            ExtensionMessage::Pex(pex) => pex.encoded_len(),
            ExtensionMessage::Metadata(md) => md.encoded_len(),
            ExtensionMessage::Unknown(payload) => payload.len(),
        }
    }

    pub fn encode_to<B: BufMut>(&self, buf: &mut B) {
        match self {
            ExtensionMessage::Handshake(hs) => bencode::encode_to(&hs.to_value(), buf),
            ExtensionMessage::Pex(pex) => bencode::encode_to(&pex.to_value(), buf),
            ExtensionMessage::Metadata(md) => md.encode_to(buf),
            ExtensionMessage::Unknown(payload) => buf.put_slice(payload),
        }
    }

    /// Name the remote peer knows this message by, if any.
    pub fn extension_name(&self) -> Option<&'static str> {
        match self {
            ExtensionMessage::Pex(_) => Some(UT_PEX),
            ExtensionMessage::Metadata(_) => Some(UT_METADATA),
            _ => None,
        }
    }
}
