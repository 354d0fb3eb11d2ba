//! Peer wire protocol (BEP-3, BEP-6, BEP-10)
//!
//! Message framing for the base protocol, the fast extension and the
//! extension protocol with its `ut_pex` and `ut_metadata` payloads, plus a
//! framed transport that enforces negotiated capabilities and rate limits.

mod capabilities;
mod error;
mod extension;
mod fast;
mod message;
mod metadata;
mod transport;

pub use capabilities::PeerCapabilities;
pub use error::PeerError;
pub use extension::{ExtensionHandshake, ExtensionMessage, UT_METADATA, UT_PEX};
pub use fast::{generate_allowed_fast_set, FastState};
pub use message::{Handshake, Message, MessageId, PeerId};
pub use metadata::{
    metadata_piece, metadata_piece_count, metadata_piece_size, MetadataMessage,
    MetadataMessageType,
};
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
