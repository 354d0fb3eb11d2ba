//! btengine - the core of a BitTorrent client
//!
//! Wire formats, piece selection and bandwidth control, without sockets to
//! trackers or disk storage. Callers feed decoded messages in and get encoded
//! messages and events back.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`metainfo`] - BEP-3/52 Torrent metainfo, v1, v2 and hybrid
//! - [`peer`] - BEP-3/6/10 Peer wire protocol, fast extension, extension protocol
//! - [`pex`] - BEP-11 Peer Exchange
//! - [`dht`] - BEP-5 KRPC messages and the DHT query engine
//! - [`picker`] - Rarest-first, prioritised and endgame piece selection
//! - [`torrent`] - Per-torrent peer arena and message handling
//! - [`bandwidth`] - Token-bucket rate limiting
//! - [`resume`] - Fast-resume snapshots
//! - [`connection`] - Connection factories and the peer handshake
//! - [`settings`] - Engine configuration
//!
//! # Logging
//!
//! Diagnostics go through [`tracing`]; installing a subscriber is left to the
//! application.

pub mod bandwidth;
pub mod bencode;
pub mod bitfield;
pub mod connection;
pub mod constants;
pub mod dht;
pub mod metainfo;
pub mod peer;
pub mod pex;
pub mod picker;
pub mod resume;
pub mod settings;
pub mod torrent;

pub use bandwidth::{RateLimit, RateLimiter, RateLimiterGroup};
pub use bencode::{decode, encode, BencodeError, Value};
pub use bitfield::Bitfield;
pub use connection::{ConnectionError, ConnectionRegistry};
pub use dht::{DhtEngine, DhtError, DhtMessage, NodeId};
pub use metainfo::{InfoHash, LoadOptions, Metainfo, MetainfoError};
pub use peer::{Handshake, Message, PeerCapabilities, PeerError, PeerId};
pub use picker::{BlockRequest, PeerIndex, PiecePicker, PieceRequesterSettings, Priority};
pub use resume::{FastResume, ResumeError};
pub use settings::EngineSettings;
pub use torrent::{SharedTorrent, TorrentContext, TorrentEvent};
