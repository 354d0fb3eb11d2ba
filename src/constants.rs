//! Protocol constants and tuning parameters.
//!
//! Values follow the defaults of popular clients (libtorrent, qBittorrent,
//! Transmission) unless a BEP fixes them.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-BE0001-";

/// Client name advertised in the extension handshake (`v`)
pub const CLIENT_NAME: &str = "btengine/0.1.0";

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Metadata piece size (BEP-9)
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16777216;

// ============================================================================
// Request pipelining
// ============================================================================

/// Maximum outstanding block requests per peer.
pub const MAX_REQUESTS_PER_PEER: usize = 250;

/// Maximum peers holding the same block request during endgame.
pub const ENDGAME_DUPLICATES: usize = 2;

/// Requests a remote peer may queue with us before we start rejecting (`reqq`).
pub const MAX_UPLOAD_QUEUE: usize = 250;

/// Default number of allowed fast pieces (BEP-6)
pub const DEFAULT_ALLOWED_FAST_COUNT: usize = 10;

// ============================================================================
// Timeouts
// ============================================================================

/// Outgoing connection timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake timeout after TCP connect (libtorrent default: 10s)
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer read timeout
pub const PEER_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Peer write timeout
pub const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// DHT query timeout
pub const DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Bandwidth
// ============================================================================

/// Pause between token checks while waiting on a rate limiter
pub const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Intervals averaged by a speed monitor
pub const SPEED_MONITOR_SAMPLES: usize = 12;

/// Bytes queued for disk before network reads pause (8MB)
pub const DEFAULT_DISK_WRITE_BACKLOG: u64 = 8 * 1024 * 1024;

// ============================================================================
// DHT constants
// ============================================================================

/// DHT bucket size (k value in Kademlia)
pub const DHT_BUCKET_SIZE: usize = 8;

/// Number of DHT buckets (160 for SHA-1)
pub const DHT_NUM_BUCKETS: usize = 160;

/// Maximum pending DHT queries
pub const MAX_PENDING_DHT_QUERIES: usize = 1024;

/// Capacity of the DHT outbound and event channels
pub const DHT_CHANNEL_CAPACITY: usize = 256;

/// Announce-token secret rotation interval (BEP-5 recommends 5 minutes)
pub const DHT_TOKEN_ROTATION: Duration = Duration::from_secs(300);

/// Announced peers expire after this long without a re-announce
pub const DHT_PEER_TTL: Duration = Duration::from_secs(30 * 60);

/// Maximum peers stored per info hash
pub const DHT_MAX_PEERS_PER_TORRENT: usize = 2000;

/// Peers returned in a single get_peers response
pub const DHT_MAX_PEERS_PER_RESPONSE: usize = 50;

/// Compact node info length (20-byte id + IPv4 + port)
pub const COMPACT_NODE_LEN: usize = 26;

/// Compact peer info length (IPv4 + port)
pub const COMPACT_PEER_LEN: usize = 6;

// ============================================================================
// PEX constants
// ============================================================================

/// Maximum IPv4 peers in PEX message
pub const PEX_MAX_IPV4_PEERS: usize = 50;

/// Maximum IPv6 peers in PEX message
pub const PEX_MAX_IPV6_PEERS: usize = 50;

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the peer handshake
pub const HANDSHAKE_LEN: usize = 68;

/// Extension protocol bit (BEP-10), reserved byte 5
pub const EXTENSION_BIT: u8 = 0x10;

/// DHT support bit (BEP-5), reserved byte 7
pub const DHT_BIT: u8 = 0x01;

/// Fast extension bit (BEP-6), reserved byte 7
pub const FAST_EXTENSION_BIT: u8 = 0x04;

/// Extension handshake message ID
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Our ut_pex extension ID
pub const UT_PEX_ID: u8 = 1;

/// Our ut_metadata extension ID
pub const UT_METADATA_ID: u8 = 2;

// ============================================================================
// Resume data
// ============================================================================

/// Fast-resume format version
pub const FAST_RESUME_VERSION: i64 = 1;
