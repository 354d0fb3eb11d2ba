//! Torrent metainfo handling ([BEP-3], [BEP-52]).
//!
//! A torrent file (`.torrent`) is a bencoded dictionary:
//!
//! - **info** - Core torrent metadata (hashed to create the info hash)
//!   - `name` - Suggested file/directory name
//!   - `piece length` - Size of each piece in bytes
//!   - `pieces` - Concatenated SHA1 hashes of each piece (v1)
//!   - `length` or `files` - Single-file length or file list (v1)
//!   - `file tree` / `meta version` - Per-file merkle roots (v2)
//! - **announce** / **announce-list** - Trackers
//! - **creation date**, **comment**, **created by**
//!
//! v2 and hybrid layouts load only when [`LoadOptions::supports_v2`] is set.
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-52]: http://bittorrent.org/beps/bep_0052.html

mod error;
mod file_tree;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use file_tree::{FileTree, FileTreeEntry, FlattenedFile};
pub use info_hash::{InfoHash, InfoHashV2, InfoHashes};
pub use torrent::{File, Info, LoadOptions, Metainfo, TorrentVersion};

pub(crate) use info_hash::hex_encode;
