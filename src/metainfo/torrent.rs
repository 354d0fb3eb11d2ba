use super::error::MetainfoError;
use super::file_tree::FileTree;
use super::info_hash::{InfoHash, InfoHashV2, InfoHashes};
use crate::bencode::{decode, encode, Dict, Value};
use bytes::Bytes;
use std::path::{Component, PathBuf};

/// The version of a torrent file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TorrentVersion {
    /// BitTorrent v1 (BEP-3) - SHA1 piece hashes.
    V1,
    /// BitTorrent v2 (BEP-52) - per-file merkle roots.
    V2,
    /// Hybrid torrent (BEP-47) - both layouts in one info dict.
    Hybrid,
}

impl TorrentVersion {
    pub fn supports_v1(&self) -> bool {
        matches!(self, TorrentVersion::V1 | TorrentVersion::Hybrid)
    }

    pub fn supports_v2(&self) -> bool {
        matches!(self, TorrentVersion::V2 | TorrentVersion::Hybrid)
    }
}

/// Switches that decide which metadata layouts may be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Accept BEP-52 fields (`file tree`, `meta version`, `pieces root`).
    pub supports_v2: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { supports_v2: true }
    }
}

/// A parsed torrent file.
///
/// # Examples
///
/// ```no_run
/// use btengine::metainfo::{LoadOptions, Metainfo};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data, &LoadOptions::default())?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Pieces: {}", metainfo.info.piece_count());
/// println!("Info hash: {}", metainfo.info_hashes.wire());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub info: Info,
    pub info_hashes: InfoHashes,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list ([BEP-12](http://bittorrent.org/beps/bep_0012.html)).
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<i64>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub version: TorrentVersion,
    raw_info: Bytes,
}

/// The info dictionary from a torrent file.
#[derive(Debug, Clone)]
pub struct Info {
    pub name: String,
    /// Number of bytes per piece.
    pub piece_length: u64,
    /// SHA1 hash of each piece. Empty for v2-only torrents.
    pub pieces: Vec<[u8; 20]>,
    pub files: Vec<File>,
    /// Sum of all file lengths.
    pub total_length: u64,
    /// If true, clients should only use trackers in the metainfo (no DHT/PEX).
    pub private: bool,
    piece_count: u32,
}

/// A file within a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path relative to the download directory.
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of the file within the piece space.
    pub offset: u64,
    /// v2 merkle root, when the torrent carries one.
    pub pieces_root: Option<[u8; 32]>,
    /// True for BEP-47 padding files.
    pub padding: bool,
}

impl File {
    /// First and last (inclusive) piece indices this file touches.
    ///
    /// Empty files report the piece their offset falls in.
    pub fn piece_range(&self, piece_length: u64) -> (u32, u32) {
        let first = self.offset / piece_length;
        let last = if self.length == 0 {
            first
        } else {
            (self.offset + self.length - 1) / piece_length
        };
        (first as u32, last as u32)
    }
}

impl Info {
    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Length of piece `index`; only the final piece can be short.
    pub fn piece_size(&self, index: u32) -> u64 {
        let span = self.files.last().map(|f| f.offset + f.length).unwrap_or(0);
        let start = index as u64 * self.piece_length;
        span.saturating_sub(start).min(self.piece_length)
    }
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// # Errors
    ///
    /// Fails if the data is not valid bencode, a required field is missing
    /// or malformed, a path escapes the download directory, the piece hash
    /// count disagrees with the total length, or the torrent needs v2
    /// support while `options.supports_v2` is false.
    pub fn from_bytes(data: &[u8], options: &LoadOptions) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let info_value = dict
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or(MetainfoError::InvalidField("info"))?;

        // Dictionaries keep their decoded order, so this is the exact input.
        let raw_info = Bytes::from(encode(info_value));

        let has_pieces = info_dict.contains_key(b"pieces");
        let has_file_tree = info_dict.contains_key(b"file tree");
        let meta_version = info_dict.get(b"meta version").and_then(|v| v.as_integer());

        let version = match (has_pieces, has_file_tree || meta_version == Some(2)) {
            (true, true) => TorrentVersion::Hybrid,
            (false, true) => TorrentVersion::V2,
            (true, false) => TorrentVersion::V1,
            (false, false) => return Err(MetainfoError::MissingField("pieces")),
        };

        if version.supports_v2() && !options.supports_v2 {
            return Err(MetainfoError::UnsupportedVersion("v2 metadata is disabled"));
        }

        let info = parse_info(info_dict, version)?;

        let info_hashes = InfoHashes {
            v1: version
                .supports_v1()
                .then(|| InfoHash::from_info_bytes(&raw_info)),
            v2: version
                .supports_v2()
                .then(|| InfoHashV2::from_info_bytes(&raw_info)),
        };

        let announce = dict
            .get(b"announce")
            .and_then(|v| v.as_str())
            .map(String::from);

        let announce_list = dict
            .get(b"announce-list")
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let creation_date = dict.get(b"creation date").and_then(|v| v.as_integer());

        let comment = dict
            .get(b"comment")
            .and_then(|v| v.as_str())
            .map(String::from);

        let created_by = dict
            .get(b"created by")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            info,
            info_hashes,
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            version,
            raw_info,
        })
    }

    /// Returns the raw bencoded info dictionary.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Returns all tracker URLs from both `announce` and `announce-list`,
    /// primary first, without duplicates.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers = Vec::new();

        if let Some(ref announce) = self.announce {
            trackers.push(announce.clone());
        }

        for tier in &self.announce_list {
            for tracker in tier {
                if !trackers.contains(tracker) {
                    trackers.push(tracker.clone());
                }
            }
        }

        trackers
    }
}

fn parse_info(dict: &Dict, version: TorrentVersion) -> Result<Info, MetainfoError> {
    let name = dict
        .get(b"name")
        .and_then(|v| v.as_str())
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();
    check_component(&name)?;

    let piece_length = dict
        .get(b"piece length")
        .and_then(|v| v.as_integer())
        .ok_or(MetainfoError::MissingField("piece length"))?;
    if piece_length <= 0 {
        return Err(MetainfoError::InvalidField("piece length"));
    }
    let piece_length = piece_length as u64;

    let private = dict
        .get(b"private")
        .and_then(|v| v.as_integer())
        .map(|v| v == 1)
        .unwrap_or(false);

    let files = if version.supports_v1() {
        v1_files(dict, &name)?
    } else {
        if !piece_length.is_power_of_two() || piece_length < 16 * 1024 {
            return Err(MetainfoError::InvalidField("piece length"));
        }
        v2_files(dict, &name, piece_length)?
    };

    let total_length = files.iter().filter(|f| !f.padding).map(|f| f.length).sum();
    let span = files.last().map(|f| f.offset + f.length).unwrap_or(0);
    let piece_count = span.div_ceil(piece_length);
    if piece_count > u32::MAX as u64 {
        return Err(MetainfoError::InvalidField("piece length"));
    }

    let pieces = if version.supports_v1() {
        let pieces_bytes = dict
            .get(b"pieces")
            .and_then(|v| v.as_bytes())
            .ok_or(MetainfoError::InvalidField("pieces"))?;

        if pieces_bytes.len() % 20 != 0 || (pieces_bytes.len() / 20) as u64 != piece_count {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(chunk);
                arr
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
        private,
        piece_count: piece_count as u32,
    })
}

fn v1_files(dict: &Dict, name: &str) -> Result<Vec<File>, MetainfoError> {
    if let Some(length) = dict.get(b"length").and_then(|v| v.as_integer()) {
        if length < 0 {
            return Err(MetainfoError::InvalidField("length"));
        }
        return Ok(vec![File {
            path: PathBuf::from(name),
            length: length as u64,
            offset: 0,
            pieces_root: None,
            padding: false,
        }]);
    }

    let files_list = dict
        .get(b"files")
        .and_then(|v| v.as_list())
        .ok_or(MetainfoError::MissingField("length or files"))?;

    let mut files = Vec::with_capacity(files_list.len());
    let mut offset = 0u64;

    for file_value in files_list {
        let file_dict = file_value
            .as_dict()
            .ok_or(MetainfoError::InvalidField("files"))?;

        let length = file_dict
            .get(b"length")
            .and_then(|v| v.as_integer())
            .filter(|&l| l >= 0)
            .ok_or(MetainfoError::MissingField("file length"))? as u64;

        let path_list = file_dict
            .get(b"path")
            .and_then(|v| v.as_list())
            .filter(|l| !l.is_empty())
            .ok_or(MetainfoError::MissingField("file path"))?;

        let mut path = PathBuf::from(name);
        for part in path_list {
            let part = part.as_str().ok_or(MetainfoError::InvalidField("file path"))?;
            check_component(part)?;
            path.push(part);
        }

        let padding = file_dict
            .get(b"attr")
            .and_then(|v| v.as_str())
            .map(|attr| attr.contains('p'))
            .unwrap_or(false);

        files.push(File {
            path,
            length,
            offset,
            pieces_root: None,
            padding,
        });
        offset += length;
    }

    Ok(files)
}

fn v2_files(dict: &Dict, name: &str, piece_length: u64) -> Result<Vec<File>, MetainfoError> {
    let tree = dict
        .get(b"file tree")
        .ok_or(MetainfoError::MissingField("file tree"))?;
    let tree = FileTree::from_bencode(tree)?;

    let mut offset = 0u64;
    let mut files = Vec::new();
    for flat in tree.flatten() {
        files.push(File {
            path: PathBuf::from(name).join(&flat.path),
            length: flat.length,
            offset,
            pieces_root: flat.pieces_root,
            padding: false,
        });
        // v2 files always start on a piece boundary.
        offset += flat.length.div_ceil(piece_length) * piece_length;
    }

    Ok(files)
}

fn check_component(part: &str) -> Result<(), MetainfoError> {
    let mut components = std::path::Path::new(part).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(MetainfoError::UnsafePath(part.to_string())),
    }
}
