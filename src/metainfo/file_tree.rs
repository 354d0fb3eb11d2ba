//! BitTorrent v2 file tree structure (BEP-52).

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::error::MetainfoError;
use crate::bencode::Value;

/// A file leaf in a v2 file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTreeEntry {
    pub length: u64,
    /// Merkle root of the file's 16 KiB block hashes; absent for empty files.
    pub pieces_root: Option<[u8; 32]>,
    /// File attributes (`p` padding, `x` executable, `h` hidden).
    pub attr: Option<String>,
}

/// Hierarchical file structure for v2 torrents.
///
/// Directories are nested dictionaries; a file is a dictionary holding a
/// single empty-string key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTree {
    File(FileTreeEntry),
    Directory(BTreeMap<String, FileTree>),
}

/// A file from a flattened tree.
#[derive(Debug, Clone)]
pub struct FlattenedFile {
    pub path: PathBuf,
    pub length: u64,
    pub pieces_root: Option<[u8; 32]>,
    pub attr: Option<String>,
}

impl FileTree {
    /// Parses the `file tree` dictionary of a v2 info dict.
    pub fn from_bencode(value: &Value) -> Result<Self, MetainfoError> {
        parse_node(value, 0)
    }

    /// Flattens the tree into files with full paths, in key order.
    pub fn flatten(&self) -> Vec<FlattenedFile> {
        let mut files = Vec::new();
        flatten_into(self, PathBuf::new(), &mut files);
        files
    }
}

fn parse_node(value: &Value, depth: usize) -> Result<FileTree, MetainfoError> {
    if depth > 64 {
        return Err(MetainfoError::InvalidField("file tree depth"));
    }

    let dict = value
        .as_dict()
        .ok_or(MetainfoError::InvalidField("file tree"))?;

    if let Some(file_info) = dict.get(b"") {
        let file_dict = file_info
            .as_dict()
            .ok_or(MetainfoError::InvalidField("file tree entry"))?;

        let length = file_dict
            .get(b"length")
            .and_then(|v| v.as_integer())
            .filter(|&l| l >= 0)
            .ok_or(MetainfoError::MissingField("length"))? as u64;

        let pieces_root = match file_dict.get(b"pieces root") {
            Some(v) => {
                let bytes = v
                    .as_bytes()
                    .ok_or(MetainfoError::InvalidField("pieces root"))?;
                let arr: [u8; 32] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| MetainfoError::InvalidField("pieces root"))?;
                Some(arr)
            }
            None if length > 0 => return Err(MetainfoError::MissingField("pieces root")),
            None => None,
        };

        let attr = file_dict
            .get(b"attr")
            .and_then(|v| v.as_str())
            .map(String::from);

        return Ok(FileTree::File(FileTreeEntry {
            length,
            pieces_root,
            attr,
        }));
    }

    let mut children = BTreeMap::new();
    for (key, value) in dict.iter() {
        let name = std::str::from_utf8(key)
            .map_err(|_| MetainfoError::InvalidField("file tree key"))?;

        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(MetainfoError::UnsafePath(name.to_string()));
        }

        children.insert(name.to_string(), parse_node(value, depth + 1)?);
    }

    Ok(FileTree::Directory(children))
}

fn flatten_into(tree: &FileTree, current: PathBuf, files: &mut Vec<FlattenedFile>) {
    match tree {
        FileTree::File(entry) => files.push(FlattenedFile {
            path: current,
            length: entry.length,
            pieces_root: entry.pieces_root,
            attr: entry.attr.clone(),
        }),
        FileTree::Directory(children) => {
            for (name, child) in children {
                flatten_into(child, current.join(name), files);
            }
        }
    }
}
