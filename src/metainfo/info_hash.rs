use super::error::MetainfoError;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;

/// A 20-byte torrent identifier: the SHA-1 of the bencoded info dictionary,
/// or a truncated v2 hash on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetainfoError> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| MetainfoError::InvalidInfoHashLength)?;
        Ok(Self(arr))
    }

    /// Hashes a bencoded info dictionary.
    pub fn from_info_bytes(raw_info: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(raw_info);
        Self(hasher.finalize().into())
    }

    pub fn from_hex(s: &str) -> Result<Self, MetainfoError> {
        let bytes = hex_decode(s).ok_or(MetainfoError::InvalidInfoHashLength)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A BEP-52 SHA-256 info hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHashV2(pub [u8; 32]);

impl InfoHashV2 {
    pub fn from_info_bytes(raw_info: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw_info);
        Self(hasher.finalize().into())
    }

    /// The first 20 bytes, as used in handshakes and DHT lookups.
    pub fn truncate(&self) -> InfoHash {
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&self.0[..20]);
        InfoHash(arr)
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Debug for InfoHashV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHashV2({})", self.to_hex())
    }
}

/// The hashes a torrent is known by. Hybrid torrents carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHashes {
    pub v1: Option<InfoHash>,
    pub v2: Option<InfoHashV2>,
}

impl InfoHashes {
    /// The 20-byte hash used on the wire, preferring v1.
    pub fn wire(&self) -> InfoHash {
        match (self.v1, self.v2) {
            (Some(v1), _) => v1,
            (None, Some(v2)) => v2.truncate(),
            (None, None) => InfoHash([0; 20]),
        }
    }

    /// Returns true if `hash` identifies this torrent.
    pub fn contains(&self, hash: &InfoHash) -> bool {
        self.v1.as_ref() == Some(hash) || self.v2.map(|v2| v2.truncate()).as_ref() == Some(hash)
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
