use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::net::IpAddr;

use crate::metainfo::InfoHash;

/// Fast extension (BEP-6) state for one connection.
#[derive(Debug, Clone, Default)]
pub struct FastState {
    /// Pieces the remote peer lets us request while it chokes us.
    pub allowed_fast_incoming: HashSet<u32>,
    /// Pieces we let the remote peer request while we choke it.
    pub allowed_fast_outgoing: HashSet<u32>,
    /// Pieces the remote peer suggested, oldest first.
    pub suggested: Vec<u32>,
}

impl FastState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allowed_fast_incoming(&mut self, piece: u32) {
        self.allowed_fast_incoming.insert(piece);
    }

    pub fn should_serve_choked_request(&self, piece: u32) -> bool {
        self.allowed_fast_outgoing.contains(&piece)
    }

    pub fn add_suggested(&mut self, piece: u32) {
        if !self.suggested.contains(&piece) {
            self.suggested.push(piece);
        }
    }

    /// Forgets a suggestion once the piece is no longer wanted.
    pub fn remove_suggested(&mut self, piece: u32) {
        self.suggested.retain(|&p| p != piece);
    }
}

/// Generates the allowed fast set for a peer (BEP-6).
///
/// The set is derived from the peer's IP (masked to /24 for IPv4) and the
/// info hash, so both sides compute the same pieces.
pub fn generate_allowed_fast_set(
    info_hash: &InfoHash,
    peer_ip: IpAddr,
    num_pieces: u32,
    set_size: usize,
) -> Vec<u32> {
    if num_pieces == 0 {
        return Vec::new();
    }
    let set_size = set_size.min(num_pieces as usize);

    let mut allowed_set = Vec::with_capacity(set_size);

    let ip_bytes = match peer_ip {
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            [octets[0], octets[1], octets[2], 0]
        }
        IpAddr::V6(ip) => {
            let octets = ip.octets();
            [octets[0], octets[1], octets[2], octets[3]]
        }
    };

    let mut x = Vec::with_capacity(24);
    x.extend_from_slice(&ip_bytes);
    x.extend_from_slice(info_hash.as_bytes());

    while allowed_set.len() < set_size {
        let hash = Sha1::digest(&x);

        for chunk in hash.chunks(4) {
            if allowed_set.len() >= set_size {
                break;
            }

            let index = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) % num_pieces;

            if !allowed_set.contains(&index) {
                allowed_set.push(index);
            }
        }

        x = hash.to_vec();
    }

    allowed_set
}
