use bytes::Bytes;
use std::fmt;

use crate::constants::BLOCK_SIZE;

/// Handle of a connected peer in the torrent's peer table.
///
/// The picker keys outstanding requests by this index and never holds a
/// reference to the peer itself. A slot freed by a disconnect is reused with
/// the next generation, so an index from an earlier connection never
/// resolves to the peer that took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIndex {
    slot: usize,
    generation: u32,
}

impl PeerIndex {
    /// First generation of `slot`.
    pub fn new(slot: usize) -> Self {
        Self::with_generation(slot, 0)
    }

    pub fn with_generation(slot: usize, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "peer#{}", self.slot)
        } else {
            write!(f, "peer#{}.{}", self.slot, self.generation)
        }
    }
}

/// A `(piece, offset, length)` triple as carried by request, cancel and
/// reject messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    /// Index of the block within its piece.
    pub fn block_index(&self) -> u32 {
        self.offset / BLOCK_SIZE
    }
}

/// A received block of piece data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub piece: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Block {
    pub fn new(piece: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }

    pub fn request(&self) -> BlockRequest {
        BlockRequest {
            piece: self.piece,
            offset: self.offset,
            length: self.data.len() as u32,
        }
    }
}

/// Lifecycle of one block of a piece being downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Not requested from anyone.
    Pending,
    /// Outstanding to one peer, or several during endgame.
    Requested,
    /// Data arrived and awaits the disk writer.
    Received,
    /// Data is on disk.
    Written,
}

impl BlockState {
    pub fn is_done(self) -> bool {
        matches!(self, BlockState::Received | BlockState::Written)
    }
}

pub fn block_count(piece_length: u64) -> u32 {
    piece_length.div_ceil(BLOCK_SIZE as u64) as u32
}

pub fn block_length(piece_length: u64, block_index: u32) -> u32 {
    let offset = block_index as u64 * BLOCK_SIZE as u64;
    let remaining = piece_length.saturating_sub(offset);
    remaining.min(BLOCK_SIZE as u64) as u32
}

/// Piece sizes of a torrent: every piece is `piece_length` except possibly
/// the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    pub piece_length: u64,
    pub total_length: u64,
    pub piece_count: u32,
}

impl PieceLayout {
    pub fn new(piece_length: u64, total_length: u64) -> Self {
        Self {
            piece_length,
            total_length,
            piece_count: total_length.div_ceil(piece_length) as u32,
        }
    }

    pub fn piece_size(&self, piece: u32) -> u64 {
        let start = piece as u64 * self.piece_length;
        self.total_length.saturating_sub(start).min(self.piece_length)
    }

    pub fn block_count(&self, piece: u32) -> u32 {
        block_count(self.piece_size(piece))
    }

    pub fn total_blocks(&self) -> u64 {
        (0..self.piece_count)
            .map(|p| self.block_count(p) as u64)
            .sum()
    }

    /// The request covering block `block` of `piece`.
    pub fn request(&self, piece: u32, block: u32) -> BlockRequest {
        BlockRequest::new(
            piece,
            block * BLOCK_SIZE,
            block_length(self.piece_size(piece), block),
        )
    }

    /// True if `req` names exactly one block of this torrent.
    pub fn is_valid(&self, req: &BlockRequest) -> bool {
        req.piece < self.piece_count
            && req.offset % BLOCK_SIZE == 0
            && req.block_index() < self.block_count(req.piece)
            && req.length == block_length(self.piece_size(req.piece), req.block_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_lengths_sum_to_piece() {
        for piece_length in [1u64, 16383, 16384, 16385, 100_000, 262_144] {
            let total: u64 = (0..block_count(piece_length))
                .map(|b| block_length(piece_length, b) as u64)
                .sum();
            assert_eq!(total, piece_length);
        }
    }

    #[test]
    fn test_layout_last_piece() {
        let layout = PieceLayout::new(32768, 70000);
        assert_eq!(layout.piece_count, 3);
        assert_eq!(layout.piece_size(2), 70000 - 65536);
        assert_eq!(layout.block_count(0), 2);
        assert_eq!(layout.block_count(2), 1);
        assert_eq!(layout.total_blocks(), 5);
        assert_eq!(layout.request(2, 0), BlockRequest::new(2, 0, 4464));
        assert!(layout.is_valid(&BlockRequest::new(0, 16384, 16384)));
        assert!(!layout.is_valid(&BlockRequest::new(0, 100, 16384)));
        assert!(!layout.is_valid(&BlockRequest::new(2, 0, 16384)));
    }
}
