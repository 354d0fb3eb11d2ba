use crate::bitfield::Bitfield;

/// How many connected peers advertise each piece.
#[derive(Debug, Clone)]
pub struct Availability {
    counts: Vec<u32>,
}

impl Availability {
    pub fn new(piece_count: u32) -> Self {
        Self {
            counts: vec![0; piece_count as usize],
        }
    }

    pub fn get(&self, piece: u32) -> u32 {
        self.counts[piece as usize]
    }

    pub fn add_bitfield(&mut self, bitfield: &Bitfield) {
        for piece in bitfield.iter_true() {
            self.counts[piece] += 1;
        }
    }

    pub fn remove_bitfield(&mut self, bitfield: &Bitfield) {
        for piece in bitfield.iter_true() {
            self.counts[piece] = self.counts[piece].saturating_sub(1);
        }
    }

    pub fn add_piece(&mut self, piece: u32) {
        self.counts[piece as usize] += 1;
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
