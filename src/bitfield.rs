//! Piece availability bitfields.

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitfieldError {
    #[error("expected {expected} bytes for {len} bits, got {actual}")]
    WrongLength {
        len: usize,
        expected: usize,
        actual: usize,
    },

    #[error("spare bits set in the final byte")]
    SpareBitsSet,

    #[error("expected {expected} bits, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A fixed-length sequence of piece flags.
///
/// Bits are numbered from the high bit of the first byte, matching the wire
/// `bitfield` message. The length is fixed at construction; indexing outside
/// it is a programming error and panics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bitfield {
    bits: Vec<u8>,
    len: usize,
}

impl Bitfield {
    /// Creates an all-false bitfield of `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Creates an all-true bitfield of `len` bits.
    pub fn full(len: usize) -> Self {
        let mut bf = Self::new(len);
        bf.set_all();
        bf
    }

    /// Parses the packed wire representation.
    ///
    /// The byte count must be exactly `ceil(len / 8)` and the spare bits of
    /// the final byte must be zero.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Result<Self, BitfieldError> {
        let expected = len.div_ceil(8);
        if bytes.len() != expected {
            return Err(BitfieldError::WrongLength {
                len,
                expected,
                actual: bytes.len(),
            });
        }

        let bf = Self {
            bits: bytes.to_vec(),
            len,
        };
        if bf.spare_mask() & bf.bits.last().copied().unwrap_or(0) != 0 {
            return Err(BitfieldError::SpareBitsSet);
        }
        Ok(bf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        self.check(index);
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: usize, value: bool) {
        self.check(index);
        let mask = 1u8 << (7 - index % 8);
        if value {
            self.bits[index / 8] |= mask;
        } else {
            self.bits[index / 8] &= !mask;
        }
    }

    /// Sets every bit in `from..to`.
    pub fn set_range(&mut self, from: usize, to: usize, value: bool) {
        for index in from..to {
            self.set(index, value);
        }
    }

    pub fn set_all(&mut self) {
        self.bits.fill(0xFF);
        self.clear_spare_bits();
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    pub fn count_true(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn count_false(&self) -> usize {
        self.len - self.count_true()
    }

    pub fn all_true(&self) -> bool {
        self.count_true() == self.len
    }

    pub fn all_false(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Index of the first set bit, if any.
    pub fn first_true(&self) -> Option<usize> {
        self.first_true_in(0, self.len)
    }

    /// Index of the first set bit in `from..to`.
    pub fn first_true_in(&self, from: usize, to: usize) -> Option<usize> {
        self.scan(from, to, 0x00)
    }

    pub fn first_false(&self) -> Option<usize> {
        self.first_false_in(0, self.len)
    }

    /// Index of the first clear bit in `from..to`.
    pub fn first_false_in(&self, from: usize, to: usize) -> Option<usize> {
        self.scan(from, to, 0xFF)
    }

    /// Iterates the indices of set bits in ascending order.
    pub fn iter_true(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }

    /// Sets this field to `self & other`.
    pub fn and(&mut self, other: &Bitfield) -> &mut Self {
        self.check_len(other);
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a &= b;
        }
        self
    }

    /// Sets this field to `self | other`.
    pub fn or(&mut self, other: &Bitfield) -> &mut Self {
        self.check_len(other);
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= b;
        }
        self
    }

    /// Sets this field to `self & !other`.
    pub fn and_not(&mut self, other: &Bitfield) -> &mut Self {
        self.check_len(other);
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a &= !b;
        }
        self
    }

    /// Flips every bit.
    pub fn not(&mut self) -> &mut Self {
        for b in &mut self.bits {
            *b = !*b;
        }
        self.clear_spare_bits();
        self
    }

    /// Returns the packed bytes of the bitfield.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Skips whole bytes equal to `skip` and returns the first bit that
    /// differs from the skipped pattern.
    fn scan(&self, from: usize, to: usize, skip: u8) -> Option<usize> {
        let to = to.min(self.len);
        let want = skip == 0x00;
        let mut index = from;
        while index < to {
            if index % 8 == 0 && index + 8 <= to && self.bits[index / 8] == skip {
                index += 8;
                continue;
            }
            if self.get(index) == want {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    fn spare_mask(&self) -> u8 {
        match self.len % 8 {
            0 => 0,
            used => 0xFF >> used,
        }
    }

    fn clear_spare_bits(&mut self) {
        let mask = self.spare_mask();
        if let Some(last) = self.bits.last_mut() {
            *last &= !mask;
        }
    }

    fn check(&self, index: usize) {
        assert!(
            index < self.len,
            "bit index {} out of range for bitfield of length {}",
            index,
            self.len
        );
    }

    fn check_len(&self, other: &Bitfield) {
        assert_eq!(self.len, other.len, "bitfield length mismatch");
    }
}
