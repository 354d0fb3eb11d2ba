//! Piece selection.
//!
//! [`PiecePicker`] tracks which blocks are wanted, requested and received and
//! hands out requests per peer: partial pieces first, then by priority,
//! rarest first, with optional randomisation and an endgame that duplicates
//! the last outstanding blocks. [`InitialSeed`] drives super-seeding for a
//! torrent we hold completely.

mod availability;
mod block;
mod initial_seed;
mod priority;
mod requester;
mod settings;

pub use availability::Availability;
pub use block::{
    block_count, block_length, Block, BlockRequest, BlockState, PeerIndex, PieceLayout,
};
pub use initial_seed::InitialSeed;
pub use priority::{piece_priorities, Priority};
pub use requester::{BlockReceived, PeerView, PiecePicker};
pub use settings::PieceRequesterSettings;

#[cfg(test)]
mod tests;
