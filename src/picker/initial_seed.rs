use std::collections::HashMap;

use tracing::{debug, info};

use super::block::PeerIndex;
use crate::bitfield::Bitfield;

/// Initial-seed (super-seeding) state for a torrent we hold completely.
///
/// We advertise no pieces and instead offer peers one piece at a time. A
/// peer gets its next piece only once the last one it was offered has been
/// seen at some other peer, so every upload spreads a new piece through the
/// swarm.
#[derive(Debug, Clone)]
pub struct InitialSeed {
    offered: Bitfield,
    seen: Bitfield,
    offers: HashMap<PeerIndex, u32>,
    enabled: bool,
}

impl InitialSeed {
    pub fn new(piece_count: u32) -> Self {
        info!(piece_count, "initial seeding enabled");
        Self {
            offered: Bitfield::new(piece_count as usize),
            seen: Bitfield::new(piece_count as usize),
            offers: HashMap::new(),
            enabled: piece_count > 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The bitfield sent in place of our real one: nothing.
    pub fn advertised_bitfield(&self) -> Bitfield {
        Bitfield::new(self.seen.len())
    }

    pub fn offer_of(&self, peer: PeerIndex) -> Option<u32> {
        self.offers.get(&peer).copied()
    }

    pub fn is_seen(&self, piece: u32) -> bool {
        self.seen.get(piece as usize)
    }

    /// Chooses the next piece to advertise to `peer` with a Have.
    ///
    /// Returns `None` while the peer's current offer has not spread, or when
    /// the peer already has every piece we could offer.
    pub fn offer(&mut self, peer: PeerIndex, peer_bitfield: &Bitfield) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        if let Some(&current) = self.offers.get(&peer) {
            if !self.is_seen(current) {
                return None;
            }
            self.offers.remove(&peer);
        }

        let piece = self
            .first_where(|i| !self.offered.get(i) && !peer_bitfield.get(i))
            .or_else(|| {
                self.first_where(|i| self.offered.get(i) && !self.seen.get(i) && !peer_bitfield.get(i))
            })?;

        self.offered.set(piece as usize, true);
        self.offers.insert(peer, piece);
        debug!(%peer, piece, "offering piece");
        Some(piece)
    }

    fn first_where<F>(&self, pred: F) -> Option<u32>
    where
        F: Fn(usize) -> bool,
    {
        (0..self.seen.len()).find(|&i| pred(i)).map(|i| i as u32)
    }

    /// A peer announced a piece.
    ///
    /// A peer reporting the piece we offered it has only downloaded from us;
    /// any other piece it reports came from elsewhere in the swarm, which
    /// counts as seen.
    pub fn on_peer_have(&mut self, peer: PeerIndex, piece: u32) {
        if self.offers.get(&peer) == Some(&piece) {
            return;
        }
        self.mark_seen(piece);
    }

    /// A peer that was never offered anything by us announced a piece.
    pub fn on_not_initial_peer_have(&mut self, piece: u32) {
        self.mark_seen(piece);
    }

    pub fn peer_disconnected(&mut self, peer: PeerIndex) {
        self.offers.remove(&peer);
    }

    fn mark_seen(&mut self, piece: u32) {
        if !self.enabled || self.seen.get(piece as usize) {
            return;
        }
        self.seen.set(piece as usize, true);
        if self.seen.all_true() {
            self.enabled = false;
            self.offers.clear();
            info!("every piece seen in the swarm, initial seeding finished");
        }
    }
}
