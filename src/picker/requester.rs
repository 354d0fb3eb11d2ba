use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;
use tracing::{debug, info, warn};

use super::availability::Availability;
use super::block::{BlockRequest, BlockState, PeerIndex, PieceLayout};
use super::priority::Priority;
use super::settings::PieceRequesterSettings;
use crate::bitfield::{Bitfield, BitfieldError};

/// What the picker needs to know about a peer when choosing requests for it.
#[derive(Debug, Clone, Copy)]
pub struct PeerView<'a> {
    pub index: PeerIndex,
    pub bitfield: &'a Bitfield,
    /// The peer is choking us; only allowed-fast pieces may be requested.
    pub choking_us: bool,
    pub allowed_fast: &'a HashSet<u32>,
    pub suggested: &'a [u32],
}

/// Outcome of [`PiecePicker::on_block_received`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReceived {
    /// The block was still needed and its data should be written.
    pub accepted: bool,
    /// Duplicate endgame requests to withdraw from other peers.
    pub cancels: Vec<(PeerIndex, BlockRequest)>,
    /// Every block of this piece has now arrived; it is ready for hashing.
    pub piece_complete: Option<u32>,
}

#[derive(Debug, Clone)]
struct BlockSlot {
    state: BlockState,
    holders: Vec<PeerIndex>,
}

#[derive(Debug, Clone)]
struct PieceProgress {
    blocks: Vec<BlockSlot>,
}

impl PieceProgress {
    fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![
                BlockSlot {
                    state: BlockState::Pending,
                    holders: Vec::new(),
                };
                block_count as usize
            ],
        }
    }

    fn is_untouched(&self) -> bool {
        self.blocks.iter().all(|b| b.state == BlockState::Pending)
    }

    fn has_pending(&self) -> bool {
        self.blocks.iter().any(|b| b.state == BlockState::Pending)
    }

    fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.state.is_done())
    }

    fn done_blocks(&self) -> u64 {
        self.blocks.iter().filter(|b| b.state.is_done()).count() as u64
    }
}

/// Chooses which blocks to request from which peer.
///
/// Owns our bitfield, per-piece priorities and availability, the state of
/// every block of the pieces currently being downloaded, and the set of
/// requests outstanding to each peer.
pub struct PiecePicker {
    layout: PieceLayout,
    settings: PieceRequesterSettings,
    have: Bitfield,
    priorities: Vec<Priority>,
    availability: Availability,
    in_progress: BTreeMap<u32, PieceProgress>,
    peer_requests: HashMap<PeerIndex, HashSet<BlockRequest>>,
    endgame: bool,
}

impl PiecePicker {
    pub fn new(layout: PieceLayout, settings: PieceRequesterSettings) -> Self {
        let count = layout.piece_count;
        Self {
            layout,
            settings,
            have: Bitfield::new(count as usize),
            priorities: vec![Priority::Normal; count as usize],
            availability: Availability::new(count),
            in_progress: BTreeMap::new(),
            peer_requests: HashMap::new(),
            endgame: false,
        }
    }

    /// Starts from pieces already on disk, e.g. from a resume snapshot.
    pub fn with_have(mut self, have: Bitfield) -> Result<Self, BitfieldError> {
        if have.len() != self.have.len() {
            return Err(BitfieldError::LengthMismatch {
                expected: self.have.len(),
                actual: have.len(),
            });
        }
        self.have = have;
        Ok(self)
    }

    pub fn layout(&self) -> &PieceLayout {
        &self.layout
    }

    pub fn settings(&self) -> &PieceRequesterSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: PieceRequesterSettings) {
        self.settings = settings;
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.have
    }

    pub fn have_piece(&self, piece: u32) -> bool {
        self.have.get(piece as usize)
    }

    pub fn is_complete(&self) -> bool {
        (0..self.layout.piece_count)
            .all(|p| self.have_piece(p) || !self.priorities[p as usize].is_wanted())
    }

    pub fn is_endgame(&self) -> bool {
        self.endgame
    }

    pub fn priority(&self, piece: u32) -> Priority {
        self.priorities[piece as usize]
    }

    pub fn set_priorities(&mut self, priorities: Vec<Priority>) {
        debug_assert_eq!(priorities.len(), self.priorities.len());
        self.priorities = priorities;
    }

    pub fn set_piece_priority(&mut self, piece: u32, priority: Priority) {
        self.priorities[piece as usize] = priority;
    }

    pub fn availability(&self, piece: u32) -> u32 {
        self.availability.get(piece)
    }

    pub fn peer_bitfield_added(&mut self, bitfield: &Bitfield) {
        self.availability.add_bitfield(bitfield);
    }

    pub fn peer_bitfield_removed(&mut self, bitfield: &Bitfield) {
        self.availability.remove_bitfield(bitfield);
    }

    pub fn peer_have(&mut self, piece: u32) {
        self.availability.add_piece(piece);
    }

    /// Releases the peer's requests and forgets its pieces.
    pub fn peer_disconnected(&mut self, peer: PeerIndex, bitfield: &Bitfield) -> Vec<BlockRequest> {
        self.availability.remove_bitfield(bitfield);
        self.cancel_peer(peer)
    }

    /// True if the peer has a wanted piece we lack.
    pub fn is_interesting(&self, bitfield: &Bitfield) -> bool {
        bitfield.iter_true().any(|p| self.wants(p as u32))
    }

    pub fn outstanding(&self, peer: PeerIndex) -> usize {
        self.peer_requests.get(&peer).map_or(0, HashSet::len)
    }

    pub fn is_requested_from(&self, peer: PeerIndex, req: &BlockRequest) -> bool {
        self.peer_requests
            .get(&peer)
            .is_some_and(|set| set.contains(req))
    }

    pub fn requests_of(&self, peer: PeerIndex) -> impl Iterator<Item = &BlockRequest> {
        self.peer_requests.get(&peer).into_iter().flatten()
    }

    fn wants(&self, piece: u32) -> bool {
        !self.have_piece(piece) && self.priorities[piece as usize].is_wanted()
    }

    fn eligible(&self, peer: &PeerView<'_>, piece: u32) -> bool {
        peer.bitfield.get(piece as usize)
            && self.wants(piece)
            && (!peer.choking_us || peer.allowed_fast.contains(&piece))
    }

    /// Picks up to `max` new requests for the peer.
    ///
    /// Pieces already in progress come first so partial pieces finish. Fresh
    /// pieces follow in priority order, rarest first, suggested pieces ahead
    /// of the rest, then random or by index. During endgame a block already
    /// outstanding to other peers may be duplicated to this one.
    pub fn pick(&mut self, peer: &PeerView<'_>, max: usize) -> Vec<BlockRequest> {
        let capacity = self
            .settings
            .max_requests_per_peer
            .saturating_sub(self.outstanding(peer.index))
            .min(max);
        let mut picked = Vec::new();
        if capacity == 0 {
            return picked;
        }

        let partial: Vec<u32> = self
            .in_progress
            .keys()
            .copied()
            .filter(|&p| self.eligible(peer, p))
            .collect();
        for piece in partial {
            self.take_pending(peer.index, piece, capacity, &mut picked);
            if picked.len() == capacity {
                return picked;
            }
        }

        for piece in self.fresh_candidates(peer) {
            self.in_progress
                .insert(piece, PieceProgress::new(self.layout.block_count(piece)));
            self.take_pending(peer.index, piece, capacity, &mut picked);
            if picked.len() == capacity {
                return picked;
            }
        }

        self.update_endgame();
        if self.endgame {
            self.take_duplicates(peer, capacity, &mut picked);
        }

        picked
    }

    fn fresh_candidates(&self, peer: &PeerView<'_>) -> Vec<u32> {
        let mut rng = rand::rng();
        let mut candidates: Vec<(Reverse<Priority>, u32, bool, u32, u32)> = (0..self
            .layout
            .piece_count)
            .filter(|p| !self.in_progress.contains_key(p) && self.eligible(peer, *p))
            .map(|p| {
                let priority = if self.settings.allow_prioritisation {
                    self.priorities[p as usize]
                } else {
                    Priority::Normal
                };
                let rarity = if self.settings.allow_rarest_first {
                    self.availability.get(p)
                } else {
                    0
                };
                let not_suggested = !peer.suggested.contains(&p);
                let tiebreak = if self.settings.allow_randomised {
                    rng.random::<u32>()
                } else {
                    0
                };
                (Reverse(priority), rarity, not_suggested, tiebreak, p)
            })
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|c| c.4).collect()
    }

    fn take_pending(
        &mut self,
        peer: PeerIndex,
        piece: u32,
        capacity: usize,
        picked: &mut Vec<BlockRequest>,
    ) {
        let Some(progress) = self.in_progress.get_mut(&piece) else {
            return;
        };
        let requests = self.peer_requests.entry(peer).or_default();

        for (block, slot) in progress.blocks.iter_mut().enumerate() {
            if picked.len() == capacity {
                break;
            }
            if slot.state != BlockState::Pending {
                continue;
            }
            let req = self.layout.request(piece, block as u32);
            slot.state = BlockState::Requested;
            slot.holders.push(peer);
            requests.insert(req);
            picked.push(req);
        }
    }

    fn take_duplicates(
        &mut self,
        peer: &PeerView<'_>,
        capacity: usize,
        picked: &mut Vec<BlockRequest>,
    ) {
        let pieces: Vec<u32> = self
            .in_progress
            .keys()
            .copied()
            .filter(|&p| self.eligible(peer, p))
            .collect();
        let duplicates = self.settings.endgame_duplicates;
        let requests = self.peer_requests.entry(peer.index).or_default();

        for piece in pieces {
            let Some(progress) = self.in_progress.get_mut(&piece) else {
                continue;
            };
            for (block, slot) in progress.blocks.iter_mut().enumerate() {
                if picked.len() == capacity {
                    return;
                }
                if slot.state != BlockState::Requested
                    || slot.holders.contains(&peer.index)
                    || slot.holders.len() >= duplicates
                {
                    continue;
                }
                let req = self.layout.request(piece, block as u32);
                slot.holders.push(peer.index);
                requests.insert(req);
                picked.push(req);
            }
        }
    }

    /// Endgame: every block of every wanted piece is requested or received.
    fn update_endgame(&mut self) {
        let endgame = (0..self.layout.piece_count)
            .filter(|&p| self.wants(p))
            .all(|p| {
                self.in_progress
                    .get(&p)
                    .is_some_and(|progress| !progress.has_pending())
            })
            && !self.is_complete();

        if endgame && !self.endgame {
            debug!(in_progress = self.in_progress.len(), "entering endgame");
        }
        self.endgame = endgame;
    }

    /// Records an arriving block.
    pub fn on_block_received(&mut self, peer: PeerIndex, req: &BlockRequest) -> BlockReceived {
        let mut outcome = BlockReceived::default();
        if !self.layout.is_valid(req) {
            return outcome;
        }
        if let Some(set) = self.peer_requests.get_mut(&peer) {
            set.remove(req);
        }
        if !self.wants(req.piece) {
            return outcome;
        }

        let block_count = self.layout.block_count(req.piece);
        let progress = self
            .in_progress
            .entry(req.piece)
            .or_insert_with(|| PieceProgress::new(block_count));
        let slot = &mut progress.blocks[req.block_index() as usize];
        if slot.state.is_done() {
            return outcome;
        }

        slot.state = BlockState::Received;
        for holder in slot.holders.drain(..) {
            if holder == peer {
                continue;
            }
            if let Some(set) = self.peer_requests.get_mut(&holder) {
                set.remove(req);
            }
            outcome.cancels.push((holder, *req));
        }
        outcome.accepted = true;

        if progress.is_complete() {
            outcome.piece_complete = Some(req.piece);
        }
        outcome
    }

    pub fn block_written(&mut self, req: &BlockRequest) {
        if let Some(progress) = self.in_progress.get_mut(&req.piece) {
            if let Some(slot) = progress.blocks.get_mut(req.block_index() as usize) {
                if slot.state == BlockState::Received {
                    slot.state = BlockState::Written;
                }
            }
        }
    }

    /// Applies a hash check result. A good piece becomes had; a bad one
    /// returns every block to pending.
    pub fn piece_verified(&mut self, piece: u32, ok: bool) {
        self.in_progress.remove(&piece);
        if ok {
            self.have.set(piece as usize, true);
            info!(piece, "piece verified");
        } else {
            warn!(piece, "piece failed hash check");
            self.endgame = false;
        }
    }

    /// Releases every request outstanding to the peer.
    pub fn cancel_peer(&mut self, peer: PeerIndex) -> Vec<BlockRequest> {
        self.cancel_peer_where(peer, |_| true)
    }

    /// Releases the peer's requests except those for allowed-fast pieces,
    /// which a fast peer keeps serving while choking us.
    pub fn cancel_choked(&mut self, peer: PeerIndex, allowed_fast: &HashSet<u32>) -> Vec<BlockRequest> {
        self.cancel_peer_where(peer, |req| !allowed_fast.contains(&req.piece))
    }

    fn cancel_peer_where<F>(&mut self, peer: PeerIndex, release: F) -> Vec<BlockRequest>
    where
        F: Fn(&BlockRequest) -> bool,
    {
        let Some(set) = self.peer_requests.get_mut(&peer) else {
            return Vec::new();
        };
        let mut released: Vec<BlockRequest> = set.iter().copied().filter(|r| release(r)).collect();
        for req in &released {
            set.remove(req);
        }
        if set.is_empty() {
            self.peer_requests.remove(&peer);
        }
        released.sort_unstable();

        for req in &released {
            self.release_slot(peer, req);
        }
        self.in_progress.retain(|_, p| !p.is_untouched());
        if !released.is_empty() {
            self.endgame = false;
        }
        released
    }

    /// The peer refused a request; the block goes back to pending unless
    /// another peer still holds it.
    pub fn reject(&mut self, peer: PeerIndex, req: &BlockRequest) -> bool {
        let removed = self
            .peer_requests
            .get_mut(&peer)
            .is_some_and(|set| set.remove(req));
        if removed {
            self.release_slot(peer, req);
            if self
                .in_progress
                .get(&req.piece)
                .is_some_and(PieceProgress::is_untouched)
            {
                self.in_progress.remove(&req.piece);
            }
            self.endgame = false;
        }
        removed
    }

    fn release_slot(&mut self, peer: PeerIndex, req: &BlockRequest) {
        let Some(progress) = self.in_progress.get_mut(&req.piece) else {
            return;
        };
        let Some(slot) = progress.blocks.get_mut(req.block_index() as usize) else {
            return;
        };
        slot.holders.retain(|&h| h != peer);
        if slot.holders.is_empty() && slot.state == BlockState::Requested {
            slot.state = BlockState::Pending;
        }
    }

    pub fn total_blocks(&self) -> u64 {
        self.layout.total_blocks()
    }

    /// Blocks of verified pieces plus blocks received for pieces in progress.
    pub fn completed_blocks(&self) -> u64 {
        let had: u64 = self
            .have
            .iter_true()
            .map(|p| self.layout.block_count(p as u32) as u64)
            .sum();
        let partial: u64 = self
            .in_progress
            .iter()
            .filter(|(p, _)| !self.have_piece(**p))
            .map(|(_, progress)| progress.done_blocks())
            .sum();
        had + partial
    }

    /// Blocks neither completed nor outstanding to any peer.
    pub fn free_blocks(&self) -> u64 {
        let requested: u64 = self
            .in_progress
            .values()
            .flat_map(|p| p.blocks.iter())
            .filter(|b| b.state == BlockState::Requested)
            .count() as u64;
        self.total_blocks() - self.completed_blocks() - requested
    }
}
