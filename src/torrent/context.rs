use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use super::session::{PeerSession, PeerTable};
use crate::bitfield::{Bitfield, BitfieldError};
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{
    generate_allowed_fast_set, ExtensionHandshake, ExtensionMessage, Message, PeerCapabilities,
    PeerError, PeerId, UT_PEX,
};
use crate::picker::{
    Block, BlockRequest, InitialSeed, PeerIndex, PeerView, PieceLayout, PiecePicker,
};
use crate::settings::EngineSettings;

/// Torrent state shared by every connection task.
///
/// Lock it only to apply a message or collect outgoing messages; sockets are
/// read and written outside the lock.
pub type SharedTorrent = Arc<Mutex<TorrentContext>>;

/// Notifications for the rest of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentEvent {
    /// Addresses learned through peer exchange.
    PeersFound(Vec<SocketAddr>),
    /// A wanted block arrived and should be written to disk.
    BlockReceived { peer: PeerIndex, block: Block },
    /// Every block of the piece arrived; it needs a hash check.
    PieceComplete(u32),
    /// A peer announced its DHT node.
    DhtNode(SocketAddr),
}

/// One torrent's picker and peer arena.
pub struct TorrentContext {
    pub(super) info_hash: InfoHash,
    pub(super) picker: PiecePicker,
    pub(super) peers: PeerTable,
    pub(super) initial_seed: Option<InitialSeed>,
    pub(super) raw_info: Option<Bytes>,
    pub(super) private: bool,
    pub(super) allowed_fast_count: usize,
    pub(super) max_upload_queue: usize,
    events: mpsc::Sender<TorrentEvent>,
}

impl TorrentContext {
    pub fn new(
        info_hash: InfoHash,
        layout: PieceLayout,
        settings: &EngineSettings,
        events: mpsc::Sender<TorrentEvent>,
    ) -> Self {
        Self {
            info_hash,
            picker: PiecePicker::new(layout, settings.picker),
            peers: PeerTable::new(),
            initial_seed: None,
            raw_info: None,
            private: false,
            allowed_fast_count: settings.allowed_fast_count,
            max_upload_queue: settings.max_upload_queue,
            events,
        }
    }

    pub fn from_metainfo(
        metainfo: &Metainfo,
        settings: &EngineSettings,
        events: mpsc::Sender<TorrentEvent>,
    ) -> Self {
        let layout = PieceLayout::new(metainfo.info.piece_length, metainfo.info.total_length);
        let mut ctx = Self::new(metainfo.info_hashes.wire(), layout, settings, events);
        ctx.raw_info = Some(metainfo.raw_info().clone());
        ctx.private = metainfo.info.private;
        ctx
    }

    /// Pieces already verified on disk, e.g. from a resume snapshot.
    pub fn with_have(mut self, have: Bitfield) -> Result<Self, BitfieldError> {
        self.picker = self.picker.with_have(have)?;
        Ok(self)
    }

    pub fn into_shared(self) -> SharedTorrent {
        Arc::new(Mutex::new(self))
    }

    /// Switches to initial seeding. Only a complete torrent can super-seed.
    pub fn enable_initial_seed(&mut self) -> bool {
        if !self.picker.bitfield().all_true() {
            return false;
        }
        self.initial_seed = Some(InitialSeed::new(self.picker.layout().piece_count));
        true
    }

    pub fn is_initial_seeding(&self) -> bool {
        self.initial_seed.as_ref().is_some_and(InitialSeed::is_enabled)
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    pub fn picker(&self) -> &PiecePicker {
        &self.picker
    }

    pub fn picker_mut(&mut self) -> &mut PiecePicker {
        &mut self.picker
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peer(&self, index: PeerIndex) -> Option<&PeerSession> {
        self.peers.get(index)
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub(super) fn piece_count(&self) -> u32 {
        self.picker.layout().piece_count
    }

    pub(super) fn session(&mut self, index: PeerIndex) -> Result<&mut PeerSession, PeerError> {
        self.peers
            .get_mut(index)
            .ok_or(PeerError::ConnectionClosed)
    }

    pub(super) fn emit(&self, event: TorrentEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                trace!("event channel closed");
            }
        }
    }

    /// Registers a peer that completed the handshake and returns the
    /// messages that open the conversation.
    pub fn add_peer(
        &mut self,
        addr: SocketAddr,
        capabilities: PeerCapabilities,
        peer_id: Option<PeerId>,
    ) -> (PeerIndex, Vec<Message>) {
        let mut session = PeerSession::new(addr, capabilities, self.piece_count());
        session.peer_id = peer_id;
        let mut out = Vec::new();

        if capabilities.extension_protocol {
            let mut hs = ExtensionHandshake::local(self.raw_info.as_ref().map(Bytes::len));
            if self.private {
                hs.extensions.remove(UT_PEX);
            }
            out.push(Message::Extended {
                id: 0,
                message: ExtensionMessage::Handshake(hs),
            });
        }

        out.extend(self.advertisement(capabilities.fast));

        if capabilities.fast && self.allowed_fast_count > 0 {
            let allowed = generate_allowed_fast_set(
                &self.info_hash,
                addr.ip(),
                self.piece_count(),
                self.allowed_fast_count,
            );
            for piece in allowed {
                session.fast.allowed_fast_outgoing.insert(piece);
                out.push(Message::AllowedFast { piece });
            }
        }

        let index = self.peers.insert(session);
        if let Some(seed) = self.initial_seed.as_mut() {
            let empty = Bitfield::new(self.picker.layout().piece_count as usize);
            if let Some(piece) = seed.offer(index, &empty) {
                out.push(Message::Have { piece });
            }
        }
        debug!(%index, %addr, fast = capabilities.fast, "peer added");
        (index, out)
    }

    /// What we tell a new peer about our pieces.
    fn advertisement(&self, fast: bool) -> Option<Message> {
        let have = if self.is_initial_seeding() {
            Bitfield::new(self.piece_count() as usize)
        } else {
            self.picker.bitfield().clone()
        };

        if fast && have.all_true() {
            Some(Message::HaveAll)
        } else if have.all_false() {
            fast.then_some(Message::HaveNone)
        } else {
            Some(Message::Bitfield(have.to_bytes()))
        }
    }

    /// Applies a message from a peer. On error the peer is torn down and
    /// the error returned so the caller can close the socket.
    pub fn receive(&mut self, peer: PeerIndex, message: Message) -> Result<Vec<Message>, PeerError> {
        match message.handle(self, peer) {
            Ok(out) => Ok(out),
            Err(err) => {
                warn!(%peer, error = %err, "closing peer after protocol error");
                self.disconnect(peer);
                Err(err)
            }
        }
    }

    /// Removes a peer and releases everything it held.
    pub fn disconnect(&mut self, peer: PeerIndex) -> Option<PeerSession> {
        let session = self.peers.remove(peer)?;
        // Wakes an idle connection task so it sees the peer is gone.
        session.outbox_ready().notify_one();
        let released = self.picker.peer_disconnected(peer, &session.bitfield);
        if let Some(seed) = self.initial_seed.as_mut() {
            seed.peer_disconnected(peer);
        }
        debug!(%peer, released = released.len(), "peer disconnected");
        Some(session)
    }

    /// New requests for the peer, up to the per-peer limit.
    pub fn fill_requests(&mut self, peer: PeerIndex) -> Vec<Message> {
        let Some(session) = self.peers.get(peer) else {
            return Vec::new();
        };
        if !session.can_request() {
            return Vec::new();
        }
        let view = PeerView {
            index: peer,
            bitfield: &session.bitfield,
            choking_us: session.choking.peer_choking,
            allowed_fast: &session.fast.allowed_fast_incoming,
            suggested: &session.fast.suggested,
        };
        let max = self.picker.settings().max_requests_per_peer;
        self.picker
            .pick(&view, max)
            .iter()
            .map(Message::request)
            .collect()
    }

    /// Sends Interested or NotInterested when our interest in the peer
    /// changed.
    pub fn update_interest(&mut self, peer: PeerIndex) -> Option<Message> {
        let interesting = {
            let session = self.peers.get(peer)?;
            self.picker.is_interesting(&session.bitfield)
        };
        let session = self.peers.get_mut(peer)?;
        if session.choking.am_interested == interesting {
            return None;
        }
        session.choking.am_interested = interesting;
        Some(if interesting {
            Message::Interested
        } else {
            Message::NotInterested
        })
    }

    /// Applies a hash check result and tells every peer about a good piece.
    pub fn piece_verified(&mut self, piece: u32, ok: bool) {
        self.picker.piece_verified(piece, ok);
        if !ok {
            return;
        }

        for index in self.peers.indices() {
            let lost_interest = self
                .peers
                .get(index)
                .is_some_and(|s| s.choking.am_interested && !self.picker.is_interesting(&s.bitfield));
            let Some(session) = self.peers.get_mut(index) else {
                continue;
            };
            session.fast.remove_suggested(piece);
            if !session.bitfield.get(piece as usize) {
                session.queue(Message::Have { piece });
            }
            if lost_interest {
                session.choking.am_interested = false;
                session.queue(Message::NotInterested);
            }
        }
    }

    pub fn block_written(&mut self, req: &BlockRequest) {
        self.picker.block_written(req);
    }

    pub fn choke(&mut self, peer: PeerIndex) -> Vec<Message> {
        let Some(session) = self.peers.get_mut(peer) else {
            return Vec::new();
        };
        if session.choking.am_choking {
            return Vec::new();
        }
        session.choking.am_choking = true;
        let mut out = vec![Message::Choke];

        if session.supports_fast() {
            // Queued requests outside the allowed-fast set get an explicit
            // reject.
            let allowed = &session.fast.allowed_fast_outgoing;
            let (keep, rejected): (Vec<_>, Vec<_>) = session
                .upload_queue
                .drain(..)
                .partition(|req| allowed.contains(&req.piece));
            session.upload_queue.extend(keep);
            out.extend(rejected.iter().map(Message::reject));
        } else {
            session.upload_queue.clear();
        }
        out
    }

    pub fn unchoke(&mut self, peer: PeerIndex) -> Vec<Message> {
        match self.peers.get_mut(peer) {
            Some(session) if session.choking.am_choking => {
                session.choking.am_choking = false;
                vec![Message::Unchoke]
            }
            _ => Vec::new(),
        }
    }

    /// Signalled when messages are queued for the peer or it is
    /// disconnected.
    pub fn outbox_ready(&self, peer: PeerIndex) -> Option<Arc<Notify>> {
        self.peers.get(peer).map(PeerSession::outbox_ready)
    }

    /// Messages queued for the peer while handling other peers.
    pub fn take_outbox(&mut self, peer: PeerIndex) -> Vec<Message> {
        self.peers
            .get_mut(peer)
            .map(|s| s.outbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// The next upload request to serve, if any.
    pub fn next_upload(&mut self, peer: PeerIndex) -> Option<BlockRequest> {
        self.peers.get_mut(peer)?.upload_queue.pop_front()
    }

    pub fn record_upload(&mut self, peer: PeerIndex, bytes: u64) {
        if let Some(session) = self.peers.get_mut(peer) {
            session.bytes_uploaded += bytes;
        }
    }

    /// Hands out initial-seed offers. The offer for `current` is returned,
    /// offers for other peers go to their outboxes.
    pub(super) fn offer_pieces(&mut self, current: PeerIndex) -> Vec<Message> {
        let mut out = Vec::new();
        let Some(seed) = self.initial_seed.as_mut() else {
            return out;
        };
        for (index, session) in self.peers.iter_mut() {
            if let Some(piece) = seed.offer(index, &session.bitfield) {
                let have = Message::Have { piece };
                if index == current {
                    out.push(have);
                } else {
                    session.queue(have);
                }
            }
        }
        out
    }
}
