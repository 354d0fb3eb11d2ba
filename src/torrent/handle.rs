use std::net::SocketAddr;

use tracing::{debug, trace};

use super::context::{TorrentContext, TorrentEvent};
use crate::bitfield::Bitfield;
use crate::peer::{
    metadata_piece, ExtensionMessage, Message, MetadataMessage, MetadataMessageType, PeerError,
    UT_METADATA,
};
use crate::picker::{Block, BlockRequest, PeerIndex};
use crate::pex::PexMessage;

impl Message {
    /// Applies a message received from `peer` to the torrent.
    ///
    /// Returns the replies for that peer. Messages for other peers, such as
    /// endgame cancels, are queued in their outboxes.
    pub fn handle(self, ctx: &mut TorrentContext, peer: PeerIndex) -> Result<Vec<Message>, PeerError> {
        if !ctx.peers.contains(peer) {
            return Err(PeerError::ConnectionClosed);
        }
        trace!(%peer, id = ?self.id(), "handling message");

        match self {
            Message::KeepAlive => Ok(Vec::new()),
            Message::Choke => on_choke(ctx, peer),
            Message::Unchoke => {
                ctx.session(peer)?.choking.peer_choking = false;
                Ok(ctx.fill_requests(peer))
            }
            Message::Interested => {
                ctx.session(peer)?.choking.peer_interested = true;
                Ok(Vec::new())
            }
            Message::NotInterested => {
                ctx.session(peer)?.choking.peer_interested = false;
                Ok(Vec::new())
            }
            Message::Have { piece } => on_have(ctx, peer, piece),
            Message::Bitfield(bytes) => {
                let bitfield = Bitfield::from_bytes(&bytes, ctx.piece_count() as usize)
                    .map_err(|e| PeerError::Protocol(e.to_string()))?;
                replace_bitfield(ctx, peer, bitfield)
            }
            Message::HaveAll => {
                ctx.session(peer)?.require_fast("HaveAll")?;
                let all = Bitfield::full(ctx.piece_count() as usize);
                replace_bitfield(ctx, peer, all)
            }
            Message::HaveNone => {
                ctx.session(peer)?.require_fast("HaveNone")?;
                let none = Bitfield::new(ctx.piece_count() as usize);
                replace_bitfield(ctx, peer, none)
            }
            Message::Request {
                index,
                begin,
                length,
            } => on_request(ctx, peer, BlockRequest::new(index, begin, length)),
            Message::Piece { index, begin, data } => on_piece(ctx, peer, Block::new(index, begin, data)),
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                let req = BlockRequest::new(index, begin, length);
                ctx.session(peer)?.upload_queue.retain(|r| *r != req);
                Ok(Vec::new())
            }
            Message::Port(port) => {
                let session = ctx.session(peer)?;
                session.dht_port = Some(port);
                let node = SocketAddr::new(session.addr.ip(), port);
                ctx.emit(TorrentEvent::DhtNode(node));
                Ok(Vec::new())
            }
            Message::Suggest { piece } => {
                let count = ctx.piece_count();
                let session = ctx.session(peer)?;
                session.require_fast("Suggest")?;
                if piece < count {
                    session.fast.add_suggested(piece);
                }
                Ok(Vec::new())
            }
            Message::Reject {
                index,
                begin,
                length,
            } => {
                ctx.session(peer)?.require_fast("Reject")?;
                let req = BlockRequest::new(index, begin, length);
                if !ctx.picker.reject(peer, &req) {
                    debug!(%peer, ?req, "reject for a request we never sent");
                }
                Ok(Vec::new())
            }
            Message::AllowedFast { piece } => {
                let count = ctx.piece_count();
                let session = ctx.session(peer)?;
                session.require_fast("AllowedFast")?;
                if piece >= count {
                    return Ok(Vec::new());
                }
                session.fast.add_allowed_fast_incoming(piece);
                let choked = session.choking.peer_choking;
                let mut out: Vec<Message> = ctx.update_interest(peer).into_iter().collect();
                if choked {
                    out.extend(ctx.fill_requests(peer));
                }
                Ok(out)
            }
            Message::Extended { message, .. } => {
                if !ctx.session(peer)?.capabilities.extension_protocol {
                    return Err(PeerError::Protocol(
                        "extended message without the extension protocol".into(),
                    ));
                }
                on_extended(ctx, peer, message)
            }
        }
    }
}

fn on_choke(ctx: &mut TorrentContext, peer: PeerIndex) -> Result<Vec<Message>, PeerError> {
    let session = ctx.session(peer)?;
    session.choking.peer_choking = true;
    if session.supports_fast() {
        // A fast peer rejects what it will not serve; allowed-fast requests
        // stay outstanding.
        let allowed = session.fast.allowed_fast_incoming.clone();
        ctx.picker.cancel_choked(peer, &allowed);
    } else {
        ctx.picker.cancel_peer(peer);
    }
    Ok(Vec::new())
}

fn on_have(ctx: &mut TorrentContext, peer: PeerIndex, piece: u32) -> Result<Vec<Message>, PeerError> {
    if piece >= ctx.piece_count() {
        return Err(PeerError::Protocol(format!("have for piece {piece} out of range")));
    }
    let session = ctx.session(peer)?;
    if session.bitfield.get(piece as usize) {
        return Ok(Vec::new());
    }
    session.bitfield.set(piece as usize, true);
    ctx.picker.peer_have(piece);

    if let Some(seed) = ctx.initial_seed.as_mut() {
        seed.on_peer_have(peer, piece);
    }
    Ok(after_availability_change(ctx, peer))
}

fn replace_bitfield(
    ctx: &mut TorrentContext,
    peer: PeerIndex,
    bitfield: Bitfield,
) -> Result<Vec<Message>, PeerError> {
    let session = ctx.session(peer)?;
    let old = std::mem::replace(&mut session.bitfield, bitfield.clone());
    ctx.picker.peer_bitfield_removed(&old);
    ctx.picker.peer_bitfield_added(&bitfield);

    // Pieces a peer brings along were not uploaded by us.
    if let Some(seed) = ctx.initial_seed.as_mut() {
        for piece in bitfield.iter_true() {
            seed.on_not_initial_peer_have(piece as u32);
        }
    }
    Ok(after_availability_change(ctx, peer))
}

fn after_availability_change(ctx: &mut TorrentContext, peer: PeerIndex) -> Vec<Message> {
    let mut out = ctx.offer_pieces(peer);
    out.extend(ctx.update_interest(peer));
    out.extend(ctx.fill_requests(peer));
    out
}

fn on_request(
    ctx: &mut TorrentContext,
    peer: PeerIndex,
    req: BlockRequest,
) -> Result<Vec<Message>, PeerError> {
    if !ctx.picker.layout().is_valid(&req) {
        return Err(PeerError::Protocol(format!("invalid request {req:?}")));
    }
    let have = ctx.picker.have_piece(req.piece);
    let max_queue = ctx.max_upload_queue;
    let session = ctx.session(peer)?;

    let choked = session.choking.am_choking && !session.fast.should_serve_choked_request(req.piece);
    let refuse = !have || choked || session.upload_queue.len() >= max_queue;
    if refuse {
        return Ok(if session.supports_fast() {
            vec![Message::reject(&req)]
        } else {
            Vec::new()
        });
    }

    if !session.upload_queue.contains(&req) {
        session.upload_queue.push_back(req);
    }
    Ok(Vec::new())
}

fn on_piece(ctx: &mut TorrentContext, peer: PeerIndex, block: Block) -> Result<Vec<Message>, PeerError> {
    let req = block.request();
    let session = ctx.session(peer)?;
    session.bytes_downloaded += block.data.len() as u64;

    let outcome = ctx.picker.on_block_received(peer, &req);
    if !outcome.accepted {
        debug!(%peer, ?req, "discarding unwanted block");
        return Ok(ctx.fill_requests(peer));
    }

    for (holder, cancel) in outcome.cancels {
        if let Some(other) = ctx.peers.get_mut(holder) {
            other.queue(Message::cancel(&cancel));
        }
    }
    ctx.emit(TorrentEvent::BlockReceived { peer, block });
    if let Some(piece) = outcome.piece_complete {
        ctx.emit(TorrentEvent::PieceComplete(piece));
    }
    Ok(ctx.fill_requests(peer))
}

fn on_extended(
    ctx: &mut TorrentContext,
    peer: PeerIndex,
    message: ExtensionMessage,
) -> Result<Vec<Message>, PeerError> {
    match message {
        ExtensionMessage::Handshake(hs) => {
            debug!(%peer, client = ?hs.client, "extension handshake");
            ctx.session(peer)?.extensions = Some(hs);
            Ok(Vec::new())
        }
        ExtensionMessage::Pex(pex) => {
            on_pex(ctx, pex);
            Ok(Vec::new())
        }
        ExtensionMessage::Metadata(md) => on_metadata(ctx, peer, md),
        ExtensionMessage::Unknown(_) => Ok(Vec::new()),
    }
}

fn on_pex(ctx: &mut TorrentContext, pex: PexMessage) {
    if ctx.private {
        return;
    }
    let found: Vec<SocketAddr> = pex.added_peers().map(|p| p.addr).collect();
    if !found.is_empty() {
        ctx.emit(TorrentEvent::PeersFound(found));
    }
}

fn on_metadata(
    ctx: &mut TorrentContext,
    peer: PeerIndex,
    md: MetadataMessage,
) -> Result<Vec<Message>, PeerError> {
    if md.msg_type != MetadataMessageType::Request {
        return Ok(Vec::new());
    }
    let raw_info = ctx.raw_info.clone();
    let Some(id) = ctx.session(peer)?.extension_id(UT_METADATA) else {
        return Ok(Vec::new());
    };

    let reply = match raw_info.as_ref().and_then(|info| {
        metadata_piece(info, md.piece).map(|data| (info.len(), data))
    }) {
        Some((total, data)) => MetadataMessage::data(md.piece, total as u32, data),
        None => MetadataMessage::reject(md.piece),
    };
    Ok(vec![Message::Extended {
        id,
        message: ExtensionMessage::Metadata(reply),
    }])
}
