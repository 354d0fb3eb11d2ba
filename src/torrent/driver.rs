use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::context::SharedTorrent;
use crate::peer::{Message, PeerError, PeerTransport};
use crate::picker::PeerIndex;

/// Runs one peer connection until it fails or closes.
///
/// `opening` holds the messages returned by
/// [`TorrentContext::add_peer`](super::TorrentContext::add_peer). Messages
/// other peers' traffic queues for this one go out as soon as they are
/// queued, even while the remote stays silent. The torrent lock is held only
/// while a message is applied, never across I/O. The peer is removed from
/// the torrent when the loop ends.
pub async fn run_peer<S>(
    torrent: SharedTorrent,
    peer: PeerIndex,
    mut transport: PeerTransport<S>,
    opening: Vec<Message>,
) -> Result<(), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = exchange(&torrent, peer, &mut transport, opening).await;
    if let Err(ref err) = result {
        debug!(%peer, error = %err, "connection ended");
    }
    torrent.lock().disconnect(peer);
    result
}

async fn exchange<S>(
    torrent: &SharedTorrent,
    peer: PeerIndex,
    transport: &mut PeerTransport<S>,
    opening: Vec<Message>,
) -> Result<(), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outbox_ready = torrent
        .lock()
        .outbox_ready(peer)
        .ok_or(PeerError::ConnectionClosed)?;

    for message in &opening {
        transport.send_message(message).await?;
    }

    loop {
        let outgoing = tokio::select! {
            message = transport.receive_message() => {
                let message = message?;
                let mut ctx = torrent.lock();
                let mut out = ctx.receive(peer, message)?;
                out.extend(ctx.take_outbox(peer));
                out
            }
            _ = outbox_ready.notified() => {
                let mut ctx = torrent.lock();
                if !ctx.peers().contains(peer) {
                    return Err(PeerError::ConnectionClosed);
                }
                ctx.take_outbox(peer)
            }
        };
        for message in &outgoing {
            transport.send_message(message).await?;
        }
    }
}
