use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;

use crate::bitfield::Bitfield;
use crate::peer::{ExtensionHandshake, FastState, Message, PeerCapabilities, PeerError, PeerId};
use crate::picker::{BlockRequest, PeerIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokingState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokingState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Protocol state of one connected peer, owned by the torrent's peer table.
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub addr: SocketAddr,
    pub peer_id: Option<PeerId>,
    /// Features both sides negotiated in the handshake.
    pub capabilities: PeerCapabilities,
    pub choking: ChokingState,
    /// Pieces the peer has.
    pub bitfield: Bitfield,
    pub fast: FastState,
    /// The peer's extension handshake, once received.
    pub extensions: Option<ExtensionHandshake>,
    /// Requests the peer made that we have yet to serve.
    pub upload_queue: VecDeque<BlockRequest>,
    /// DHT port announced with a Port message.
    pub dht_port: Option<u16>,
    /// Messages for this peer produced while handling another peer's input.
    /// Fill it through [`PeerSession::queue`] so the connection task wakes up.
    pub outbox: VecDeque<Message>,
    outbox_ready: Arc<Notify>,
    pub connected_at: Instant,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
}

impl PeerSession {
    pub fn new(addr: SocketAddr, capabilities: PeerCapabilities, piece_count: u32) -> Self {
        Self {
            addr,
            peer_id: None,
            capabilities,
            choking: ChokingState::default(),
            bitfield: Bitfield::new(piece_count as usize),
            fast: FastState::new(),
            extensions: None,
            upload_queue: VecDeque::new(),
            dht_port: None,
            outbox: VecDeque::new(),
            outbox_ready: Arc::new(Notify::new()),
            connected_at: Instant::now(),
            bytes_downloaded: 0,
            bytes_uploaded: 0,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn supports_fast(&self) -> bool {
        self.capabilities.fast
    }

    /// Fast-extension messages are only legal on a fast connection.
    pub fn require_fast(&self, what: &str) -> Result<(), PeerError> {
        if self.capabilities.fast {
            Ok(())
        } else {
            Err(PeerError::Message(format!(
                "{what} received without the fast extension"
            )))
        }
    }

    pub fn can_request(&self) -> bool {
        self.choking.am_interested
            && (!self.choking.peer_choking || !self.fast.allowed_fast_incoming.is_empty())
    }

    /// Queues a message for the peer and wakes its connection task.
    pub fn queue(&mut self, message: Message) {
        self.outbox.push_back(message);
        self.outbox_ready.notify_one();
    }

    /// Signalled whenever [`PeerSession::queue`] adds to the outbox.
    pub fn outbox_ready(&self) -> Arc<Notify> {
        self.outbox_ready.clone()
    }

    /// The id the peer wants to receive extension `name` on.
    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.as_ref()?.get_extension_id(name)
    }
}

/// Arena of connected peers.
///
/// Slots freed by a disconnect are reused under a new generation; lookups
/// with an index from an earlier generation find nothing.
#[derive(Debug, Default)]
pub struct PeerTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<PeerSession>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: PeerSession) -> PeerIndex {
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot];
                entry.session = Some(session);
                PeerIndex::with_generation(slot, entry.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    session: Some(session),
                });
                PeerIndex::new(self.slots.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, index: PeerIndex) -> Option<PeerSession> {
        let entry = self.slots.get_mut(index.slot())?;
        if entry.generation != index.generation() {
            return None;
        }
        let session = entry.session.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot());
        Some(session)
    }

    pub fn get(&self, index: PeerIndex) -> Option<&PeerSession> {
        let entry = self.slots.get(index.slot())?;
        if entry.generation != index.generation() {
            return None;
        }
        entry.session.as_ref()
    }

    pub fn get_mut(&mut self, index: PeerIndex) -> Option<&mut PeerSession> {
        let entry = self.slots.get_mut(index.slot())?;
        if entry.generation != index.generation() {
            return None;
        }
        entry.session.as_mut()
    }

    pub fn contains(&self, index: PeerIndex) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> Vec<PeerIndex> {
        self.iter().map(|(index, _)| index).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerIndex, &PeerSession)> {
        self.slots.iter().enumerate().filter_map(|(i, entry)| {
            let index = PeerIndex::with_generation(i, entry.generation);
            entry.session.as_ref().map(|s| (index, s))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerIndex, &mut PeerSession)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, entry)| {
            let index = PeerIndex::with_generation(i, entry.generation);
            entry.session.as_mut().map(|s| (index, s))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn session(port: u16) -> PeerSession {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        PeerSession::new(addr, PeerCapabilities::default(), 4)
    }

    #[test]
    fn test_table_reuses_slots() {
        let mut table = PeerTable::new();
        let a = table.insert(session(1));
        let b = table.insert(session(2));
        assert_eq!((a, b), (PeerIndex::new(0), PeerIndex::new(1)));

        assert_eq!(table.remove(a).map(|s| s.addr.port()), Some(1));
        assert!(table.remove(a).is_none());
        assert_eq!(table.len(), 1);

        let c = table.insert(session(3));
        assert_eq!(c.slot(), 0);
        assert_ne!(c, a);
        assert_eq!(table.indices(), vec![c, b]);
    }

    #[test]
    fn test_stale_index_misses_new_occupant() {
        let mut table = PeerTable::new();
        let old = table.insert(session(1));
        table.remove(old);
        let new = table.insert(session(2));

        assert!(!table.contains(old));
        assert!(table.get(old).is_none());
        assert!(table.get_mut(old).is_none());
        assert!(table.remove(old).is_none());
        assert_eq!(table.get(new).map(|s| s.addr.port()), Some(2));
    }

    #[test]
    fn test_queue_wakes_waiter() {
        let mut s = session(1);
        let ready = s.outbox_ready();
        s.queue(Message::Have { piece: 1 });
        // The permit is stored until someone waits.
        assert!(ready.notified().now_or_never().is_some());
        assert_eq!(s.outbox.len(), 1);
    }

    #[test]
    fn test_require_fast() {
        let mut s = session(1);
        assert!(matches!(s.require_fast("HaveAll"), Err(PeerError::Message(_))));
        s.capabilities.fast = true;
        assert!(s.require_fast("HaveAll").is_ok());
    }
}
