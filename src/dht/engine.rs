use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::error::DhtError;
use super::message::{DhtMessage, DhtQuery, DhtResponse, TransactionId};
use super::node::{Node, NodeId};
use super::routing::RoutingTable;
use crate::constants::{
    DHT_CHANNEL_CAPACITY, DHT_MAX_PEERS_PER_RESPONSE, DHT_MAX_PEERS_PER_TORRENT, DHT_PEER_TTL,
    DHT_TOKEN_ROTATION, MAX_PENDING_DHT_QUERIES,
};
use crate::metainfo::InfoHash;
use crate::settings::EngineSettings;

/// A datagram waiting to be sent.
pub type Outbound = (SocketAddr, Bytes);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtEvent {
    /// A get_peers response carried peers for the torrent.
    PeersFound {
        info_hash: InfoHash,
        peers: Vec<SocketAddr>,
    },
    /// A remote node announced a peer to us.
    Announced {
        info_hash: InfoHash,
        peer: SocketAddr,
    },
}

/// Receiving ends handed out by [`DhtEngine::new`].
pub struct DhtChannels {
    pub outbound: mpsc::Receiver<Outbound>,
    pub events: mpsc::Receiver<DhtEvent>,
}

struct PendingQuery {
    addr: SocketAddr,
    /// Distinguishes queries that reuse a transaction id after wrapping.
    serial: u64,
    sender: oneshot::Sender<Result<DhtResponse, DhtError>>,
}

/// Removes a query's pending entry however `send_query` ends, including
/// when the caller drops the future.
struct PendingGuard<'a> {
    pending: &'a DashMap<TransactionId, PendingQuery>,
    tid: TransactionId,
    serial: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let serial = self.serial;
        self.pending.remove_if(&self.tid, |_, q| q.serial == serial);
    }
}

#[derive(Default)]
struct PeerStore {
    peers: HashMap<InfoHash, Vec<(SocketAddr, Instant)>>,
}

impl PeerStore {
    fn add(&mut self, info_hash: InfoHash, addr: SocketAddr) {
        let now = Instant::now();
        let peers = self.peers.entry(info_hash).or_default();
        peers.retain(|(a, at)| *a != addr && now.duration_since(*at) < DHT_PEER_TTL);
        if peers.len() < DHT_MAX_PEERS_PER_TORRENT {
            peers.push((addr, now));
        }
    }

    fn get(&mut self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        let now = Instant::now();
        let Some(peers) = self.peers.get_mut(info_hash) else {
            return Vec::new();
        };
        peers.retain(|(_, at)| now.duration_since(*at) < DHT_PEER_TTL);
        peers
            .iter()
            .take(DHT_MAX_PEERS_PER_RESPONSE)
            .map(|(a, _)| *a)
            .collect()
    }
}

struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenSecrets {
    fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }
}

fn token_with_secret(ip: IpAddr, secret: &[u8; 16]) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    match ip {
        IpAddr::V4(v4) => hasher.update(v4.octets()),
        IpAddr::V6(v6) => hasher.update(v6.octets()),
    }
    Bytes::copy_from_slice(&hasher.finalize()[..8])
}

/// The DHT node state and its query/response matching.
///
/// Packets leave through the outbound channel and arrive through
/// [`receive`](Self::receive), so the engine runs over a real socket
/// ([`run`](Self::run)) or in memory alike. Incoming queries are answered
/// with a non-blocking enqueue; a full queue drops the reply.
pub struct DhtEngine {
    our_id: NodeId,
    routing: Mutex<RoutingTable>,
    pending: DashMap<TransactionId, PendingQuery>,
    peers: Mutex<PeerStore>,
    tokens: Mutex<TokenSecrets>,
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Sender<DhtEvent>,
    query_timeout: Duration,
    next_transaction: AtomicU64,
}

impl DhtEngine {
    pub fn new(our_id: NodeId, settings: &EngineSettings) -> (Self, DhtChannels) {
        let (outbound, outbound_rx) = mpsc::channel(DHT_CHANNEL_CAPACITY);
        let (events, events_rx) = mpsc::channel(DHT_CHANNEL_CAPACITY);
        let engine = Self {
            our_id,
            routing: Mutex::new(RoutingTable::new(our_id)),
            pending: DashMap::new(),
            peers: Mutex::new(PeerStore::default()),
            tokens: Mutex::new(TokenSecrets::new()),
            outbound,
            events,
            query_timeout: settings.dht_query_timeout,
            next_transaction: AtomicU64::new(u64::from(rand::random::<u16>())),
        };
        let channels = DhtChannels {
            outbound: outbound_rx,
            events: events_rx,
        };
        (engine, channels)
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn node_count(&self) -> usize {
        self.routing.lock().node_count()
    }

    pub fn add_node(&self, node: Node) -> bool {
        self.routing.lock().add_node(node)
    }

    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        self.routing.lock().find_closest(target, count)
    }

    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    /// Sends a query and waits for the matching response.
    ///
    /// The pending entry is removed by whichever comes first, the response
    /// or the timeout; the other path then finds nothing to do.
    pub async fn send_query(&self, addr: SocketAddr, query: DhtQuery) -> Result<DhtResponse, DhtError> {
        if self.pending.len() >= MAX_PENDING_DHT_QUERIES {
            return Err(DhtError::TooManyQueries);
        }
        let method = query.method().to_string();
        let (guard, rx) = self.register(addr);

        let packet = Bytes::from(DhtMessage::query(guard.tid.clone(), query).encode());
        if self.outbound.send((addr, packet)).await.is_err() {
            return Err(DhtError::ChannelClosed);
        }

        match timeout(self.query_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DhtError::ChannelClosed),
            Err(_) => {
                drop(guard);
                self.routing.lock().mark_failed(&addr);
                debug!(%addr, %method, "DHT query timed out");
                Err(DhtError::Timeout)
            }
        }
    }

    fn register(&self, addr: SocketAddr) -> (PendingGuard<'_>, oneshot::Receiver<Result<DhtResponse, DhtError>>) {
        loop {
            let serial = self.next_transaction.fetch_add(1, Ordering::Relaxed);
            let tid = Bytes::copy_from_slice(&(serial as u16).to_be_bytes());
            if let Entry::Vacant(slot) = self.pending.entry(tid.clone()) {
                let (sender, rx) = oneshot::channel();
                slot.insert(PendingQuery {
                    addr,
                    serial,
                    sender,
                });
                let guard = PendingGuard {
                    pending: &self.pending,
                    tid,
                    serial,
                };
                return (guard, rx);
            }
        }
    }

    pub async fn ping(&self, addr: SocketAddr) -> Result<NodeId, DhtError> {
        let response = self.send_query(addr, DhtQuery::Ping { id: self.our_id }).await?;
        Ok(response.id)
    }

    /// Asks `addr` for the nodes closest to `target` and learns them.
    pub async fn find_node(&self, addr: SocketAddr, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let query = DhtQuery::FindNode {
            id: self.our_id,
            target,
        };
        let nodes = self.send_query(addr, query).await?.nodes.unwrap_or_default();
        self.learn(&nodes);
        Ok(nodes)
    }

    /// Asks `addr` for peers of a torrent. Found peers are also sent as a
    /// [`DhtEvent::PeersFound`].
    pub async fn get_peers(&self, addr: SocketAddr, info_hash: InfoHash) -> Result<DhtResponse, DhtError> {
        let query = DhtQuery::GetPeers {
            id: self.our_id,
            info_hash,
        };
        let response = self.send_query(addr, query).await?;
        if let Some(nodes) = &response.nodes {
            self.learn(nodes);
        }
        if let Some(peers) = response.values.as_ref().filter(|p| !p.is_empty()) {
            self.emit(DhtEvent::PeersFound {
                info_hash,
                peers: peers.clone(),
            });
        }
        Ok(response)
    }

    pub async fn announce_peer(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
    ) -> Result<(), DhtError> {
        let query = DhtQuery::AnnouncePeer {
            id: self.our_id,
            info_hash,
            port,
            token,
            implied_port: false,
        };
        self.send_query(addr, query).await?;
        Ok(())
    }

    fn learn(&self, nodes: &[Node]) {
        let mut routing = self.routing.lock();
        for node in nodes {
            routing.add_node(node.clone());
        }
    }

    /// Decodes and handles one datagram. Malformed packets are dropped.
    pub fn receive(&self, data: &[u8], from: SocketAddr) {
        match DhtMessage::decode(data) {
            Ok(message) => message.handle(self, from),
            Err(e) => debug!(%from, error = %e, "dropping malformed DHT packet"),
        }
    }

    pub fn rotate_tokens(&self) {
        self.tokens.lock().rotate();
        debug!("DHT token secret rotated");
    }

    /// Drives the engine over a UDP socket until it fails.
    pub async fn run(&self, socket: UdpSocket, mut outbound: mpsc::Receiver<Outbound>) -> Result<(), DhtError> {
        let mut buf = vec![0u8; 65535];
        let mut rotation = interval(DHT_TOKEN_ROTATION);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rotation.tick().await;

        let local = socket.local_addr()?;
        info!(addr = %local, id = %self.our_id, "DHT engine running");

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    self.receive(&buf[..n], from);
                }
                packet = outbound.recv() => {
                    let Some((to, data)) = packet else {
                        info!("DHT outbound channel closed, stopping");
                        return Ok(());
                    };
                    if let Err(e) = socket.send_to(&data, to).await {
                        debug!(%to, error = %e, "failed to send DHT packet");
                    }
                }
                _ = rotation.tick() => self.rotate_tokens(),
            }
        }
    }

    pub(super) fn refresh_node(&self, id: NodeId, addr: SocketAddr) {
        self.routing.lock().add_node(Node::new(id, addr));
    }

    /// Resolves the pending query for `tid`. Returns false when nothing was
    /// waiting, e.g. because the query already timed out.
    pub(super) fn complete(
        &self,
        tid: &TransactionId,
        from: SocketAddr,
        result: Result<DhtResponse, DhtError>,
    ) -> bool {
        let Some((_, pending)) = self.pending.remove_if(tid, |_, p| p.addr == from) else {
            trace!(%from, "ignoring response to unknown transaction");
            return false;
        };
        // The waiter may have given up already.
        let _ = pending.sender.send(result);
        true
    }

    pub(super) fn reply(&self, to: SocketAddr, message: DhtMessage) {
        let packet = Bytes::from(message.encode());
        match self.outbound.try_send((to, packet)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(%to, "outbound queue full, dropping DHT reply"),
            Err(TrySendError::Closed(_)) => trace!("outbound channel closed"),
        }
    }

    pub(super) fn emit(&self, event: DhtEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!(?event, "DHT event channel full, dropping event");
        }
    }

    pub(super) fn token_for(&self, ip: IpAddr) -> Bytes {
        token_with_secret(ip, &self.tokens.lock().current)
    }

    /// Tokens from the current or the previous secret are accepted.
    pub(super) fn validate_token(&self, ip: IpAddr, token: &[u8]) -> bool {
        let secrets = self.tokens.lock();
        token_with_secret(ip, &secrets.current) == token
            || token_with_secret(ip, &secrets.previous) == token
    }

    pub(super) fn store_peer(&self, info_hash: InfoHash, peer: SocketAddr) {
        self.peers.lock().add(info_hash, peer);
    }

    pub(super) fn stored_peers(&self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        self.peers.lock().get(info_hash)
    }
}
