use super::error::DhtError;
use crate::constants::{COMPACT_NODE_LEN, COMPACT_PEER_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;

const MAX_FAILURES: u8 = 3;

/// A 160-bit DHT node id, ordered byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub const MIN: NodeId = NodeId([0u8; 20]);
    pub const MAX: NodeId = NodeId([0xff; 20]);

    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id: [u8; 20] = bytes.try_into().map_err(|_| DhtError::InvalidNodeId)?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance. Comparing two distances with `Ord` compares closeness.
    pub fn xor(&self, other: &NodeId) -> NodeId {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        NodeId(dist)
    }

    /// Index of the first differing bit, 0 for the farthest half.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.xor(other);

        for (i, &byte) in dist.0.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }

        159
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub failures: u8,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.addr == other.addr
    }
}

impl Eq for Node {}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
    }

    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn is_bad(&self) -> bool {
        self.failures >= MAX_FAILURES
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != COMPACT_NODE_LEN {
            return None;
        }
        let id = NodeId::from_bytes(&data[..20]).ok()?;
        let addr = peer_from_compact(&data[20..])?;
        Some(Self::new(id, addr))
    }

    /// Compact node info; IPv6 nodes have none.
    pub fn to_compact(&self) -> Option<[u8; COMPACT_NODE_LEN]> {
        let SocketAddr::V4(v4) = self.addr else {
            return None;
        };
        let mut compact = [0u8; COMPACT_NODE_LEN];
        compact[..20].copy_from_slice(&self.id.0);
        compact[20..24].copy_from_slice(&v4.ip().octets());
        compact[24..].copy_from_slice(&v4.port().to_be_bytes());
        Some(compact)
    }
}

/// Concatenated compact node infos. Trailing partial entries are dropped.
pub fn decode_nodes(data: &[u8]) -> Vec<Node> {
    data.chunks_exact(COMPACT_NODE_LEN)
        .filter_map(Node::from_compact)
        .collect()
}

pub fn encode_nodes(nodes: &[Node]) -> Bytes {
    let mut buf = BytesMut::with_capacity(nodes.len() * COMPACT_NODE_LEN);
    for compact in nodes.iter().filter_map(Node::to_compact) {
        buf.put_slice(&compact);
    }
    buf.freeze()
}

pub fn peer_from_compact(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != COMPACT_PEER_LEN {
        return None;
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

pub fn peer_to_compact(addr: &SocketAddr) -> Option<Bytes> {
    let SocketAddr::V4(v4) = addr else {
        return None;
    };
    Some(compact_v4(v4))
}

fn compact_v4(addr: &SocketAddrV4) -> Bytes {
    let mut buf = BytesMut::with_capacity(COMPACT_PEER_LEN);
    buf.put_slice(&addr.ip().octets());
    buf.put_u16(addr.port());
    buf.freeze()
}
