use std::net::SocketAddr;

use super::node::{Node, NodeId};
use crate::constants::{DHT_BUCKET_SIZE, DHT_NUM_BUCKETS};

/// Kademlia buckets keyed by the first bit where a node id differs from ours.
///
/// Only freshness bookkeeping happens here: seen nodes are inserted or
/// touched, failing nodes are evicted. A full bucket ignores newcomers.
#[derive(Debug)]
pub struct RoutingTable {
    our_id: NodeId,
    buckets: Vec<Vec<Node>>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        Self {
            our_id,
            buckets: vec![Vec::new(); DHT_NUM_BUCKETS],
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Inserts a node or refreshes it if already known. Returns false when
    /// its bucket is full.
    pub fn add_node(&mut self, node: Node) -> bool {
        if node.id == self.our_id {
            return false;
        }
        let bucket = &mut self.buckets[self.our_id.bucket_index(&node.id)];

        if let Some(existing) = bucket.iter_mut().find(|n| n.id == node.id) {
            existing.addr = node.addr;
            existing.touch();
            return true;
        }
        if bucket.len() >= DHT_BUCKET_SIZE {
            return false;
        }
        bucket.push(node);
        true
    }

    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let bucket = &mut self.buckets[self.our_id.bucket_index(id)];
        let pos = bucket.iter().position(|n| &n.id == id)?;
        Some(bucket.remove(pos))
    }

    /// Counts a failed query against the node at `addr`; evicts it once bad.
    pub fn mark_failed(&mut self, addr: &SocketAddr) {
        for bucket in &mut self.buckets {
            if let Some(pos) = bucket.iter().position(|n| &n.addr == addr) {
                bucket[pos].fail();
                if bucket[pos].is_bad() {
                    bucket.remove(pos);
                }
                return;
            }
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.buckets[self.our_id.bucket_index(id)]
            .iter()
            .find(|n| &n.id == id)
    }

    /// Up to `count` nodes ordered by XOR distance to `target`.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes: Vec<&Node> = self.buckets.iter().flatten().collect();
        nodes.sort_by_key(|n| n.id.xor(target));
        nodes.into_iter().take(count).cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}
