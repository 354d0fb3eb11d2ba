use std::net::SocketAddr;

use tracing::{debug, trace};

use super::engine::{DhtEngine, DhtEvent};
use super::message::{
    DhtBody, DhtMessage, DhtQuery, DhtResponse, ERROR_METHOD_UNKNOWN, ERROR_PROTOCOL,
};
use super::node::NodeId;
use super::error::DhtError;
use crate::constants::DHT_BUCKET_SIZE;

impl DhtMessage {
    /// Applies a packet received from `from`.
    ///
    /// The sender is refreshed in the routing table. Responses and errors
    /// complete the matching pending query; queries are answered through
    /// the engine's outbound queue.
    pub fn handle(self, engine: &DhtEngine, from: SocketAddr) {
        if let Some(id) = self.sender_id() {
            engine.refresh_node(id, from);
        }

        match self.body {
            DhtBody::Query(query) => {
                trace!(%from, method = query.method(), "DHT query");
                let body = answer(engine, from, query);
                engine.reply(
                    from,
                    DhtMessage {
                        transaction_id: self.transaction_id,
                        version: None,
                        body,
                    },
                );
            }
            DhtBody::Response(response) => {
                engine.complete(&self.transaction_id, from, Ok(response));
            }
            DhtBody::Error { code, message } => {
                debug!(%from, code, %message, "DHT error response");
                engine.complete(
                    &self.transaction_id,
                    from,
                    Err(DhtError::Remote { code, message }),
                );
            }
        }
    }
}

fn answer(engine: &DhtEngine, from: SocketAddr, query: DhtQuery) -> DhtBody {
    let our_id = *engine.our_id();

    match query {
        DhtQuery::Ping { .. } => DhtBody::Response(DhtResponse::new(our_id)),
        DhtQuery::FindNode { target, .. } => {
            let nodes = engine.find_closest(&target, DHT_BUCKET_SIZE);
            DhtBody::Response(DhtResponse::new(our_id).with_nodes(nodes))
        }
        DhtQuery::GetPeers { info_hash, .. } => {
            let nodes = engine.find_closest(&NodeId(info_hash.0), DHT_BUCKET_SIZE);
            let mut response = DhtResponse::new(our_id)
                .with_token(engine.token_for(from.ip()))
                .with_nodes(nodes);
            let peers = engine.stored_peers(&info_hash);
            if !peers.is_empty() {
                response = response.with_values(peers);
            }
            DhtBody::Response(response)
        }
        DhtQuery::AnnouncePeer {
            info_hash,
            port,
            token,
            implied_port,
            ..
        } => {
            if !engine.validate_token(from.ip(), &token) {
                debug!(%from, "rejecting announce_peer with a bad token");
                return DhtBody::Error {
                    code: ERROR_PROTOCOL,
                    message: "bad token".into(),
                };
            }
            let port = if implied_port { from.port() } else { port };
            let peer = SocketAddr::new(from.ip(), port);
            engine.store_peer(info_hash, peer);
            engine.emit(DhtEvent::Announced { info_hash, peer });
            DhtBody::Response(DhtResponse::new(our_id))
        }
        DhtQuery::Unknown { method, .. } => {
            debug!(%from, %method, "unknown DHT method");
            DhtBody::Error {
                code: ERROR_METHOD_UNKNOWN,
                message: "method unknown".into(),
            }
        }
    }
}
