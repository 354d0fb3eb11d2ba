//! Distributed Hash Table (BEP-5)
//!
//! KRPC message framing and the query/response engine used for trackerless
//! peer discovery. Bucket refresh and node replacement are left to the
//! caller; the engine keeps seen nodes fresh and answers queries from its
//! routing table, announced peers and write tokens.

mod engine;
mod error;
mod handle;
mod message;
mod node;
mod routing;

pub use engine::{DhtChannels, DhtEngine, DhtEvent, Outbound};
pub use error::DhtError;
pub use message::{
    DhtBody, DhtMessage, DhtQuery, DhtResponse, TransactionId, ERROR_GENERIC, ERROR_METHOD_UNKNOWN,
    ERROR_PROTOCOL, ERROR_SERVER,
};
pub use node::{decode_nodes, encode_nodes, Node, NodeId};
pub use routing::RoutingTable;
