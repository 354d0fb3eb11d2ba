use super::error::DhtError;
use super::node::{decode_nodes, encode_nodes, peer_from_compact, peer_to_compact, Node, NodeId};
use crate::bencode::{self, Dict, Value};
use crate::metainfo::InfoHash;
use bytes::Bytes;
use std::net::SocketAddr;

pub type TransactionId = Bytes;

pub const ERROR_GENERIC: i64 = 201;
pub const ERROR_SERVER: i64 = 202;
pub const ERROR_PROTOCOL: i64 = 203;
pub const ERROR_METHOD_UNKNOWN: i64 = 204;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtQuery {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: InfoHash,
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
    /// A method we do not implement. Answered with error 204.
    Unknown {
        id: NodeId,
        method: String,
    },
}

impl DhtQuery {
    pub fn method(&self) -> &str {
        match self {
            DhtQuery::Ping { .. } => "ping",
            DhtQuery::FindNode { .. } => "find_node",
            DhtQuery::GetPeers { .. } => "get_peers",
            DhtQuery::AnnouncePeer { .. } => "announce_peer",
            DhtQuery::Unknown { method, .. } => method,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            DhtQuery::Ping { id }
            | DhtQuery::FindNode { id, .. }
            | DhtQuery::GetPeers { id, .. }
            | DhtQuery::AnnouncePeer { id, .. }
            | DhtQuery::Unknown { id, .. } => *id,
        }
    }
}

/// The `r` dictionary of a response.
///
/// KRPC responses do not name the query they answer; the meaning of the
/// optional fields follows from the pending query with the same
/// transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtResponse {
    pub id: NodeId,
    pub nodes: Option<Vec<Node>>,
    pub values: Option<Vec<SocketAddr>>,
    pub token: Option<Bytes>,
}

impl DhtResponse {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            nodes: None,
            values: None,
            token: None,
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_values(mut self, values: Vec<SocketAddr>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_token(mut self, token: Bytes) -> Self {
        self.token = Some(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtBody {
    Query(DhtQuery),
    Response(DhtResponse),
    Error { code: i64, message: String },
}

/// A KRPC packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    /// Client version from the `v` key.
    pub version: Option<Bytes>,
    pub body: DhtBody,
}

impl DhtMessage {
    pub fn query(transaction_id: TransactionId, query: DhtQuery) -> Self {
        Self {
            transaction_id,
            version: None,
            body: DhtBody::Query(query),
        }
    }

    pub fn response(transaction_id: TransactionId, response: DhtResponse) -> Self {
        Self {
            transaction_id,
            version: None,
            body: DhtBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: impl Into<String>) -> Self {
        Self {
            transaction_id,
            version: None,
            body: DhtBody::Error {
                code,
                message: message.into(),
            },
        }
    }

    pub fn with_version(mut self, version: Bytes) -> Self {
        self.version = Some(version);
        self
    }

    /// The node that sent the message, if the message carries one.
    pub fn sender_id(&self) -> Option<NodeId> {
        match &self.body {
            DhtBody::Query(q) => Some(q.id()),
            DhtBody::Response(r) => Some(r.id),
            DhtBody::Error { .. } => None,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.body, DhtBody::Query(_))
    }

    /// Builds the bencoded dictionary with keys in canonical order.
    pub fn to_value(&self) -> Value {
        let mut dict = Dict::with_capacity(5);
        dict.insert("t", Value::Bytes(self.transaction_id.clone()));
        if let Some(version) = &self.version {
            dict.insert("v", Value::Bytes(version.clone()));
        }

        match &self.body {
            DhtBody::Query(query) => {
                dict.insert("y", Value::string("q"));
                dict.insert("q", Value::string(query.method()));
                dict.insert("a", Value::Dict(query_args(query)));
            }
            DhtBody::Response(response) => {
                dict.insert("y", Value::string("r"));
                dict.insert("r", Value::Dict(response_dict(response)));
            }
            DhtBody::Error { code, message } => {
                dict.insert("y", Value::string("e"));
                dict.insert(
                    "e",
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        dict.sort_keys();
        Value::Dict(dict)
    }

    /// Exact size of [`encode`](Self::encode)'s output.
    pub fn byte_length(&self) -> usize {
        self.to_value().encoded_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        bencode::encode(&self.to_value())
    }

    /// Writes the packet at `offset` and returns the bytes written.
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) -> Result<usize, DhtError> {
        Ok(bencode::encode_into(&self.to_value(), buf, offset)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DhtError> {
        let value = bencode::decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| DhtError::InvalidMessage("expected dict".into()))?;

        let transaction_id = dict
            .get(b"t")
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;
        let version = dict.get(b"v").and_then(Value::as_bytes).cloned();

        let kind = dict
            .get(b"y")
            .and_then(Value::as_str)
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        let body = match kind {
            "q" => DhtBody::Query(parse_query(dict)?),
            "r" => DhtBody::Response(parse_response(dict)?),
            "e" => parse_error(dict)?,
            other => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type: {}",
                    other
                )))
            }
        };

        Ok(Self {
            transaction_id,
            version,
            body,
        })
    }
}

fn id_value(id: &NodeId) -> Value {
    Value::bytes(id.as_bytes())
}

fn query_args(query: &DhtQuery) -> Dict {
    let mut args = Dict::with_capacity(5);
    args.insert("id", id_value(&query.id()));

    match query {
        DhtQuery::Ping { .. } | DhtQuery::Unknown { .. } => {}
        DhtQuery::FindNode { target, .. } => {
            args.insert("target", id_value(target));
        }
        DhtQuery::GetPeers { info_hash, .. } => {
            args.insert("info_hash", Value::bytes(info_hash.as_bytes()));
        }
        DhtQuery::AnnouncePeer {
            info_hash,
            port,
            token,
            implied_port,
            ..
        } => {
            args.insert("info_hash", Value::bytes(info_hash.as_bytes()));
            args.insert("port", Value::Integer(*port as i64));
            args.insert("token", Value::Bytes(token.clone()));
            if *implied_port {
                args.insert("implied_port", Value::Integer(1));
            }
        }
    }

    args.sort_keys();
    args
}

fn response_dict(response: &DhtResponse) -> Dict {
    let mut dict = Dict::with_capacity(4);
    dict.insert("id", id_value(&response.id));
    if let Some(nodes) = &response.nodes {
        dict.insert("nodes", Value::Bytes(encode_nodes(nodes)));
    }
    if let Some(token) = &response.token {
        dict.insert("token", Value::Bytes(token.clone()));
    }
    if let Some(values) = &response.values {
        let values = values
            .iter()
            .filter_map(peer_to_compact)
            .map(Value::Bytes)
            .collect();
        dict.insert("values", Value::List(values));
    }
    dict.sort_keys();
    dict
}

fn node_id_field(dict: &Dict, key: &[u8]) -> Result<NodeId, DhtError> {
    let bytes = dict.get(key).and_then(Value::as_bytes).ok_or_else(|| {
        DhtError::InvalidMessage(format!("missing {}", String::from_utf8_lossy(key)))
    })?;
    NodeId::from_bytes(bytes)
}

fn info_hash_field(args: &Dict) -> Result<InfoHash, DhtError> {
    args.get(b"info_hash")
        .and_then(Value::as_bytes)
        .and_then(|b| InfoHash::from_bytes(b).ok())
        .ok_or_else(|| DhtError::InvalidMessage("missing info_hash".into()))
}

fn parse_query(dict: &Dict) -> Result<DhtQuery, DhtError> {
    let method = dict
        .get(b"q")
        .and_then(Value::as_str)
        .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;
    let args = dict
        .get(b"a")
        .and_then(Value::as_dict)
        .ok_or_else(|| DhtError::InvalidMessage("missing query args".into()))?;
    let id = node_id_field(args, b"id")?;

    let query = match method {
        "ping" => DhtQuery::Ping { id },
        "find_node" => DhtQuery::FindNode {
            id,
            target: node_id_field(args, b"target")?,
        },
        "get_peers" => DhtQuery::GetPeers {
            id,
            info_hash: info_hash_field(args)?,
        },
        "announce_peer" => {
            let port = args
                .get(b"port")
                .and_then(Value::as_integer)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| DhtError::InvalidMessage("missing port".into()))?;
            let token = args
                .get(b"token")
                .and_then(Value::as_bytes)
                .cloned()
                .ok_or_else(|| DhtError::InvalidMessage("missing token".into()))?;
            let implied_port = args
                .get(b"implied_port")
                .and_then(Value::as_integer)
                .is_some_and(|v| v == 1);

            DhtQuery::AnnouncePeer {
                id,
                info_hash: info_hash_field(args)?,
                port,
                token,
                implied_port,
            }
        }
        other => DhtQuery::Unknown {
            id,
            method: other.to_string(),
        },
    };
    Ok(query)
}

fn parse_response(dict: &Dict) -> Result<DhtResponse, DhtError> {
    let r = dict
        .get(b"r")
        .and_then(Value::as_dict)
        .ok_or_else(|| DhtError::InvalidMessage("missing response dict".into()))?;

    Ok(DhtResponse {
        id: node_id_field(r, b"id")?,
        nodes: r.get(b"nodes").and_then(Value::as_bytes).map(|b| decode_nodes(b)),
        values: r.get(b"values").and_then(Value::as_list).map(|list| {
            list.iter()
                .filter_map(Value::as_bytes)
                .filter_map(|b| peer_from_compact(b))
                .collect()
        }),
        token: r.get(b"token").and_then(Value::as_bytes).cloned(),
    })
}

fn parse_error(dict: &Dict) -> Result<DhtBody, DhtError> {
    let list = dict
        .get(b"e")
        .and_then(Value::as_list)
        .ok_or_else(|| DhtError::InvalidMessage("missing error list".into()))?;

    Ok(DhtBody::Error {
        code: list.first().and_then(Value::as_integer).unwrap_or(ERROR_GENERIC),
        message: list
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
