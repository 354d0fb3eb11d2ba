//! Peer Exchange (BEP-11)
//!
//! A `ut_pex` message is a bencoded dictionary of compact peer lists:
//! `added`/`added.f` and `dropped` for IPv4, `added6`/`added6.f` and
//! `dropped6` for IPv6.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::bencode::{self, Dict, Value};
use crate::constants::{PEX_MAX_IPV4_PEERS, PEX_MAX_IPV6_PEERS};
use crate::peer::PeerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PexPeer {
    pub addr: SocketAddr,
    pub flags: PexFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PexFlags {
    pub encryption: bool,
    pub seed: bool,
    pub utp: bool,
    pub holepunch: bool,
    pub connectable: bool,
}

impl PexFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            encryption: (b & 0x01) != 0,
            seed: (b & 0x02) != 0,
            utp: (b & 0x04) != 0,
            holepunch: (b & 0x08) != 0,
            connectable: (b & 0x10) != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.encryption {
            b |= 0x01;
        }
        if self.seed {
            b |= 0x02;
        }
        if self.utp {
            b |= 0x04;
        }
        if self.holepunch {
            b |= 0x08;
        }
        if self.connectable {
            b |= 0x10;
        }
        b
    }
}

impl PexPeer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            flags: PexFlags::default(),
        }
    }

    pub fn with_flags(addr: SocketAddr, flags: PexFlags) -> Self {
        Self { addr, flags }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PexMessage {
    pub added: Vec<PexPeer>,
    pub added6: Vec<PexPeer>,
    pub dropped: Vec<SocketAddr>,
    pub dropped6: Vec<SocketAddr>,
}

impl PexMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer, returning `false` once the per-family limit is reached.
    pub fn add_peer(&mut self, peer: PexPeer) -> bool {
        match peer.addr {
            SocketAddr::V4(_) if self.added.len() < PEX_MAX_IPV4_PEERS => self.added.push(peer),
            SocketAddr::V6(_) if self.added6.len() < PEX_MAX_IPV6_PEERS => self.added6.push(peer),
            _ => return false,
        }
        true
    }

    pub fn drop_peer(&mut self, addr: SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(_) if self.dropped.len() < PEX_MAX_IPV4_PEERS => self.dropped.push(addr),
            SocketAddr::V6(_) if self.dropped6.len() < PEX_MAX_IPV6_PEERS => {
                self.dropped6.push(addr)
            }
            _ => return false,
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.added6.is_empty()
            && self.dropped.is_empty()
            && self.dropped6.is_empty()
    }

    /// Every added peer, IPv4 first.
    pub fn added_peers(&self) -> impl Iterator<Item = &PexPeer> {
        self.added.iter().chain(self.added6.iter())
    }

    /// Builds the bencoded dictionary, keys in sorted order.
    pub fn to_value(&self) -> Value {
        let mut dict = Dict::with_capacity(6);
        dict.insert("added", Value::Bytes(encode_addrs(self.added.iter().map(|p| &p.addr))));
        dict.insert("added.f", Value::Bytes(encode_flags(&self.added)));
        dict.insert("added6", Value::Bytes(encode_addrs(self.added6.iter().map(|p| &p.addr))));
        dict.insert("added6.f", Value::Bytes(encode_flags(&self.added6)));
        dict.insert("dropped", Value::Bytes(encode_addrs(self.dropped.iter())));
        dict.insert("dropped6", Value::Bytes(encode_addrs(self.dropped6.iter())));
        Value::Dict(dict)
    }

    /// Reads a `ut_pex` dictionary. Missing keys are treated as empty lists.
    pub fn from_value(value: &Value) -> Result<Self, PeerError> {
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("pex payload is not a dict".into()))?;
        let field = |key: &[u8]| bytes_field(dict, key);

        Ok(Self {
            added: decode_v4(field(b"added"))
                .into_iter()
                .zip(flags_or_default(field(b"added.f")))
                .map(|(addr, flags)| PexPeer { addr, flags })
                .collect(),
            added6: decode_v6(field(b"added6"))
                .into_iter()
                .zip(flags_or_default(field(b"added6.f")))
                .map(|(addr, flags)| PexPeer { addr, flags })
                .collect(),
            dropped: decode_v4(field(b"dropped")),
            dropped6: decode_v6(field(b"dropped6")),
        })
    }

    pub fn encoded_len(&self) -> usize {
        self.to_value().encoded_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        bencode::encode(&self.to_value())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        Self::from_value(&bencode::decode(payload)?)
    }
}

fn bytes_field<'a>(dict: &'a Dict, key: &[u8]) -> &'a [u8] {
    dict.get(key)
        .and_then(|v| v.as_bytes())
        .map(|b| b.as_ref())
        .unwrap_or(&[])
}

fn encode_addrs<'a>(addrs: impl Iterator<Item = &'a SocketAddr>) -> Bytes {
    let mut buf = BytesMut::new();
    for addr in addrs {
        match addr {
            SocketAddr::V4(addr) => {
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            SocketAddr::V6(addr) => {
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
        }
    }
    buf.freeze()
}

fn encode_flags(peers: &[PexPeer]) -> Bytes {
    peers.iter().map(|p| p.flags.to_byte()).collect::<Vec<_>>().into()
}

/// Yields one flag set per entry; a short or missing `.f` list pads with defaults.
fn flags_or_default(flags: &[u8]) -> impl Iterator<Item = PexFlags> + '_ {
    flags
        .iter()
        .map(|b| PexFlags::from_byte(*b))
        .chain(std::iter::repeat(PexFlags::default()))
}

fn decode_v4(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect()
}

fn decode_v6(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(18)
        .map(|c| {
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(&c[..16]);
            let port = u16::from_be_bytes([c[16], c[17]]);
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip_bytes), port, 0, 0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, a), port))
    }

    #[test]
    fn test_pex_flags() {
        let flags = PexFlags {
            encryption: true,
            seed: false,
            utp: true,
            holepunch: false,
            connectable: true,
        };
        assert_eq!(PexFlags::from_byte(flags.to_byte()), flags);
    }

    #[test]
    fn test_pex_message_keys_sorted() {
        let msg = PexMessage::new();
        let value = msg.to_value();
        assert!(value.as_dict().unwrap().is_sorted());
        assert_eq!(msg.encoded_len(), msg.encode().len());
    }

    #[test]
    fn test_pex_mixed_families() {
        let mut msg = PexMessage::new();
        msg.add_peer(PexPeer::with_flags(
            v4(1, 6881),
            PexFlags {
                seed: true,
                ..Default::default()
            },
        ));
        msg.add_peer(PexPeer::new("[2001:db8::1]:51413".parse().unwrap()));
        msg.drop_peer(v4(9, 1000));

        let decoded = PexMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.added[0].flags.seed);
        assert_eq!(decoded.added_peers().count(), 2);
    }

    #[test]
    fn test_pex_missing_flags_default() {
        let mut dict = Dict::new();
        dict.insert("added", Value::Bytes(encode_addrs([v4(1, 1), v4(2, 2)].iter())));
        let msg = PexMessage::from_value(&Value::Dict(dict)).unwrap();
        assert_eq!(msg.added.len(), 2);
        assert_eq!(msg.added[1].flags, PexFlags::default());
        assert!(msg.dropped.is_empty());
    }

    #[test]
    fn test_pex_limit() {
        let mut msg = PexMessage::new();
        for i in 0..PEX_MAX_IPV4_PEERS {
            assert!(msg.add_peer(PexPeer::new(v4(1, i as u16))));
        }
        assert!(!msg.add_peer(PexPeer::new(v4(2, 1))));
    }

    #[test]
    fn test_pex_rejects_non_dict() {
        assert!(PexMessage::decode(b"le").is_err());
    }
}
