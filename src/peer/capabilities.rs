use crate::constants::{DHT_BIT, EXTENSION_BIT, FAST_EXTENSION_BIT};

/// Protocol features available on a connection.
///
/// Built from the handshake reserved bytes. A feature is only usable when
/// both sides advertised it, see [`PeerCapabilities::negotiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerCapabilities {
    /// Extension protocol (BEP-10).
    pub extension_protocol: bool,
    /// Fast extension (BEP-6).
    pub fast: bool,
    /// Mainline DHT (BEP-5).
    pub dht: bool,
}

impl PeerCapabilities {
    /// Everything this engine implements.
    pub fn all() -> Self {
        Self {
            extension_protocol: true,
            fast: true,
            dht: true,
        }
    }

    pub fn from_reserved(reserved: &[u8; 8]) -> Self {
        Self {
            extension_protocol: reserved[5] & EXTENSION_BIT != 0,
            fast: reserved[7] & FAST_EXTENSION_BIT != 0,
            dht: reserved[7] & DHT_BIT != 0,
        }
    }

    pub fn to_reserved(self) -> [u8; 8] {
        let mut reserved = [0u8; 8];
        if self.extension_protocol {
            reserved[5] |= EXTENSION_BIT;
        }
        if self.fast {
            reserved[7] |= FAST_EXTENSION_BIT;
        }
        if self.dht {
            reserved[7] |= DHT_BIT;
        }
        reserved
    }

    /// Features both sides support.
    pub fn negotiate(self, remote: Self) -> Self {
        Self {
            extension_protocol: self.extension_protocol && remote.extension_protocol,
            fast: self.fast && remote.fast,
            dht: self.dht && remote.dht,
        }
    }
}
