use super::*;
use crate::bandwidth::RateLimiter;
use crate::metainfo::InfoHash;
use crate::picker::BlockRequest;
use crate::pex::{PexFlags, PexMessage, PexPeer};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

fn sample_messages() -> Vec<Message> {
    let mut pex = PexMessage::new();
    pex.add_peer(PexPeer {
        addr: "10.0.0.1:6881".parse::<SocketAddr>().unwrap(),
        flags: PexFlags::default(),
    });

    vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xff, 0x80])),
        Message::request(&BlockRequest::new(1, 16384, 16384)),
        Message::Piece {
            index: 1,
            begin: 0,
            data: Bytes::from_static(b"block data"),
        },
        Message::cancel(&BlockRequest::new(1, 16384, 16384)),
        Message::Port(6881),
        Message::Suggest { piece: 7 },
        Message::HaveAll,
        Message::HaveNone,
        Message::reject(&BlockRequest::new(3, 0, 100)),
        Message::AllowedFast { piece: 9 },
        Message::Extended {
            id: 0,
            message: ExtensionMessage::Handshake(ExtensionHandshake::local(Some(1234))),
        },
        Message::Extended {
            id: 1,
            message: ExtensionMessage::Pex(pex),
        },
        Message::Extended {
            id: 2,
            message: ExtensionMessage::Metadata(MetadataMessage::data(
                0,
                5,
                Bytes::from_static(b"d1:ae"),
            )),
        },
    ]
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_id(), Some("BE0001"));
}

#[test]
fn test_handshake_layout() {
    let handshake = Handshake::new(InfoHash([1u8; 20]), PeerId([2u8; 20]));
    let encoded = handshake.encode();

    assert_eq!(encoded.len(), 68);
    assert_eq!(handshake.byte_length(), 68);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    assert_eq!(encoded[25] & 0x10, 0x10);
    assert_eq!(encoded[27] & 0x05, 0x05);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded, handshake);
    assert!(decoded.supports_extension_protocol());
    assert!(decoded.supports_fast_extension());
    assert!(decoded.supports_dht());
}

#[test]
fn test_handshake_rejects_bad_input() {
    let encoded = Handshake::new(InfoHash([1u8; 20]), PeerId([2u8; 20])).encode();
    assert!(matches!(
        Handshake::decode(&encoded[..67]),
        Err(PeerError::InvalidHandshake)
    ));

    let mut wrong = encoded.to_vec();
    wrong[1] = b'b';
    assert!(matches!(
        Handshake::decode(&wrong),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_handshake_without_capabilities() {
    let handshake = Handshake::with_capabilities(
        InfoHash([1u8; 20]),
        PeerId([2u8; 20]),
        PeerCapabilities::default(),
    );
    let decoded = Handshake::decode(&handshake.encode()).unwrap();
    assert!(!decoded.supports_extension_protocol());
    assert!(!decoded.supports_fast_extension());
    assert!(!decoded.supports_dht());
}

#[test]
fn test_byte_length_matches_encoding() {
    for msg in sample_messages() {
        assert_eq!(msg.byte_length(), msg.encode().len(), "{:?}", msg);
    }
}

#[test]
fn test_message_decode() {
    for msg in sample_messages() {
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_request_wire_format() {
    let msg = Message::request(&BlockRequest::new(1, 2, 3));
    assert_eq!(
        &msg.encode()[..],
        &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
    );
}

#[test]
fn test_fixed_size_messages_are_strict() {
    // Have with a five byte payload.
    let frame = Bytes::from_static(&[0, 0, 0, 6, 4, 0, 0, 0, 1, 0]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessage(_))
    ));

    // Choke carrying a payload.
    let frame = Bytes::from_static(&[0, 0, 0, 2, 0, 0]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessage(_))
    ));

    // Request short by one byte.
    let frame = Bytes::from_static(&[0, 0, 0, 12, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[test]
fn test_length_prefix_must_match_frame() {
    let mut frame = Message::Have { piece: 1 }.encode().to_vec();
    frame.push(0);
    assert!(Message::decode(Bytes::from(frame)).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 5, 4])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0])).is_err());
}

#[test]
fn test_unknown_message_id() {
    let frame = Bytes::from_static(&[0, 0, 0, 1, 99]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessageId(99))
    ));
}

#[test]
fn test_unknown_extension_id() {
    let frame = Bytes::from_static(&[0, 0, 0, 5, 20, 42, b'a', b'b', b'c']);
    let msg = Message::decode(frame).unwrap();
    assert_eq!(
        msg,
        Message::Extended {
            id: 42,
            message: ExtensionMessage::Unknown(Bytes::from_static(b"abc")),
        }
    );
}

#[test]
fn test_extended_handshake_ids() {
    let hs = ExtensionHandshake::local(None);
    assert_eq!(hs.get_extension_id(UT_PEX), Some(1));
    assert_eq!(hs.get_extension_id(UT_METADATA), Some(2));

    let msg = Message::Extended {
        id: 0,
        message: ExtensionMessage::Handshake(hs.clone()),
    };
    match Message::decode(msg.encode()).unwrap() {
        Message::Extended {
            message: ExtensionMessage::Handshake(decoded),
            ..
        } => assert_eq!(decoded, hs),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_encode_for_checks_capabilities() {
    let plain = PeerCapabilities::default();
    assert!(matches!(
        Message::HaveAll.encode_for(&plain),
        Err(PeerError::Protocol(_))
    ));
    assert!(matches!(
        Message::reject(&BlockRequest::new(0, 0, 1)).encode_for(&plain),
        Err(PeerError::Protocol(_))
    ));
    let extended = Message::Extended {
        id: 0,
        message: ExtensionMessage::Handshake(ExtensionHandshake::local(None)),
    };
    assert!(matches!(
        extended.encode_for(&plain),
        Err(PeerError::Protocol(_))
    ));
    assert!(Message::Have { piece: 0 }.encode_for(&plain).is_ok());

    let all = PeerCapabilities::all();
    assert!(Message::HaveAll.encode_for(&all).is_ok());
    assert!(extended.encode_for(&all).is_ok());
}

#[test]
fn test_encode_into_offset() {
    let msg = Message::Have { piece: 0x01020304 };
    let mut buf = [0xeeu8; 16];

    let written = msg.encode_into(&mut buf, 3).unwrap();
    assert_eq!(written, 9);
    assert_eq!(&buf[..3], &[0xee; 3]);
    assert_eq!(&buf[3..12], &[0, 0, 0, 5, 4, 1, 2, 3, 4]);
    assert_eq!(&buf[12..], &[0xee; 4]);

    assert!(msg.encode_into(&mut buf, 8).is_err());
    assert!(msg.encode_into(&mut buf, 100).is_err());
}

#[test]
fn test_capability_negotiation() {
    let ours = PeerCapabilities::all();
    let theirs = PeerCapabilities {
        extension_protocol: true,
        fast: false,
        dht: true,
    };
    let agreed = ours.negotiate(theirs);
    assert!(agreed.extension_protocol);
    assert!(!agreed.fast);
    assert!(agreed.dht);
    assert_eq!(PeerCapabilities::from_reserved(&theirs.to_reserved()), theirs);
}

#[tokio::test]
async fn test_transport_exchange() {
    let info_hash = InfoHash([7u8; 20]);
    let (a, b) = tokio::io::duplex(64 * 1024);

    let limiter: Arc<dyn crate::bandwidth::RateLimit> = Arc::new(RateLimiter::new());
    let mut left = PeerTransport::new(a).with_limiters(limiter.clone(), limiter);
    let mut right = PeerTransport::new(b);

    let ours = Handshake::new(info_hash, PeerId::generate());
    let theirs = Handshake::with_capabilities(
        info_hash,
        PeerId::generate(),
        PeerCapabilities {
            extension_protocol: true,
            fast: false,
            dht: false,
        },
    );

    left.send_handshake(&ours).await.unwrap();
    right.send_handshake(&theirs).await.unwrap();
    let got = left.receive_handshake(&ours).await.unwrap();
    assert_eq!(got.peer_id, theirs.peer_id);
    right.receive_handshake(&theirs).await.unwrap();

    assert!(!left.capabilities().fast);
    assert!(left.capabilities().extension_protocol);

    assert!(matches!(
        left.send_message(&Message::HaveAll).await,
        Err(PeerError::Protocol(_))
    ));

    left.send_message(&Message::Have { piece: 3 }).await.unwrap();
    left.send_message(&Message::KeepAlive).await.unwrap();
    assert_eq!(
        right.receive_message().await.unwrap(),
        Message::Have { piece: 3 }
    );
    assert_eq!(right.receive_message().await.unwrap(), Message::KeepAlive);
}

#[tokio::test]
async fn test_transport_info_hash_mismatch() {
    let (a, b) = tokio::io::duplex(1024);
    let mut left = PeerTransport::new(a);
    let mut right = PeerTransport::new(b);

    let ours = Handshake::new(InfoHash([1u8; 20]), PeerId::generate());
    let theirs = Handshake::new(InfoHash([2u8; 20]), PeerId::generate());
    right.send_handshake(&theirs).await.unwrap();

    assert!(matches!(
        left.receive_handshake(&ours).await,
        Err(PeerError::InfoHashMismatch)
    ));
}

#[tokio::test]
async fn test_transport_closed() {
    let (a, b) = tokio::io::duplex(1024);
    let mut left = PeerTransport::new(a);
    drop(b);
    assert!(matches!(
        left.receive_message().await,
        Err(PeerError::ConnectionClosed)
    ));
}
