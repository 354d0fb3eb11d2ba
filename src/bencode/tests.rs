use bytes::Bytes;
use proptest::prelude::*;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(matches!(decode(b"i-0e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i03e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i-03e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"ie"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i-e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i4x2e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_integer_extremes() {
    for n in [i64::MIN, i64::MAX, -1, 0, 1] {
        let value = Value::Integer(n);
        let encoded = encode(&value);
        assert_eq!(encoded, format!("i{}e", n).as_bytes());
        assert_eq!(value.encoded_len(), encoded.len());
        assert_eq!(decode(&encoded).unwrap(), value);
    }
    assert!(decode(b"i9223372036854775808e").is_err());
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Bytes::new()));
}

#[test]
fn test_decode_bytes_invalid() {
    assert_eq!(decode(b"5:spam"), Err(BencodeError::UnexpectedEof));
    assert_eq!(decode(b"04:spam"), Err(BencodeError::InvalidStringLength));
    assert_eq!(decode(b"4spam"), Err(BencodeError::UnexpectedEof));
    assert_eq!(
        decode(b"99999999999999999999999:x"),
        Err(BencodeError::InvalidStringLength)
    );
}

#[test]
fn test_decode_unterminated() {
    assert_eq!(decode(b"l4:spam"), Err(BencodeError::UnexpectedEof));
    assert_eq!(decode(b"d3:cow3:moo"), Err(BencodeError::UnexpectedEof));
    assert_eq!(decode(b"d3:cow"), Err(BencodeError::UnexpectedEof));
}

#[test]
fn test_decode_non_string_key() {
    assert_eq!(decode(b"di1ei2ee"), Err(BencodeError::NonStringKey));
}

#[test]
fn test_decode_unexpected_byte() {
    assert_eq!(
        decode(b"x"),
        Err(BencodeError::UnexpectedByte {
            byte: b'x',
            position: 0
        })
    );
}

#[test]
fn test_spam_eggs_ham_fixture() {
    let data = b"d4:spaml4:eggse3:hami5ee";
    let value = decode(data).unwrap();

    let dict = value.as_dict().unwrap();
    assert_eq!(dict.len(), 2);

    let spam = value.get(b"spam").and_then(|v| v.as_list()).unwrap();
    assert_eq!(spam, &vec![Value::string("eggs")]);
    assert_eq!(value.get(b"ham").and_then(|v| v.as_integer()), Some(5));

    let keys: Vec<_> = dict.keys().map(|k| k.as_ref()).collect();
    assert_eq!(keys, vec![b"spam".as_slice(), b"ham".as_slice()]);

    assert_eq!(encode(&value), data);
    assert_eq!(value.encoded_len(), data.len());
}

#[test]
fn test_insertion_order_roundtrip() {
    // Unsorted keys are accepted by the lenient decoder and written back as-is.
    let data = b"d1:zi1e1:ai2e1:ml1:x1:yee";
    let value = decode(data).unwrap();
    assert_eq!(encode(&value), data);
    assert_eq!(decode_strict(data), Err(BencodeError::UnsortedKeys));
}

#[test]
fn test_strict_rejects_duplicate_keys() {
    assert_eq!(
        decode_strict(b"d1:ai1e1:ai2ee"),
        Err(BencodeError::UnsortedKeys)
    );
    assert!(decode_strict(b"d1:ai1e1:bi2ee").is_ok());
}

#[test]
fn test_roundtrip_torrent_like() {
    let original = b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let decoded = decode_strict(original).unwrap();
    assert_eq!(encode(&decoded), original);
    assert_eq!(decoded.encoded_len(), original.len());
}

#[test]
fn test_binary_keys() {
    let data = b"d2:\xff\x001:ae";
    let value = decode(data).unwrap();
    assert_eq!(value.get(b"\xff\x00"), Some(&Value::string("a")));
    assert_eq!(encode(&value), data);
}

#[test]
fn test_trailing_data_error() {
    assert_eq!(decode(b"i42eextra"), Err(BencodeError::TrailingData));
}

#[test]
fn test_nesting_limit() {
    let mut deep = vec![b'l'; 100];
    deep.extend(vec![b'e'; 100]);
    assert_eq!(decode(&deep), Err(BencodeError::NestingTooDeep));
}

#[test]
fn test_decode_at_window() {
    let buf = b"xxxxi7e4:spamyy";
    assert_eq!(decode_at(buf, 4, 3).unwrap(), Value::Integer(7));
    assert_eq!(decode_at(buf, 7, 6).unwrap(), Value::string("spam"));
    assert_eq!(decode_at(buf, 7, 100), Err(BencodeError::UnexpectedEof));
    // The window must hold exactly one value.
    assert_eq!(decode_at(buf, 4, 4), Err(BencodeError::TrailingData));
}

#[test]
fn test_decode_prefix() {
    let data = b"d8:msg_typei1e5:piecei0eeRAWDATA";
    let (value, consumed) = decode_prefix(data).unwrap();
    assert_eq!(value.get(b"piece").and_then(|v| v.as_integer()), Some(0));
    assert_eq!(&data[consumed..], b"RAWDATA");
}

#[test]
fn test_encode_into_offset() {
    let value = decode(b"l4:spami42ee").unwrap();
    let mut buf = [0u8; 16];
    let written = encode_into(&value, &mut buf, 2).unwrap();
    assert_eq!(written, 12);
    assert_eq!(&buf[2..14], b"l4:spami42ee");
    assert_eq!(&buf[..2], &[0, 0]);

    let mut small = [0u8; 8];
    assert_eq!(
        encode_into(&value, &mut small, 0),
        Err(BencodeError::BufferTooSmall {
            needed: 12,
            available: 8
        })
    );
}

#[test]
fn test_dict_insert_replaces_in_place() {
    let mut dict = Dict::new();
    dict.insert("b", 1i64);
    dict.insert("a", 2i64);
    assert_eq!(dict.insert("b", 3i64), Some(Value::Integer(1)));
    assert_eq!(encode(&Value::Dict(dict.clone())), b"d1:bi3e1:ai2ee");

    assert!(!dict.is_sorted());
    dict.sort_keys();
    assert!(dict.is_sorted());
    assert_eq!(encode(&Value::Dict(dict)), b"d1:ai2e1:bi3ee");
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert!(value.as_bytes().is_none());

    let value = Value::bytes(b"test");
    assert_eq!(value.as_str(), Some("test"));
    assert!(value.as_integer().is_none());

    let value = Value::List(vec![]);
    assert!(value.as_list().is_some());
    assert!(value.as_dict().is_none());
    assert_eq!(value.encoded_len(), 2);
}

/// Canonical values: dictionary keys unique and in byte order.
fn canonical_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(|b| Value::Bytes(Bytes::from(b))),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            prop::collection::btree_map(prop::collection::vec(any::<u8>(), 0..12), inner, 0..8)
                .prop_map(|entries| {
                    let mut dict = Dict::with_capacity(entries.len());
                    for (key, value) in entries {
                        dict.insert(key, value);
                    }
                    Value::Dict(dict)
                }),
        ]
    })
}

proptest! {
    #[test]
    fn prop_canonical_round_trip(value in canonical_value()) {
        let encoded = encode(&value);
        prop_assert_eq!(value.encoded_len(), encoded.len());

        let decoded = decode_strict(&encoded).unwrap();
        prop_assert_eq!(&decoded, &value);
        prop_assert_eq!(encode(&decoded), encoded);
    }
}
