//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format used throughout BitTorrent: `.torrent`
//! files, extension-protocol payloads, DHT KRPC packets and resume data.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! Dictionaries keep their keys in insertion order so that anything decoded
//! from the wire encodes back to the exact same bytes. Values built in code
//! should call [`Dict::sort_keys`] before encoding to produce canonical output.
//!
//! # Examples
//!
//! ```
//! use btengine::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d4:spaml1:a1:bee").unwrap();
//! let list = value.get(b"spam").and_then(|v| v.as_list()).unwrap();
//! assert_eq!(list.len(), 2);
//!
//! assert_eq!(value.encoded_len(), 16);
//! assert_eq!(encode(&value), b"d4:spaml1:a1:bee");
//! ```
//!
//! # Error Handling
//!
//! Decoding fails with a [`BencodeError`] when the input is truncated, carries
//! a malformed length prefix, a non-canonical integer (`i-0e`, `i03e`), an
//! unterminated list or dictionary, a non-string dictionary key, or nests
//! deeper than 64 levels. [`decode_strict`] also rejects dictionaries whose
//! keys are not strictly increasing.
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_at, decode_prefix, decode_strict};
pub use encode::{encode, encode_into, encode_to};
pub use error::BencodeError;
pub use value::{Dict, Value};

#[cfg(test)]
mod tests;
