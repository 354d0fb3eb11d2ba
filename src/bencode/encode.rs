use super::error::BencodeError;
use super::value::Value;
use bytes::BufMut;

/// Encodes a bencode value to a byte vector.
///
/// Dictionaries are written in the order their keys are stored, so a value
/// obtained from [`decode`](super::decode) re-encodes byte for byte.
///
/// # Examples
///
/// ```
/// use btengine::bencode::{encode, Dict, Value};
///
/// assert_eq!(encode(&Value::Integer(42)), b"i42e");
/// assert_eq!(encode(&Value::string("hello")), b"5:hello");
///
/// let mut dict = Dict::new();
/// dict.insert("b", 2i64);
/// dict.insert("a", 1i64);
/// dict.sort_keys();
/// assert_eq!(encode(&Value::Dict(dict)), b"d1:ai1e1:bi2ee");
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.encoded_len());
    encode_to(value, &mut buf);
    buf
}

/// Encodes `value` into `buf` at `offset`, returning the number of bytes
/// written. Fails without touching `buf` if the value does not fit.
pub fn encode_into(value: &Value, buf: &mut [u8], offset: usize) -> Result<usize, BencodeError> {
    let needed = value.encoded_len();
    let available = buf.len().saturating_sub(offset);
    if needed > available {
        return Err(BencodeError::BufferTooSmall { needed, available });
    }

    let mut window = &mut buf[offset..offset + needed];
    encode_to(value, &mut window);
    Ok(needed)
}

/// Appends the encoding of `value` to any [`BufMut`].
pub fn encode_to<B: BufMut>(value: &Value, buf: &mut B) {
    match value {
        Value::Integer(i) => {
            buf.put_u8(b'i');
            put_signed(buf, *i);
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => put_string(buf, b),
        Value::List(l) => {
            buf.put_u8(b'l');
            for item in l {
                encode_to(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(d) => {
            buf.put_u8(b'd');
            for (key, val) in d.iter() {
                put_string(buf, key);
                encode_to(val, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn put_string<B: BufMut>(buf: &mut B, data: &[u8]) {
    put_unsigned(buf, data.len() as u64);
    buf.put_u8(b':');
    buf.put_slice(data);
}

fn put_signed<B: BufMut>(buf: &mut B, n: i64) {
    if n < 0 {
        buf.put_u8(b'-');
    }
    // unsigned_abs keeps i64::MIN representable.
    put_unsigned(buf, n.unsigned_abs());
}

fn put_unsigned<B: BufMut>(buf: &mut B, mut n: u64) {
    let mut digits = [0u8; 20];
    let mut pos = digits.len();
    loop {
        pos -= 1;
        digits[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buf.put_slice(&digits[pos..]);
}
