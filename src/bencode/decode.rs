use super::error::BencodeError;
use super::value::{Dict, Value};
use bytes::Bytes;

const MAX_DEPTH: usize = 64;

/// Decodes a complete bencoded buffer. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    Decoder::new(data, false).finish()
}

/// Like [`decode`], but also requires dictionary keys to be strictly
/// ascending, as mandated for canonical encodings.
pub fn decode_strict(data: &[u8]) -> Result<Value, BencodeError> {
    Decoder::new(data, true).finish()
}

/// Decodes exactly `length` bytes of `data` starting at `offset`.
pub fn decode_at(data: &[u8], offset: usize, length: usize) -> Result<Value, BencodeError> {
    let end = offset.checked_add(length).ok_or(BencodeError::UnexpectedEof)?;
    let window = data.get(offset..end).ok_or(BencodeError::UnexpectedEof)?;
    decode(window)
}

/// Decodes one value from the front of `data` and returns it together with
/// the number of bytes it occupied. Anything after it is left untouched.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut decoder = Decoder::new(data, false);
    let value = decoder.value(0)?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    strict: bool,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], strict: bool) -> Self {
        Self {
            data,
            pos: 0,
            strict,
        }
    }

    fn finish(mut self) -> Result<Value, BencodeError> {
        let value = self.value(0)?;
        if self.pos != self.data.len() {
            return Err(BencodeError::TrailingData);
        }
        Ok(value)
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                position: self.pos,
            }),
        }
    }

    /// Returns the bytes between the current position and `terminator`,
    /// leaving the position just past the terminator.
    fn take_until(&mut self, terminator: u8) -> Result<&'a [u8], BencodeError> {
        let data = self.data;
        let start = self.pos;
        let len = data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or(BencodeError::UnexpectedEof)?;
        self.pos = start + len + 1;
        Ok(&data[start..start + len])
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let digits = self.take_until(b'e')?;

        let invalid = || BencodeError::InvalidInteger(String::from_utf8_lossy(digits).into_owned());

        let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
        if magnitude.is_empty() || !magnitude.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        if magnitude[0] == b'0' && (magnitude.len() > 1 || magnitude.len() != digits.len()) {
            // Leading zeros and negative zero are both non-canonical.
            return Err(invalid());
        }

        // Only ASCII digits and an optional sign remain, so this is valid UTF-8.
        let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
        text.parse::<i64>().map(Value::Integer).map_err(|_| invalid())
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let digits = self.take_until(b':')?;

        if digits.is_empty()
            || !digits.iter().all(u8::is_ascii_digit)
            || (digits[0] == b'0' && digits.len() > 1)
        {
            return Err(BencodeError::InvalidStringLength);
        }

        let len = digits.iter().try_fold(0usize, |acc, &d| {
            acc.checked_mul(10)?.checked_add((d - b'0') as usize)
        });
        let len = len.ok_or(BencodeError::InvalidStringLength)?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(BencodeError::UnexpectedEof)?;

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut list = Vec::new();

        while self.peek()? != b'e' {
            list.push(self.value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(list))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut dict = Dict::new();
        let mut previous: Option<Bytes> = None;

        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey);
            }
            let key = self.byte_string()?;

            if self.strict {
                if let Some(prev) = &previous {
                    if key <= *prev {
                        return Err(BencodeError::UnsortedKeys);
                    }
                }
                previous = Some(key.clone());
            }

            let value = self.value(depth + 1)?;
            if dict.contains_key(&key) {
                dict.insert(key, value);
            } else {
                dict.push_unchecked(key, value);
            }
        }

        self.pos += 1;
        Ok(Value::Dict(dict))
    }
}
