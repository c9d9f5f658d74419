//! Key codecs.
//!
//! A tree is created with a [`KeyCodec`] that turns keys into bytes and back,
//! and that defines the key order. The codec is a type parameter of the
//! tree, so comparisons on the search path are statically dispatched.
//!
//! Encoded keys are self-describing: `decode` reports how many bytes it
//! consumed, which lets nodes pack keys back to back without a slot table.

use std::cmp::Ordering;

/// Encodes, decodes and orders the keys of one tree.
///
/// # Invariants
///
/// - `decode(encode(k))` yields `k` and consumes exactly `encoded_len(k)` bytes
/// - `encoded_len(k) <= max_encoded_len()` for every key accepted by the tree
/// - `compare` is a total order
pub trait KeyCodec: Send + Sync + 'static {
    type Key: Clone + std::fmt::Debug + Send + Sync;

    /// Identifier persisted in the tree metadata and checked on open.
    fn id(&self) -> u8;

    /// Upper bound on the encoded size of any key.
    fn max_encoded_len(&self) -> usize;

    /// Encoded size of `key`.
    fn encoded_len(&self, key: &Self::Key) -> usize;

    /// Append the encoding of `key` to `out`.
    fn encode(&self, key: &Self::Key, out: &mut Vec<u8>);

    /// Decode one key from the front of `bytes`, returning it with the number
    /// of bytes consumed.
    fn decode(&self, bytes: &[u8]) -> Result<(Self::Key, usize), CodecError>;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;
}

/// Codec for `i32` keys (4 bytes, little-endian).
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCodec;

/// Codec for `i64` keys (8 bytes, little-endian).
#[derive(Debug, Clone, Copy, Default)]
pub struct LongCodec;

/// Codec for UTF-8 string keys with a `u16` length prefix.
///
/// Keys compare by their UTF-8 bytes, which matches `str` ordering.
#[derive(Debug, Clone, Copy)]
pub struct StringCodec {
    max_len: usize,
}

impl IntegerCodec {
    pub const ID: u8 = 1;
}

impl LongCodec {
    pub const ID: u8 = 2;
}

impl StringCodec {
    pub const ID: u8 = 3;

    /// Default maximum key length in bytes.
    pub const DEFAULT_MAX_LEN: usize = 128;

    /// Create a codec that accepts strings of at most `max_len` bytes.
    ///
    /// `max_len` is clamped to what the `u16` length prefix can describe.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.min(usize::from(u16::MAX)),
        }
    }

    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }
}

impl Default for StringCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LEN)
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or(CodecError::Truncated {
            needed: N,
            available: bytes.len(),
        })
}

impl KeyCodec for IntegerCodec {
    type Key = i32;

    fn id(&self) -> u8 {
        Self::ID
    }

    fn max_encoded_len(&self) -> usize {
        4
    }

    fn encoded_len(&self, _key: &i32) -> usize {
        4
    }

    fn encode(&self, key: &i32, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_le_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<(i32, usize), CodecError> {
        Ok((i32::from_le_bytes(take::<4>(bytes)?), 4))
    }

    fn compare(&self, a: &i32, b: &i32) -> Ordering {
        a.cmp(b)
    }
}

impl KeyCodec for LongCodec {
    type Key = i64;

    fn id(&self) -> u8 {
        Self::ID
    }

    fn max_encoded_len(&self) -> usize {
        8
    }

    fn encoded_len(&self, _key: &i64) -> usize {
        8
    }

    fn encode(&self, key: &i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_le_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<(i64, usize), CodecError> {
        Ok((i64::from_le_bytes(take::<8>(bytes)?), 8))
    }

    fn compare(&self, a: &i64, b: &i64) -> Ordering {
        a.cmp(b)
    }
}

impl KeyCodec for StringCodec {
    type Key = String;

    fn id(&self) -> u8 {
        Self::ID
    }

    fn max_encoded_len(&self) -> usize {
        2 + self.max_len
    }

    fn encoded_len(&self, key: &String) -> usize {
        2 + key.len()
    }

    // Callers reject keys longer than `max_len` before encoding.
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, key: &String, out: &mut Vec<u8>) {
        debug_assert!(key.len() <= self.max_len);
        out.extend_from_slice(&(key.len() as u16).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<(String, usize), CodecError> {
        let len = usize::from(u16::from_le_bytes(take::<2>(bytes)?));
        if len > self.max_len {
            return Err(CodecError::TooLong {
                len,
                max: self.max_len,
            });
        }
        let body = bytes.get(2..2 + len).ok_or(CodecError::Truncated {
            needed: 2 + len,
            available: bytes.len(),
        })?;
        let key = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
        Ok((key.to_string(), 2 + len))
    }

    fn compare(&self, a: &String, b: &String) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

/// Errors produced while decoding keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than the encoding requires.
    Truncated { needed: usize, available: usize },
    /// Encoded length exceeds the codec's maximum.
    TooLong { len: usize, max: usize },
    /// String key is not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated key: need {needed} bytes, have {available}")
            }
            Self::TooLong { len, max } => write!(f, "key length {len} exceeds maximum {max}"),
            Self::InvalidUtf8 => write!(f, "key is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_codec_order_and_decode() {
        let codec = IntegerCodec;
        let mut buf = Vec::new();
        codec.encode(&-17, &mut buf);
        codec.encode(&i32::MAX, &mut buf);
        assert_eq!(buf.len(), 8);

        let (first, used) = codec.decode(&buf).expect("decode first");
        assert_eq!((first, used), (-17, 4));
        let (second, _) = codec.decode(&buf[used..]).expect("decode second");
        assert_eq!(second, i32::MAX);

        assert_eq!(codec.compare(&-1, &1), Ordering::Less);
        assert_eq!(codec.compare(&5, &5), Ordering::Equal);
    }

    #[test]
    fn test_long_codec_truncated() {
        let codec = LongCodec;
        assert_eq!(
            codec.decode(&[1, 2, 3]),
            Err(CodecError::Truncated {
                needed: 8,
                available: 3
            })
        );
    }

    #[test]
    fn test_string_codec_layout() {
        let codec = StringCodec::new(16);
        let mut buf = Vec::new();
        codec.encode(&"héllo".to_string(), &mut buf);
        assert_eq!(buf.len(), codec.encoded_len(&"héllo".to_string()));
        assert_eq!(&buf[..2], &6u16.to_le_bytes());

        let (key, used) = codec.decode(&buf).expect("decode");
        assert_eq!(key, "héllo");
        assert_eq!(used, 8);
        assert_eq!(codec.max_encoded_len(), 18);
    }

    #[test]
    fn test_string_codec_rejects_bad_input() {
        let codec = StringCodec::new(4);

        let mut too_long = 10u16.to_le_bytes().to_vec();
        too_long.extend_from_slice(b"0123456789");
        assert_eq!(
            codec.decode(&too_long),
            Err(CodecError::TooLong { len: 10, max: 4 })
        );

        let mut bad_utf8 = 2u16.to_le_bytes().to_vec();
        bad_utf8.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(codec.decode(&bad_utf8), Err(CodecError::InvalidUtf8));

        let mut short = 3u16.to_le_bytes().to_vec();
        short.push(b'a');
        assert!(matches!(
            codec.decode(&short),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_string_codec_orders_bytewise() {
        let codec = StringCodec::default();
        let a = "apple".to_string();
        let b = "apples".to_string();
        let c = "banana".to_string();
        assert_eq!(codec.compare(&a, &b), Ordering::Less);
        assert_eq!(codec.compare(&c, &b), Ordering::Greater);
        assert_eq!(codec.compare(&a, &a.clone()), Ordering::Equal);
    }
}
