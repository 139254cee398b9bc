//! Value codec for objects stored in a pile.

use crate::error::{PileError, PileResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Turns objects into payload bytes and back.
///
/// Strings and byte buffers never reach the codec; only
/// [`crate::PileValue::Object`] values do. The encoding must be
/// self-delimiting: `deserialize` receives the whole chunk payload, which
/// may carry alignment padding after the encoded bytes.
///
/// # Example
///
/// ```rust
/// use pile_core::{Codec, PileResult};
///
/// struct Le64;
///
/// impl Codec for Le64 {
///     type Object = u64;
///
///     fn serialize(&self, value: &u64, out: &mut Vec<u8>) -> PileResult<()> {
///         out.extend_from_slice(&value.to_le_bytes());
///         Ok(())
///     }
///
///     fn deserialize(&self, bytes: &[u8]) -> PileResult<u64> {
///         let raw: [u8; 8] = bytes
///             .get(..8)
///             .and_then(|b| b.try_into().ok())
///             .ok_or_else(|| pile_core::PileError::codec("short payload"))?;
///         Ok(u64::from_le_bytes(raw))
///     }
/// }
/// ```
pub trait Codec: Send + Sync {
    /// The object type this codec handles.
    type Object;

    /// Appends the encoding of `value` to `out`.
    fn serialize(&self, value: &Self::Object, out: &mut Vec<u8>) -> PileResult<()>;

    /// Decodes an object from the front of `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> PileResult<Self::Object>;
}

/// CBOR codec for any `serde` type.
pub struct CborCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    /// Creates a CBOR codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CborCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CborCodec")
    }
}

impl<T> Codec for CborCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    type Object = T;

    fn serialize(&self, value: &T, out: &mut Vec<u8>) -> PileResult<()> {
        ciborium::into_writer(value, out).map_err(|e| PileError::codec(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> PileResult<T> {
        // Reads exactly one CBOR item; alignment padding is never reached
        ciborium::from_reader(bytes).map_err(|e| PileError::codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        customer: String,
        lines: Vec<(String, u32)>,
    }

    fn order() -> Order {
        Order {
            id: 42,
            customer: "Alice".into(),
            lines: vec![("apple".into(), 3), ("pear".into(), 1)],
        }
    }

    #[test]
    fn cbor_roundtrip() {
        let codec = CborCodec::<Order>::new();
        let mut buf = Vec::new();
        codec.serialize(&order(), &mut buf).unwrap();

        assert_eq!(codec.deserialize(&buf).unwrap(), order());
    }

    #[test]
    fn cbor_ignores_trailing_padding() {
        let codec = CborCodec::<Order>::new();
        let mut buf = Vec::new();
        codec.serialize(&order(), &mut buf).unwrap();
        buf.extend_from_slice(&[0u8; 7]);

        assert_eq!(codec.deserialize(&buf).unwrap(), order());
    }

    #[test]
    fn cbor_appends_to_buffer() {
        let codec = CborCodec::<u32>::new();
        let mut buf = vec![0xEE];
        codec.serialize(&7, &mut buf).unwrap();
        assert_eq!(buf[0], 0xEE);
        assert_eq!(codec.deserialize(&buf[1..]).unwrap(), 7);
    }

    #[test]
    fn cbor_rejects_garbage() {
        let codec = CborCodec::<Order>::new();
        let result = codec.deserialize(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(PileError::Codec { .. })));
    }
}
