//! Core type definitions for the pile.

use pile_storage::Memory;
use std::fmt;

/// Handle to a value stored in a pile.
///
/// A pointer is a plain `(node, segment, address)` triple: `segment` indexes
/// the pile's segment list and `address` is the byte offset of the value's
/// chunk inside that segment. Pointers do not own anything and may dangle;
/// every operation re-validates them.
///
/// Validation only checks that a live chunk starts at the address. When the
/// last segment is retired its index is handed to the next new segment, so
/// a stale pointer into the retired segment may resolve to an unrelated
/// value there. Inner slots are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PilePointer {
    /// Node that owns the segment; always 0 for a local pile.
    pub node: i32,
    /// Index into the pile's segment list.
    pub segment: i32,
    /// Byte offset of the chunk inside the segment.
    pub address: i32,
}

impl PilePointer {
    /// Encoded size: three big-endian `i32` fields.
    pub const SIZE: usize = 12;

    /// The invalid pointer.
    pub const INVALID: Self = Self {
        node: -1,
        segment: -1,
        address: -1,
    };

    /// Creates a pointer on the local node.
    #[must_use]
    pub const fn new(segment: i32, address: i32) -> Self {
        Self {
            node: 0,
            segment,
            address,
        }
    }

    /// Creates a pointer with an explicit node.
    #[must_use]
    pub const fn with_node(node: i32, segment: i32, address: i32) -> Self {
        Self {
            node,
            segment,
            address,
        }
    }

    /// Returns whether the pointer could reference a chunk at all.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.segment >= 0 && self.address >= 0
    }

    /// Encodes the pointer as `node | segment | address`, big-endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.node.to_be_bytes());
        buf[4..8].copy_from_slice(&self.segment.to_be_bytes());
        buf[8..12].copy_from_slice(&self.address.to_be_bytes());
        buf
    }

    /// Decodes a pointer produced by [`PilePointer::to_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let field = |i: usize| i32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            node: field(0),
            segment: field(4),
            address: field(8),
        }
    }

    /// Reads a pointer stored at `offset`.
    pub(crate) fn read_from(memory: &dyn Memory, offset: usize) -> Self {
        Self {
            node: memory.read_i32(offset),
            segment: memory.read_i32(offset + 4),
            address: memory.read_i32(offset + 8),
        }
    }

    /// Writes the pointer at `offset`.
    pub(crate) fn write_to(&self, memory: &mut dyn Memory, offset: usize) {
        memory.write_i32(offset, self.node);
        memory.write_i32(offset + 4, self.segment);
        memory.write_i32(offset + 8, self.address);
    }
}

impl Default for PilePointer {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for PilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node, self.segment, self.address)
    }
}

/// Serializer tag stored in byte 7 of every USED chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SerializerTag {
    /// Bytes produced by the pile's [`crate::Codec`].
    Generic = 0,
    /// Raw byte buffer, stored with a length preamble.
    Buffer = 1,
    /// UTF-8 string, stored with a length preamble.
    Utf8 = 2,
    /// Payload is a [`PilePointer`] to the chunk holding the real value.
    Link = 3,
}

impl SerializerTag {
    /// Decodes a tag byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Generic),
            1 => Some(Self::Buffer),
            2 => Some(Self::Utf8),
            3 => Some(Self::Link),
            _ => None,
        }
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns whether payloads of this kind start with a 4-byte length.
    #[must_use]
    pub const fn has_preamble(self) -> bool {
        matches!(self, Self::Buffer | Self::Utf8)
    }
}

impl fmt::Display for SerializerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "generic",
            Self::Buffer => "buffer",
            Self::Utf8 => "utf8",
            Self::Link => "link",
        };
        f.pad(name)
    }
}

/// Space/time tradeoff governing segment selection and retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// Try any segment with at least 1/8 of its capacity free and retire
    /// empty segments only some of the time.
    #[default]
    FavorSpeed,
    /// Try only segments with room for the exact chunk and always retire
    /// empty segments.
    ReuseSpace,
}

/// A value stored in or returned from a pile.
///
/// Strings and byte buffers bypass the codec; everything else is an
/// `Object` encoded by the pile's [`crate::Codec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PileValue<T> {
    /// A UTF-8 string.
    Text(String),
    /// A raw byte buffer.
    Buffer(Vec<u8>),
    /// A value encoded by the codec.
    Object(T),
}

impl<T> PileValue<T> {
    /// Returns the tag this value is stored under.
    #[must_use]
    pub fn tag(&self) -> SerializerTag {
        match self {
            Self::Text(_) => SerializerTag::Utf8,
            Self::Buffer(_) => SerializerTag::Buffer,
            Self::Object(_) => SerializerTag::Generic,
        }
    }

    /// Returns the string, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a buffer.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the object, if this is one.
    #[must_use]
    pub fn into_object(self) -> Option<T> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl<T> From<String> for PileValue<T> {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T> From<&str> for PileValue<T> {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl<T> From<Vec<u8>> for PileValue<T> {
    fn from(b: Vec<u8>) -> Self {
        Self::Buffer(b)
    }
}

impl<T> From<&[u8]> for PileValue<T> {
    fn from(b: &[u8]) -> Self {
        Self::Buffer(b.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pile_storage::LocalMemory;

    #[test]
    fn pointer_wire_layout() {
        let ptr = PilePointer::new(2, 0x0100);
        assert_eq!(
            ptr.to_bytes(),
            [0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 1, 0]
        );
        assert_eq!(PilePointer::from_bytes(&ptr.to_bytes()), ptr);
    }

    #[test]
    fn pointer_in_memory_matches_wire() {
        let ptr = PilePointer::with_node(0, 7, 4096);
        let mut memory = LocalMemory::new(32);
        ptr.write_to(&mut memory, 8);

        assert_eq!(memory.read_stream(8, 12), &ptr.to_bytes());
        assert_eq!(PilePointer::read_from(&memory, 8), ptr);
    }

    #[test]
    fn invalid_pointer() {
        assert!(!PilePointer::INVALID.is_valid());
        assert!(!PilePointer::default().is_valid());
        assert!(PilePointer::new(0, 0).is_valid());
        assert!(!PilePointer::new(0, -8).is_valid());
    }

    #[test]
    fn pointer_display() {
        assert_eq!(PilePointer::new(3, 128).to_string(), "0:3:128");
    }

    #[test]
    fn serializer_tags() {
        for tag in [
            SerializerTag::Generic,
            SerializerTag::Buffer,
            SerializerTag::Utf8,
            SerializerTag::Link,
        ] {
            assert_eq!(SerializerTag::from_byte(tag.as_byte()), Some(tag));
        }
        assert_eq!(SerializerTag::from_byte(4), None);
        assert!(SerializerTag::Utf8.has_preamble());
        assert!(SerializerTag::Buffer.has_preamble());
        assert!(!SerializerTag::Generic.has_preamble());
        assert!(!SerializerTag::Link.has_preamble());
    }

    #[test]
    fn value_tags_and_accessors() {
        let text: PileValue<()> = "abc".into();
        assert_eq!(text.tag(), SerializerTag::Utf8);
        assert_eq!(text.as_text(), Some("abc"));

        let buffer: PileValue<()> = vec![1u8, 2].into();
        assert_eq!(buffer.tag(), SerializerTag::Buffer);
        assert_eq!(buffer.as_buffer(), Some(&[1u8, 2][..]));

        let object = PileValue::Object(5u32);
        assert_eq!(object.tag(), SerializerTag::Generic);
        assert_eq!(object.into_object(), Some(5));
    }
}
