//! Chunk header layout and payload encoding.

use crate::error::{PileError, PileResult};
use crate::types::{PilePointer, SerializerTag};
use pile_storage::{ChunkFlag, Memory};

/// Size of a chunk header: flag (3) + payload size (4) + serializer tag (1).
pub(crate) const CHUNK_HDR_SZ: usize = 8;

/// Offset of the payload size inside a header.
const SIZE_OFFSET: usize = 3;

/// Offset of the serializer tag inside a header.
const TAG_OFFSET: usize = 7;

/// Size of the original-length preamble of text and buffer payloads.
pub(crate) const PREAMBLE_SZ: usize = 4;

/// Rounds `size` up to a multiple of 8.
#[must_use]
pub(crate) const fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// A decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub flag: ChunkFlag,
    pub payload_size: usize,
    pub tag: u8,
}

impl ChunkHeader {
    /// Reads the header at `address`. The caller guarantees the 8 bytes exist.
    pub fn read(memory: &dyn Memory, address: usize) -> Self {
        Self {
            flag: memory.read_chunk_flag(address),
            payload_size: read_payload_size(memory, address),
            tag: memory.read_byte(address + TAG_OFFSET),
        }
    }

    /// Total bytes covered by the chunk, header included.
    pub fn chunk_size(&self) -> usize {
        CHUNK_HDR_SZ + self.payload_size
    }
}

/// Reads the payload size of the chunk at `address`.
///
/// Negative sizes only appear in corrupt headers and read as 0; callers that
/// walk chunk chains reject them via [`checked_header`].
pub(crate) fn read_payload_size(memory: &dyn Memory, address: usize) -> usize {
    usize::try_from(memory.read_i32(address + SIZE_OFFSET)).unwrap_or(0)
}

/// Writes a USED header.
pub(crate) fn write_used_header(
    memory: &mut dyn Memory,
    address: usize,
    payload_size: usize,
    tag: SerializerTag,
) {
    memory.write_used_chunk_flag(address);
    memory.write_i32(address + SIZE_OFFSET, payload_size as i32);
    memory.write_byte(address + TAG_OFFSET, tag.as_byte());
}

/// Writes a FREE header.
pub(crate) fn write_free_header(memory: &mut dyn Memory, address: usize, payload_size: usize) {
    memory.write_free_chunk_flag(address);
    memory.write_i32(address + SIZE_OFFSET, payload_size as i32);
    memory.write_byte(address + TAG_OFFSET, 0);
}

/// Rewrites only the tag byte of a header.
pub(crate) fn write_tag(memory: &mut dyn Memory, address: usize, tag: SerializerTag) {
    memory.write_byte(address + TAG_OFFSET, tag.as_byte());
}

/// Reads and validates a header while walking a segment.
///
/// A `WRONG` flag, a negative size, a misaligned size, or a chunk running
/// past the end of the region is corruption.
pub(crate) fn checked_header(
    memory: &dyn Memory,
    segment: usize,
    address: usize,
) -> PileResult<ChunkHeader> {
    let len = memory.len();
    if address + CHUNK_HDR_SZ > len {
        return Err(PileError::corruption(segment, address, "truncated chunk header"));
    }

    let flag = memory.read_chunk_flag(address);
    if flag == ChunkFlag::Wrong {
        tracing::error!(segment, address, "wrong chunk flag");
        return Err(PileError::corruption(segment, address, "wrong chunk flag"));
    }

    let raw = memory.read_i32(address + SIZE_OFFSET);
    let payload_size = usize::try_from(raw)
        .ok()
        .filter(|size| size % 8 == 0 && address + CHUNK_HDR_SZ + size <= len)
        .ok_or_else(|| {
            PileError::corruption(segment, address, format!("bad payload size {raw}"))
        })?;

    Ok(ChunkHeader {
        flag,
        payload_size,
        tag: memory.read_byte(address + TAG_OFFSET),
    })
}

/// Validates that `pointer` addresses a USED chunk of a known kind.
pub(crate) fn used_header(
    memory: &dyn Memory,
    pointer: PilePointer,
) -> PileResult<(usize, ChunkHeader, SerializerTag)> {
    let address = usize::try_from(pointer.address)
        .map_err(|_| PileError::access_violation(pointer, "negative address"))?;
    if address % 8 != 0 {
        return Err(PileError::access_violation(pointer, "misaligned address"));
    }
    if address + CHUNK_HDR_SZ > memory.len() {
        return Err(PileError::access_violation(pointer, "address out of bounds"));
    }

    let header = ChunkHeader::read(memory, address);
    if header.flag != ChunkFlag::Used {
        return Err(PileError::access_violation(pointer, "chunk is not in use"));
    }

    let segment = pointer.segment as usize;
    if address + header.chunk_size() > memory.len() {
        return Err(PileError::corruption(segment, address, "chunk runs past segment end"));
    }
    let tag = SerializerTag::from_byte(header.tag).ok_or_else(|| {
        PileError::corruption(segment, address, format!("unknown serializer tag {}", header.tag))
    })?;

    Ok((address, header, tag))
}

/// Serialized bytes about to be written into a chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Payload<'a> {
    pub tag: SerializerTag,
    pub data: &'a [u8],
}

impl<'a> Payload<'a> {
    pub fn new(tag: SerializerTag, data: &'a [u8]) -> Self {
        Self { tag, data }
    }

    /// Bytes the payload occupies inside a chunk, preamble included.
    pub fn stored_len(&self) -> usize {
        if self.tag.has_preamble() {
            PREAMBLE_SZ + self.data.len()
        } else {
            self.data.len()
        }
    }

    /// Writes the payload right after the header at `address`.
    pub fn write(&self, memory: &mut dyn Memory, address: usize) {
        let mut at = address + CHUNK_HDR_SZ;
        if self.tag.has_preamble() {
            memory.write_i32(at, self.data.len() as i32);
            at += PREAMBLE_SZ;
        }
        memory.write_buffer(at, self.data);
    }
}

/// Returns the stored bytes of a text or buffer payload, without preamble.
pub(crate) fn preamble_data(
    memory: &dyn Memory,
    segment: usize,
    address: usize,
    header: &ChunkHeader,
) -> PileResult<(usize, usize)> {
    let start = address + CHUNK_HDR_SZ;
    let len = usize::try_from(memory.read_i32(start)).unwrap_or(usize::MAX);
    if header.payload_size < PREAMBLE_SZ || len > header.payload_size - PREAMBLE_SZ {
        return Err(PileError::corruption(segment, address, "preamble exceeds payload"));
    }
    Ok((start + PREAMBLE_SZ, len))
}
