//! Backing memory trait definition.

use crate::error::{StorageError, StorageResult};

/// Size of a chunk flag in bytes.
pub const FLAG_SIZE: usize = 3;

/// Flag bytes marking a chunk that holds a live value.
pub const USED_FLAG: [u8; FLAG_SIZE] = [0x03, 0xAC, 0x0B];

/// Flag bytes marking a chunk available for allocation.
pub const FREE_FLAG: [u8; FLAG_SIZE] = [0xCB, 0xAB, 0x0D];

/// Decoded state of the three flag bytes that start every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFlag {
    /// Chunk holds a live value.
    Used,
    /// Chunk is free space.
    Free,
    /// Neither pattern matched: the byte stream is corrupt.
    Wrong,
}

impl ChunkFlag {
    /// Decodes flag bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; FLAG_SIZE]) -> Self {
        match bytes {
            USED_FLAG => Self::Used,
            FREE_FLAG => Self::Free,
            _ => Self::Wrong,
        }
    }
}

/// A fixed-length byte region addressed by offset.
///
/// Implementors supply the raw byte views plus lifecycle hooks; every typed
/// accessor is provided on top of [`Memory::bytes`] and [`Memory::bytes_mut`]
/// so all implementations produce the same layout.
///
/// # Invariants
///
/// - `len` never changes until `delete_and_dispose`, after which it is 0
/// - `bytes().len() == len()`
/// - Integers are stored big-endian
///
/// # Panics
///
/// The provided accessors panic when the access does not fit inside the
/// region. Callers validate offsets against [`Memory::len`] first; use
/// [`Memory::check_range`] for a checked test.
///
/// # Implementors
///
/// - [`super::LocalMemory`] - Process-local buffer
/// - [`super::MappedMemory`] - Memory-mapped file
pub trait Memory: Send + Sync {
    /// Returns the region length in bytes.
    fn len(&self) -> usize;

    /// Returns the whole region.
    fn bytes(&self) -> &[u8];

    /// Returns the whole region for writing.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Pushes pending writes to durable storage, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Releases the region and any resource behind it.
    ///
    /// For file-backed memory the backing file is removed. The memory is
    /// empty afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the resource fails.
    fn delete_and_dispose(&mut self) -> StorageResult<()>;

    /// Checks that `len` bytes at `offset` lie inside the region.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if they do not.
    fn check_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        let size = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(StorageError::OutOfBounds { offset, len, size }),
        }
    }

    /// Reads the chunk flag at `offset`.
    fn read_chunk_flag(&self, offset: usize) -> ChunkFlag {
        let b = &self.bytes()[offset..offset + FLAG_SIZE];
        ChunkFlag::from_bytes([b[0], b[1], b[2]])
    }

    /// Writes the FREE flag at `offset`.
    fn write_free_chunk_flag(&mut self, offset: usize) {
        self.bytes_mut()[offset..offset + FLAG_SIZE].copy_from_slice(&FREE_FLAG);
    }

    /// Writes the USED flag at `offset`.
    fn write_used_chunk_flag(&mut self, offset: usize) {
        self.bytes_mut()[offset..offset + FLAG_SIZE].copy_from_slice(&USED_FLAG);
    }

    /// Reads one byte.
    fn read_byte(&self, offset: usize) -> u8 {
        self.bytes()[offset]
    }

    /// Writes one byte.
    fn write_byte(&mut self, offset: usize, value: u8) {
        self.bytes_mut()[offset] = value;
    }

    /// Reads a big-endian `i32`.
    fn read_i32(&self, offset: usize) -> i32 {
        let b = &self.bytes()[offset..offset + 4];
        i32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Writes a big-endian `i32`.
    fn write_i32(&mut self, offset: usize, value: i32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    fn read_buffer(&self, offset: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.bytes()[offset..offset + out.len()]);
    }

    /// Copies `data` into the region at `offset`.
    fn write_buffer(&mut self, offset: usize, data: &[u8]) {
        self.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Reads `size` bytes at `offset` as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` for a range outside the region and
    /// `InvalidUtf8` if the bytes are not UTF-8.
    fn read_utf8_string(&self, offset: usize, size: usize) -> StorageResult<String> {
        self.check_range(offset, size)?;
        std::str::from_utf8(&self.bytes()[offset..offset + size])
            .map(str::to_owned)
            .map_err(|_| StorageError::InvalidUtf8 { offset })
    }

    /// Returns a zero-copy view of `count` bytes at `offset`.
    fn read_stream(&self, offset: usize, count: usize) -> &[u8] {
        &self.bytes()[offset..offset + count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalMemory;
    use proptest::prelude::*;

    #[test]
    fn flag_decoding() {
        assert_eq!(ChunkFlag::from_bytes(USED_FLAG), ChunkFlag::Used);
        assert_eq!(ChunkFlag::from_bytes(FREE_FLAG), ChunkFlag::Free);
        assert_eq!(ChunkFlag::from_bytes([0, 0, 0]), ChunkFlag::Wrong);
        assert_eq!(ChunkFlag::from_bytes([0x03, 0xAC, 0x0D]), ChunkFlag::Wrong);
    }

    #[test]
    fn flags_are_written_verbatim() {
        let mut memory = LocalMemory::new(16);
        memory.write_used_chunk_flag(0);
        memory.write_free_chunk_flag(8);
        assert_eq!(&memory.bytes()[0..3], &[0x03, 0xAC, 0x0B]);
        assert_eq!(&memory.bytes()[8..11], &[0xCB, 0xAB, 0x0D]);
        assert_eq!(memory.read_chunk_flag(0), ChunkFlag::Used);
        assert_eq!(memory.read_chunk_flag(8), ChunkFlag::Free);
        assert_eq!(memory.read_chunk_flag(4), ChunkFlag::Wrong);
    }

    #[test]
    fn i32_is_big_endian() {
        let mut memory = LocalMemory::new(8);
        memory.write_i32(3, 0x0102_0304);
        assert_eq!(&memory.bytes()[3..7], &[1, 2, 3, 4]);
        assert_eq!(memory.read_i32(3), 0x0102_0304);

        memory.write_i32(0, -2);
        assert_eq!(memory.read_i32(0), -2);
    }

    #[test]
    fn buffers_and_bytes() {
        let mut memory = LocalMemory::new(32);
        memory.write_buffer(10, b"pile");
        memory.write_byte(14, 0x7F);

        let mut out = [0u8; 4];
        memory.read_buffer(10, &mut out);
        assert_eq!(&out, b"pile");
        assert_eq!(memory.read_byte(14), 0x7F);
        assert_eq!(memory.read_stream(10, 5), b"pile\x7F");
    }

    #[test]
    fn utf8_strings() {
        let mut memory = LocalMemory::new(32);
        memory.write_buffer(0, "héllo".as_bytes());
        assert_eq!(memory.read_utf8_string(0, 6).unwrap(), "héllo");

        memory.write_buffer(8, &[0xFF, 0xFE]);
        assert!(matches!(
            memory.read_utf8_string(8, 2),
            Err(StorageError::InvalidUtf8 { offset: 8 })
        ));
        assert!(matches!(
            memory.read_utf8_string(30, 4),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn check_range_bounds() {
        let memory = LocalMemory::new(16);
        assert!(memory.check_range(0, 16).is_ok());
        assert!(memory.check_range(8, 8).is_ok());
        assert!(memory.check_range(9, 8).is_err());
        assert!(memory.check_range(usize::MAX, 2).is_err());
    }

    const REGION: usize = 4096;

    proptest! {
        #[test]
        fn i32_round_trips_anywhere(offset in 0..REGION - 4, value: i32) {
            let mut memory = LocalMemory::new(REGION);
            memory.write_i32(offset, value);
            prop_assert_eq!(memory.read_i32(offset), value);
            prop_assert_eq!(&memory.bytes()[offset..offset + 4], &value.to_be_bytes()[..]);
        }

        #[test]
        fn buffer_writes_touch_only_their_range(
            offset in 0..REGION / 2,
            data in prop::collection::vec(any::<u8>(), 1..REGION / 2),
        ) {
            let mut memory = LocalMemory::new(REGION);
            memory.write_buffer(offset, &data);

            let mut out = vec![0u8; data.len()];
            memory.read_buffer(offset, &mut out);
            prop_assert_eq!(&out, &data);
            prop_assert_eq!(memory.read_stream(offset, data.len()), &data[..]);

            let end = offset + data.len();
            prop_assert!(memory.bytes()[..offset].iter().all(|&b| b == 0));
            prop_assert!(memory.bytes()[end..].iter().all(|&b| b == 0));
        }
    }
}
