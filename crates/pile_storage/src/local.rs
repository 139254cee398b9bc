//! Process-local backing memory.

use crate::error::StorageResult;
use crate::memory::Memory;

/// A backing memory held in a process-local buffer.
///
/// This memory is suitable for:
/// - Piles that do not need to survive a restart
/// - Unit and integration tests
///
/// The buffer is zero-initialized on creation. Large regions are cheap to
/// create because untouched pages are never committed by the allocator.
///
/// # Example
///
/// ```rust
/// use pile_storage::{LocalMemory, Memory};
///
/// let mut memory = LocalMemory::new(64);
/// memory.write_i32(0, 7);
/// assert_eq!(memory.len(), 64);
/// assert_eq!(memory.read_i32(0), 7);
/// ```
#[derive(Debug, Default)]
pub struct LocalMemory {
    data: Vec<u8>,
}

impl LocalMemory {
    /// Creates a zeroed memory of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { data: vec![0u8; len] }
    }

    /// Creates a memory over pre-existing bytes.
    ///
    /// Useful for testing mount and corruption scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns a copy of the region.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl Memory for LocalMemory {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered outside the region itself
        Ok(())
    }

    fn delete_and_dispose(&mut self) -> StorageResult<()> {
        self.data = Vec::new();
        Ok(())
    }
}
