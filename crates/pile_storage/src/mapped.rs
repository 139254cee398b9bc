//! Memory-mapped file backing memory.

use crate::error::{StorageError, StorageResult};
use crate::memory::Memory;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Attempts made to remove a file that the OS reports as busy.
const REMOVE_ATTEMPTS: u32 = 5;

/// Base pause between removal attempts.
const REMOVE_BACKOFF: Duration = Duration::from_millis(10);

/// Largest region a pile can address (offsets are `i32`).
const MAX_MAPPED_LEN: u64 = 1 << 31;

/// A backing memory mapped from a file.
///
/// The region is the whole file. Writes land in the page cache immediately
/// and reach the disk on [`Memory::flush`] or when the OS writes them back,
/// so a region written by one process can be re-mounted by the next.
///
/// # Durability
///
/// - `flush()` calls `MmapMut::flush()` (msync)
/// - There is no journaling: a crash during a write leaves whatever bytes
///   the OS had written
///
/// # Example
///
/// ```no_run
/// use pile_storage::{MappedMemory, Memory};
/// use std::path::Path;
///
/// let mut memory = MappedMemory::create(Path::new("pile-000000.mmf"), 64 << 20).unwrap();
/// memory.write_i32(0, 42);
/// memory.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct MappedMemory {
    path: PathBuf,
    /// `None` once disposed.
    mmap: Option<MmapMut>,
    file: Option<File>,
}

impl MappedMemory {
    /// Creates (or truncates) a file of `len` zero bytes and maps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized or mapped.
    pub fn create(path: &Path, len: usize) -> StorageResult<Self> {
        if len == 0 || len as u64 > MAX_MAPPED_LEN {
            return Err(StorageError::InvalidLength {
                path: path.to_path_buf(),
                len: len as u64,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let mmap = map_file(&file, len)?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap: Some(mmap),
            file: Some(file),
        })
    }

    /// Maps an existing file; the region length is the file length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or if its
    /// length is zero, not 8-aligned, or beyond 2 GiB.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        if len == 0 || len % 8 != 0 || len > MAX_MAPPED_LEN {
            return Err(StorageError::InvalidLength {
                path: path.to_path_buf(),
                len,
            });
        }

        let mmap = map_file(&file, len as usize)?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap: Some(mmap),
            file: Some(file),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the memory has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.mmap.is_none()
    }
}

#[allow(unsafe_code)]
fn map_file(file: &File, len: usize) -> StorageResult<MmapMut> {
    // SAFETY: the file is opened read/write and owned by this memory for the
    // lifetime of the map; the pile's data directory lock keeps other
    // processes from truncating it underneath us.
    let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };
    Ok(mmap)
}

impl Memory for MappedMemory {
    fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    fn bytes(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => mmap,
            None => &[],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(mmap) => mmap,
            None => &mut [],
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        match &self.mmap {
            Some(mmap) => Ok(mmap.flush()?),
            None => Err(StorageError::Disposed),
        }
    }

    fn delete_and_dispose(&mut self) -> StorageResult<()> {
        // Unmap before removing so no view outlives the file
        self.mmap = None;
        self.file = None;

        let mut attempt = 0;
        loop {
            match fs::remove_file(&self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= REMOVE_ATTEMPTS {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "failed to remove segment file"
                        );
                        return Err(e.into());
                    }
                    thread::sleep(REMOVE_BACKOFF * attempt);
                }
            }
        }
    }
}
