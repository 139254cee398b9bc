//! Data directory management.
//!
//! A pile with a data directory keeps every segment in its own
//! memory-mapped file:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ pile-000000.mmf   # Segment 0
//! └─ pile-000001.mmf   # Segment 1
//! ```
//!
//! The file index is the segment index, so pointers stay valid across
//! restarts. Gaps left by retired segments reopen as empty slots.

use crate::error::{PileError, PileResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SEGMENT_PREFIX: &str = "pile-";
const SEGMENT_SUFFIX: &str = ".mmf";

/// Manages the data directory and its exclusive lock.
///
/// Only one `PileDir` can exist per directory at a time, across processes.
///
/// # Example
///
/// ```rust,ignore
/// let dir = PileDir::open(Path::new("pile_data"), true)?;
/// println!("segment 0: {:?}", dir.segment_path(0));
/// ```
#[derive(Debug)]
pub struct PileDir {
    path: PathBuf,
    _lock_file: File,
}

impl PileDir {
    /// Opens or creates a data directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> PileResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(PileError::invalid_config(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(PileError::invalid_config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(PileError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file path of segment `index`.
    #[must_use]
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.path.join(segment_file_name(index))
    }

    /// Lists segment files as `(index, path)`, ordered by index.
    ///
    /// Files that don't follow the naming scheme are ignored.
    pub fn segment_files(&self) -> PileResult<Vec<(usize, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(index) = entry.file_name().to_str().and_then(parse_segment_file_name) {
                files.push((index, entry.path()));
            }
        }
        files.sort_unstable_by_key(|(index, _)| *index);
        Ok(files)
    }
}

fn segment_file_name(index: usize) -> String {
    format!("{SEGMENT_PREFIX}{index:06}{SEGMENT_SUFFIX}")
}

fn parse_segment_file_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("pile");

        let dir = PileDir::open(&path, true).unwrap();
        assert!(path.exists());
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn fail_if_missing() {
        let temp = tempdir().unwrap();
        let result = PileDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(PileError::InvalidConfig { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _dir = PileDir::open(temp.path(), true).unwrap();

        let second = PileDir::open(temp.path(), true);
        assert!(matches!(second, Err(PileError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(PileDir::open(temp.path(), true).unwrap());
        assert!(PileDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn segment_naming() {
        assert_eq!(segment_file_name(0), "pile-000000.mmf");
        assert_eq!(segment_file_name(42), "pile-000042.mmf");
        assert_eq!(segment_file_name(1_234_567), "pile-1234567.mmf");

        assert_eq!(parse_segment_file_name("pile-000042.mmf"), Some(42));
        assert_eq!(parse_segment_file_name("pile-1234567.mmf"), Some(1_234_567));
        assert_eq!(parse_segment_file_name("pile-42.mmf"), None);
        assert_eq!(parse_segment_file_name("pile-00004x.mmf"), None);
        assert_eq!(parse_segment_file_name("LOCK"), None);
    }

    #[test]
    fn segment_files_sorted() {
        let temp = tempdir().unwrap();
        let dir = PileDir::open(temp.path(), true).unwrap();
        for index in [3, 0, 12] {
            fs::write(dir.segment_path(index), b"").unwrap();
        }
        fs::write(temp.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(temp.path().join("pile-000099.mmf")).unwrap();

        let files = dir.segment_files().unwrap();
        let indices: Vec<usize> = files.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 3, 12]);
        assert_eq!(files[1].1, dir.segment_path(3));
    }
}
