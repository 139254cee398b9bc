//! # Pile Storage
//!
//! Backing memory for the Pile object store.
//!
//! A backing memory is a **fixed-length byte region** addressed by integer
//! offsets. It knows the chunk flag encoding and the big-endian integer
//! layout, but nothing about chunks, free lists or segments; `pile_core`
//! owns all interpretation of the bytes.
//!
//! ## Design Principles
//!
//! - Callers address memory by offset and never hold native pointers
//! - Integers are big-endian so persisted regions are portable
//! - Every implementation shares the provided accessors of [`Memory`], so
//!   layouts are byte-identical across implementations
//! - Must be `Send + Sync`; exclusive access is the owner's job
//!
//! ## Available Implementations
//!
//! - [`LocalMemory`] - Process-local zeroed buffer
//! - [`MappedMemory`] - Memory-mapped file that survives restarts
//!
//! ## Example
//!
//! ```rust
//! use pile_storage::{ChunkFlag, LocalMemory, Memory};
//!
//! let mut memory = LocalMemory::new(1024);
//! memory.write_used_chunk_flag(0);
//! memory.write_i32(3, 64);
//! assert_eq!(memory.read_chunk_flag(0), ChunkFlag::Used);
//! assert_eq!(memory.read_i32(3), 64);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod local;
mod mapped;
mod memory;

pub use error::{StorageError, StorageResult};
pub use local::LocalMemory;
pub use mapped::MappedMemory;
pub use memory::{ChunkFlag, Memory, FLAG_SIZE, FREE_FLAG, USED_FLAG};
