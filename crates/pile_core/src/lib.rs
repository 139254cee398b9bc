//! # Pile Core
//!
//! A segmented off-heap object store.
//!
//! A [`Pile`] keeps values in large memory segments instead of individual
//! heap allocations. Each value occupies one 8-aligned chunk and is
//! addressed by a [`PilePointer`], a plain `(node, segment, address)`
//! triple that can be stored anywhere and validated on every use.
//!
//! This crate provides:
//! - A free-list allocator per segment with 16 size-classed buckets
//! - Crawl: validation, free-space merging and free-list rebuild
//! - In-place updates that relink to a new chunk on overflow
//! - Concurrent access through per-segment reader/writer locks
//! - Persistent segments as memory-mapped files in a data directory
//!
//! ## Example
//!
//! ```rust,no_run
//! use pile_core::{Pile, PileConfig, PileValue, ValuePile};
//! use pile_core::CborCodec;
//!
//! let pile: ValuePile = Pile::open(PileConfig::default(), CborCodec::new())?;
//!
//! let greeting = pile.put(&"hello".into())?;
//! assert_eq!(pile.get(greeting)?.as_text(), Some("hello"));
//!
//! // Grow the value; the pointer stays valid through a link
//! pile.put_at(greeting, &"hello, world, and everyone in it".into(), true)?;
//! assert_eq!(pile.size_of(greeting)?, 40);
//! # Ok::<(), pile_core::PileError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod dir;
mod enumerator;
mod error;
mod pile;
mod segment;
mod stats;
mod sync;
mod types;

pub use codec::{CborCodec, Codec};
pub use config::{
    PileConfig, DEFAULT_FREE_CHUNK_SIZES, DEFAULT_FREE_LIST_SIZE, DEFAULT_SEGMENT_SIZE,
    FREE_BUCKET_COUNT, MAX_FREE_LIST_SIZE, MAX_SEGMENT_SIZE, MIN_FREE_CHUNK_SIZE,
    MIN_FREE_LIST_SIZE, MIN_SEGMENT_SIZE,
};
pub use dir::PileDir;
pub use enumerator::{PileEntry, PileEnumerator};
pub use error::{PileError, PileResult};
pub use pile::{Pile, PutBuffer};
pub use segment::CrawlStatus;
pub use stats::{PileStats, SegmentStats};
pub use types::{AllocationMode, PilePointer, PileValue, SerializerTag};

/// A pile of schemaless CBOR values.
pub type ValuePile = Pile<CborCodec<ciborium::Value>>;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
