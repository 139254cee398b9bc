//! Segments: fixed-size memory regions carved into chunks.
//!
//! Every byte of a segment belongs to exactly one chunk. Chunks are
//! 8-aligned and laid end to end from address 0.
//!
//! ## Chunk Format
//!
//! ```text
//! | flag (3) | payload_size (4, BE) | tag (1) | payload (payload_size) |
//! ```
//!
//! Flags:
//! - `03 AC 0B` = USED (holds a value or a link)
//! - `CB AB 0D` = FREE
//!
//! Text and buffer payloads begin with a 4-byte big-endian length of the
//! stored data. Link payloads hold a 12-byte [`crate::PilePointer`].
//!
//! ## Locking
//!
//! Metadata that `put` consults before locking (used bytes, counts, the
//! crawled and deleted flags) lives in relaxed atomics that are only written
//! under the segment's write lock. The memory region and free buckets sit
//! behind the lock and are reached through [`SegmentReader`] and
//! [`SegmentWriter`].

mod chunk;
mod crawl;
mod free_list;

pub use crawl::CrawlStatus;
pub(crate) use chunk::{
    align8, checked_header, preamble_data, used_header, ChunkHeader, Payload, CHUNK_HDR_SZ,
};

use crate::config::FREE_BUCKET_COUNT;
use crate::error::PileResult;
use crate::stats::SegmentStats;
use crate::sync::{read_or_abort, write_or_abort};
use crate::types::{PilePointer, SerializerTag};
use chunk::{read_payload_size, write_free_header, write_tag};
use free_list::FreeBuckets;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use pile_storage::{ChunkFlag, Memory};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One segment of a pile.
pub(crate) struct Segment {
    index: usize,
    len: usize,
    used_bytes: AtomicU64,
    object_count: AtomicU64,
    link_count: AtomicU64,
    crawled: AtomicBool,
    deleted: AtomicBool,
    state: RwLock<SegmentState>,
}

struct SegmentState {
    memory: Box<dyn Memory>,
    buckets: FreeBuckets,
    last_crawl: Instant,
    used_bytes_at_last_crawl: u64,
    /// Changes whenever chunk boundaries may have been removed.
    layout_epoch: u64,
}

/// Layout epochs are unique across all segments of the process.
static LAYOUT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_layout_epoch() -> u64 {
    LAYOUT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

impl Segment {
    /// Formats `memory` as a single free chunk.
    pub fn format(
        index: usize,
        mut memory: Box<dyn Memory>,
        thresholds: [usize; FREE_BUCKET_COUNT],
        free_list_size: usize,
    ) -> Self {
        let len = memory.len();
        let mut buckets = FreeBuckets::new(thresholds, free_list_size);
        write_free_header(memory.as_mut(), 0, len - CHUNK_HDR_SZ);
        buckets.push(0, len);

        Self::with_state(index, memory, buckets, true)
    }

    /// Wraps memory holding an existing chunk layout.
    ///
    /// Nothing is allocated from a mounted segment until it is crawled.
    pub fn mount(
        index: usize,
        memory: Box<dyn Memory>,
        thresholds: [usize; FREE_BUCKET_COUNT],
        free_list_size: usize,
    ) -> Self {
        let buckets = FreeBuckets::new(thresholds, free_list_size);
        Self::with_state(index, memory, buckets, false)
    }

    fn with_state(
        index: usize,
        memory: Box<dyn Memory>,
        buckets: FreeBuckets,
        crawled: bool,
    ) -> Self {
        Self {
            index,
            len: memory.len(),
            used_bytes: AtomicU64::new(0),
            object_count: AtomicU64::new(0),
            link_count: AtomicU64::new(0),
            crawled: AtomicBool::new(crawled),
            deleted: AtomicBool::new(false),
            state: RwLock::new(SegmentState {
                memory,
                buckets,
                last_crawl: Instant::now(),
                used_bytes_at_last_crawl: 0,
                layout_epoch: next_layout_epoch(),
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Region size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Sum of payload sizes of USED chunks.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn object_count(&self) -> u64 {
        self.object_count.load(Ordering::Relaxed)
    }

    pub fn link_count(&self) -> u64 {
        self.link_count.load(Ordering::Relaxed)
    }

    /// Whether the free buckets reflect the segment content.
    pub fn is_crawled(&self) -> bool {
        self.crawled.load(Ordering::Relaxed)
    }

    /// Whether the segment has been retired.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Relaxed)
    }

    /// Whether no object or link lives in the segment.
    pub fn is_empty(&self) -> bool {
        self.object_count() == 0 && self.link_count() == 0
    }

    /// Conservative estimate of unallocated bytes.
    pub fn free_bytes(&self) -> u64 {
        let headers = (self.object_count() + self.link_count()) * CHUNK_HDR_SZ as u64;
        (self.len as u64).saturating_sub(self.used_bytes() + headers)
    }

    pub fn stats(&self) -> SegmentStats {
        SegmentStats {
            index: self.index,
            size: self.len as u64,
            used_bytes: self.used_bytes(),
            free_bytes: self.free_bytes(),
            object_count: self.object_count(),
            link_count: self.link_count(),
            crawled: self.is_crawled(),
        }
    }

    /// Takes the read lock, giving up once `abort` reports true.
    pub fn read(&self, abort: impl Fn() -> bool) -> Option<SegmentReader<'_>> {
        read_or_abort(&self.state, abort).map(|state| SegmentReader {
            segment: self,
            state,
        })
    }

    /// Takes the write lock, giving up once `abort` reports true.
    pub fn write(&self, abort: impl Fn() -> bool) -> Option<SegmentWriter<'_>> {
        write_or_abort(&self.state, abort).map(|state| SegmentWriter {
            segment: self,
            state,
        })
    }

    /// Takes the write lock only if it is free right now.
    pub fn try_write(&self) -> Option<SegmentWriter<'_>> {
        self.state.try_write().map(|state| SegmentWriter {
            segment: self,
            state,
        })
    }

    /// Takes the write lock unconditionally.
    pub fn write_blocking(&self) -> SegmentWriter<'_> {
        SegmentWriter {
            segment: self,
            state: self.state.write(),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("len", &self.len)
            .field("used_bytes", &self.used_bytes())
            .field("objects", &self.object_count())
            .field("links", &self.link_count())
            .field("crawled", &self.is_crawled())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

/// Shared access to a segment's memory.
pub(crate) struct SegmentReader<'a> {
    segment: &'a Segment,
    state: RwLockReadGuard<'a, SegmentState>,
}

impl SegmentReader<'_> {
    pub fn segment(&self) -> &Segment {
        self.segment
    }

    pub fn memory(&self) -> &dyn Memory {
        self.state.memory.as_ref()
    }

    /// Identifies the current chunk layout.
    ///
    /// Allocation and deallocation only ever add chunk boundaries. A crawl
    /// may merge chunks away and moves the segment to a new epoch, so an
    /// offset recorded under an older epoch may no longer start a chunk.
    pub fn layout_epoch(&self) -> u64 {
        self.state.layout_epoch
    }
}

/// Exclusive access to a segment's memory and allocator.
pub(crate) struct SegmentWriter<'a> {
    segment: &'a Segment,
    state: RwLockWriteGuard<'a, SegmentState>,
}

impl SegmentWriter<'_> {
    pub fn segment(&self) -> &Segment {
        self.segment
    }

    pub fn memory(&self) -> &dyn Memory {
        self.state.memory.as_ref()
    }

    /// Allocates a chunk with `size` payload bytes and writes `payload`.
    ///
    /// `size` is 8-aligned and at least `payload.stored_len()`. Returns the
    /// chunk address, or `None` when no tracked free chunk is big enough.
    pub fn allocate(&mut self, size: usize, payload: &Payload<'_>) -> Option<usize> {
        debug_assert!(size % 8 == 0 && size >= payload.stored_len());
        let state = &mut *self.state;
        let alloc_size = size + CHUNK_HDR_SZ;

        let address = if alloc_size > state.buckets.max_chunk_size() {
            state.buckets.take_large(state.memory.as_ref(), size)?
        } else {
            state.buckets.pop_fitting(alloc_size)?
        };

        self.alloc_chunk(address, size, payload);
        Some(address)
    }

    /// Turns the free chunk at `address` into a USED chunk, splitting off
    /// the tail when it is big enough to be tracked.
    fn alloc_chunk(&mut self, address: usize, size: usize, payload: &Payload<'_>) {
        let state = &mut *self.state;
        let free_size = read_payload_size(state.memory.as_ref(), address);
        let remainder = free_size - size;

        let size = if remainder < state.buckets.min_chunk_size() {
            free_size
        } else {
            size
        };

        let memory = state.memory.as_mut();
        chunk::write_used_header(memory, address, size, payload.tag);
        payload.write(memory, address);

        if size != free_size {
            let tail = address + CHUNK_HDR_SZ + size;
            self.add_free_chunk(tail, remainder - CHUNK_HDR_SZ);
        }

        self.segment
            .used_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
        self.count(payload.tag).fetch_add(1, Ordering::Relaxed);
    }

    /// Marks `address` as a FREE chunk of `payload_size` bytes and tracks it.
    ///
    /// Returns false when the chunk stays untracked until the next crawl.
    fn add_free_chunk(&mut self, address: usize, payload_size: usize) -> bool {
        let state = &mut *self.state;
        write_free_header(state.memory.as_mut(), address, payload_size);
        state.buckets.push(address, payload_size + CHUNK_HDR_SZ)
    }

    /// Frees the USED chunk at `address`; anything else is left alone.
    ///
    /// Returns whether a chunk was freed.
    pub fn deallocate(&mut self, address: usize) -> bool {
        let header = ChunkHeader::read(self.memory(), address);
        if header.flag != ChunkFlag::Used {
            return false;
        }

        // Counters of an uncrawled segment are rebuilt by its first crawl
        if !self.segment.is_crawled() {
            self.state.memory.write_free_chunk_flag(address);
            return true;
        }

        self.add_free_chunk(address, header.payload_size);
        self.segment
            .used_bytes
            .fetch_sub(header.payload_size as u64, Ordering::Relaxed);
        let tag = SerializerTag::from_byte(header.tag).unwrap_or(SerializerTag::Generic);
        self.count(tag).fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Rewrites the chunk at `address` in place if `payload` fits.
    pub fn overwrite(&mut self, address: usize, header: &ChunkHeader, payload: &Payload<'_>) -> bool {
        if payload.stored_len() > header.payload_size {
            return false;
        }
        let memory = self.state.memory.as_mut();
        write_tag(memory, address, payload.tag);
        payload.write(memory, address);
        self.retag(header.tag, payload.tag);
        true
    }

    /// Turns the USED chunk at `address` into a link to `target`.
    ///
    /// The chunk keeps its size; its payload must hold a pointer.
    pub fn store_link(&mut self, address: usize, header: &ChunkHeader, target: PilePointer) {
        debug_assert!(header.payload_size >= PilePointer::SIZE);
        let memory = self.state.memory.as_mut();
        write_tag(memory, address, SerializerTag::Link);
        target.write_to(memory, address + CHUNK_HDR_SZ);
        self.retag(header.tag, SerializerTag::Link);
    }

    /// Moves one count between objects and links when a chunk changes kind.
    fn retag(&self, old: u8, new: SerializerTag) {
        let old_link = old == SerializerTag::Link.as_byte();
        let new_link = new == SerializerTag::Link;
        if old_link != new_link && self.segment.is_crawled() {
            let (from, to) = if new_link {
                (&self.segment.object_count, &self.segment.link_count)
            } else {
                (&self.segment.link_count, &self.segment.object_count)
            };
            from.fetch_sub(1, Ordering::Relaxed);
            to.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count(&self, tag: SerializerTag) -> &AtomicU64 {
        if tag == SerializerTag::Link {
            &self.segment.link_count
        } else {
            &self.segment.object_count
        }
    }

    /// Whether an opportunistic crawl is worth it before giving up on this
    /// segment.
    ///
    /// True when a jittered `interval` has passed since the last crawl, or
    /// when used bytes moved by more than a tenth of the segment since then.
    pub fn crawl_due(&self, interval: Duration) -> bool {
        let jitter = rand::thread_rng().gen_range(0.75..1.5);
        if self.state.last_crawl.elapsed() >= interval.mul_f64(jitter) {
            return true;
        }
        let used = self.segment.used_bytes();
        used.abs_diff(self.state.used_bytes_at_last_crawl) > self.segment.len as u64 / 10
    }

    /// Marks the segment deleted and releases its memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing resource cannot be released; the
    /// segment stays deleted either way.
    pub fn retire(&mut self) -> PileResult<()> {
        self.segment.deleted.store(true, Ordering::Relaxed);
        self.state.buckets.clear();
        self.state.memory.delete_and_dispose()?;
        Ok(())
    }

    pub fn flush(&mut self) -> PileResult<()> {
        if self.segment.is_deleted() {
            return Ok(());
        }
        self.state.memory.flush()?;
        Ok(())
    }

    #[cfg(test)]
    fn tracked_free_chunks(&self) -> usize {
        self.state.buckets.tracked()
    }
}
