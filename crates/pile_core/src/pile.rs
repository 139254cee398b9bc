//! The pile: a growable set of segments behind one API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Pile<C>                   │
//! │  ┌──────────────┐   ┌──────────────────────┐ │
//! │  │  Codec (C)   │   │ ArcSwap<SegmentList> │ │
//! │  └──────────────┘   └──────────┬───────────┘ │
//! │                     ┌──────────┴──────────┐  │
//! │                     │ Segment 0 .. N      │  │
//! │                     │ RwLock + buckets    │  │
//! │                     └──────────┬──────────┘  │
//! │                     ┌──────────┴──────────┐  │
//! │                     │ LocalMemory /       │  │
//! │                     │ MappedMemory        │  │
//! │                     └─────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Readers load an immutable snapshot of the segment list. Adding or
//! removing a segment builds a new list under the structure lock and swaps
//! it in, so slot indices of live pointers never move.

use crate::codec::Codec;
use crate::config::PileConfig;
use crate::dir::PileDir;
use crate::enumerator::PileEnumerator;
use crate::error::{PileError, PileResult};
use crate::segment::{
    align8, preamble_data, used_header, ChunkHeader, CrawlStatus, Payload, Segment, SegmentReader,
    SegmentWriter, CHUNK_HDR_SZ,
};
use crate::stats::{PileCounters, PileStats};
use crate::types::{AllocationMode, PilePointer, PileValue, SerializerTag};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use pile_storage::{LocalMemory, MappedMemory, Memory};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) type SegmentList = Vec<Option<Arc<Segment>>>;

/// Reusable serialization scratch for puts.
///
/// Objects are encoded into the buffer before being copied into a chunk.
/// Keep one per worker and pass it to [`Pile::put_with`] to avoid a fresh
/// allocation on every put.
#[derive(Debug, Default)]
pub struct PutBuffer {
    buf: Vec<u8>,
}

impl PutBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer with room for `capacity` encoded bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }
}

/// A segmented off-heap object store.
///
/// Values live in chunks inside large memory segments and are addressed
/// by [`PilePointer`]. All operations take `&self`; a pile is shared
/// between threads behind an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use pile_core::{CborCodec, Pile, PileConfig, PileValue};
///
/// let pile = Pile::open(PileConfig::default(), CborCodec::<Vec<u32>>::new())?;
///
/// let p = pile.put(&PileValue::Object(vec![1, 2, 3]))?;
/// assert_eq!(pile.get(p)?, PileValue::Object(vec![1, 2, 3]));
///
/// assert!(pile.delete(p, true)?);
/// # Ok::<(), pile_core::PileError>(())
/// ```
pub struct Pile<C: Codec> {
    config: PileConfig,
    codec: C,
    segments: ArcSwap<SegmentList>,
    /// Serializes structural changes to the segment list.
    structure: Mutex<()>,
    running: AtomicBool,
    next_start: AtomicUsize,
    cpu_count: usize,
    counters: PileCounters,
    dir: Option<PileDir>,
}

impl<C: Codec> Pile<C> {
    /// Opens a pile.
    ///
    /// With a data directory, every `pile-######.mmf` file in it is mounted
    /// as the segment of the same index. Mounted segments take no
    /// allocations until crawled; with `crawl_on_open` they are crawled in
    /// parallel before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directory is
    /// locked or unreadable, or a mounted segment is corrupt.
    pub fn open(config: PileConfig, codec: C) -> PileResult<Self> {
        config.validate()?;

        let dir = config
            .data_dir
            .as_deref()
            .map(|path| PileDir::open(path, config.create_if_missing))
            .transpose()?;
        let segments = match &dir {
            Some(dir) => mount_segments(dir, &config)?,
            None => Vec::new(),
        };
        let mounted = segments.iter().flatten().count();

        let pile = Self {
            config,
            codec,
            segments: ArcSwap::from_pointee(segments),
            structure: Mutex::new(()),
            running: AtomicBool::new(true),
            next_start: AtomicUsize::new(0),
            cpu_count: num_cpus::get().max(1),
            counters: PileCounters::default(),
            dir,
        };

        if mounted > 0 && pile.config.crawl_on_open {
            let status = pile.crawl(true)?;
            tracing::info!(
                segments = status.segments,
                objects = status.object_count,
                links = status.link_count,
                used_bytes = status.used_payload_bytes,
                "crawled mounted segments"
            );
        }
        tracing::debug!(
            mode = ?pile.config.allocation_mode,
            segment_size = pile.config.segment_size,
            mounted,
            "opened pile"
        );

        Ok(pile)
    }

    /// Opens a process-local pile with the default configuration.
    ///
    /// # Errors
    ///
    /// Never fails with the default configuration; the signature matches
    /// [`Pile::open`].
    pub fn in_memory(codec: C) -> PileResult<Self> {
        Self::open(PileConfig::default(), codec)
    }

    /// Returns the configuration the pile was opened with.
    pub fn config(&self) -> &PileConfig {
        &self.config
    }

    /// Returns the codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns the data directory, if segments are file-backed.
    pub fn data_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(PileDir::path)
    }

    /// Returns whether the pile accepts operations.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.segments.load().iter().flatten().count()
    }

    /// Stores a value and returns its pointer.
    ///
    /// # Errors
    ///
    /// Returns `ObjectTooLarge` if the value cannot fit in one segment,
    /// `CapacityExceeded` if a new segment is needed but a limit forbids it,
    /// or `NotRunning` after [`Pile::close`].
    pub fn put(&self, value: &PileValue<C::Object>) -> PileResult<PilePointer> {
        self.put_with(value, &mut PutBuffer::new(), 0)
    }

    /// Stores a value using `buffer` as scratch, reserving at least
    /// `preallocate` payload bytes so later in-place updates may grow into
    /// the chunk.
    ///
    /// # Errors
    ///
    /// Same as [`Pile::put`].
    pub fn put_with(
        &self,
        value: &PileValue<C::Object>,
        buffer: &mut PutBuffer,
        preallocate: usize,
    ) -> PileResult<PilePointer> {
        self.ensure_running()?;
        let payload = self.encode(value, buffer)?;
        let pointer = self.put_payload(&payload, preallocate, None)?;
        self.counters.record_put();
        Ok(pointer)
    }

    /// Replaces the value at `pointer`.
    ///
    /// The value is rewritten in place if it fits the existing chunk.
    /// Otherwise, if `link` is set, the value is stored elsewhere and the
    /// chunk at `pointer` becomes a link to it, so `pointer` stays valid.
    /// Returns false, leaving the old value untouched, if neither works.
    ///
    /// # Errors
    ///
    /// Returns `AccessViolation` if `pointer` does not reference a live
    /// chunk, plus any error of [`Pile::put`] when a link target is stored.
    pub fn put_at(
        &self,
        pointer: PilePointer,
        value: &PileValue<C::Object>,
        link: bool,
    ) -> PileResult<bool> {
        self.put_at_with(pointer, value, &mut PutBuffer::new(), link)
    }

    /// [`Pile::put_at`] with caller-owned scratch.
    ///
    /// # Errors
    ///
    /// Same as [`Pile::put_at`].
    pub fn put_at_with(
        &self,
        pointer: PilePointer,
        value: &PileValue<C::Object>,
        buffer: &mut PutBuffer,
        link: bool,
    ) -> PileResult<bool> {
        self.ensure_running()?;
        let payload = self.encode(value, buffer)?;

        let segment = self.segment_for(pointer)?;
        let mut writer = self.lock_for_write(&segment, pointer)?;
        let (address, header, tag) = used_header(writer.memory(), pointer)?;
        let old_target = (tag == SerializerTag::Link)
            .then(|| PilePointer::read_from(writer.memory(), address + CHUNK_HDR_SZ));

        if writer.overwrite(address, &header, &payload) {
            self.counters.record_in_place_update();
        } else if link && header.payload_size >= PilePointer::SIZE {
            let target = self.put_payload(&payload, 0, Some(&mut writer))?;
            writer.store_link(address, &header, target);
            self.counters.record_link();
        } else {
            return Ok(false);
        }
        drop(writer);

        if let Some(old) = old_target {
            self.delete_quietly(old);
        }
        Ok(true)
    }

    /// Reads the value at `pointer`, following a link if there is one.
    ///
    /// # Errors
    ///
    /// Returns `AccessViolation` for a pointer that does not reference a
    /// live chunk, `Codec` if an object fails to decode, or `Corruption`.
    pub fn get(&self, pointer: PilePointer) -> PileResult<PileValue<C::Object>> {
        self.ensure_running()?;
        let value = self.with_chunk(pointer, true, |memory, address, header, tag| {
            let segment = pointer.segment as usize;
            match tag {
                SerializerTag::Utf8 => {
                    let (start, len) = preamble_data(memory, segment, address, header)?;
                    Ok(PileValue::Text(memory.read_utf8_string(start, len)?))
                }
                SerializerTag::Buffer => {
                    let (start, len) = preamble_data(memory, segment, address, header)?;
                    Ok(PileValue::Buffer(memory.read_stream(start, len).to_vec()))
                }
                SerializerTag::Generic => {
                    let bytes = memory.read_stream(address + CHUNK_HDR_SZ, header.payload_size);
                    Ok(PileValue::Object(self.codec.deserialize(bytes)?))
                }
                SerializerTag::Link => Err(nested_link(pointer, address)),
            }
        })?;
        self.counters.record_get();
        Ok(value)
    }

    /// Reads the stored bytes at `pointer` without decoding them.
    ///
    /// Text and buffer data come back without their length preamble;
    /// objects come back as the whole chunk payload, padding included.
    ///
    /// # Errors
    ///
    /// Same as [`Pile::get`], minus codec errors.
    pub fn get_raw_buffer(&self, pointer: PilePointer) -> PileResult<(Vec<u8>, SerializerTag)> {
        self.ensure_running()?;
        let raw = self.with_chunk(pointer, true, |memory, address, header, tag| {
            let bytes = if tag.has_preamble() {
                let (start, len) = preamble_data(memory, pointer.segment as usize, address, header)?;
                memory.read_stream(start, len)
            } else {
                memory.read_stream(address + CHUNK_HDR_SZ, header.payload_size)
            };
            Ok((bytes.to_vec(), tag))
        })?;
        self.counters.record_get();
        Ok(raw)
    }

    /// Returns the payload size of the chunk holding the value at
    /// `pointer`, following a link if there is one.
    ///
    /// # Errors
    ///
    /// Returns `AccessViolation` for a pointer that does not reference a
    /// live chunk.
    pub fn size_of(&self, pointer: PilePointer) -> PileResult<usize> {
        self.ensure_running()?;
        self.with_chunk(pointer, true, |_, _, header, _| Ok(header.payload_size))
    }

    /// Frees the chunk at `pointer`, and the link target if it is a link.
    ///
    /// Returns false if nothing was freed. An invalid pointer is an error
    /// when `throw_on_invalid` is set and `Ok(false)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AccessViolation` for an invalid pointer (only with
    /// `throw_on_invalid`), `NotRunning`, or `Corruption`.
    pub fn delete(&self, pointer: PilePointer, throw_on_invalid: bool) -> PileResult<bool> {
        self.ensure_running()?;
        match self.delete_chunk(pointer) {
            Err(PileError::AccessViolation { .. }) if !throw_on_invalid => Ok(false),
            other => other,
        }
    }

    /// Crawls every segment, merging free space and rebuilding free lists.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if any segment fails validation, or
    /// `NotRunning`.
    pub fn crawl(&self, parallel: bool) -> PileResult<CrawlStatus> {
        self.ensure_running()?;
        let list = self.segments.load_full();
        let live: Vec<&Arc<Segment>> = list.iter().flatten().collect();

        let crawl_one = |segment: &Arc<Segment>| -> PileResult<CrawlStatus> {
            let mut writer = segment
                .write(|| !self.is_running())
                .ok_or(PileError::NotRunning)?;
            if segment.is_deleted() {
                return Ok(CrawlStatus::default());
            }
            let status = writer.crawl()?;
            self.counters.record_crawl();
            Ok(status)
        };

        if parallel {
            let total = Mutex::new(CrawlStatus::default());
            live.par_iter().try_for_each(|segment| {
                let status = crawl_one(segment)?;
                *total.lock() += status;
                Ok::<(), PileError>(())
            })?;
            Ok(total.into_inner())
        } else {
            let mut total = CrawlStatus::default();
            for segment in live {
                total += crawl_one(segment)?;
            }
            Ok(total)
        }
    }

    /// Crawls, then retires every segment holding no objects or links.
    ///
    /// Returns the number of retired segments.
    ///
    /// # Errors
    ///
    /// Same as [`Pile::crawl`].
    pub fn compact(&self) -> PileResult<usize> {
        self.crawl(true)?;

        let list = self.segments.load_full();
        let mut retired = 0;
        for segment in list.iter().flatten() {
            let mut writer = segment
                .write(|| !self.is_running())
                .ok_or(PileError::NotRunning)?;
            if segment.is_deleted() || !segment.is_empty() {
                continue;
            }
            self.retire(&mut writer);
            drop(writer);
            self.remove_slot(segment);
            retired += 1;
        }

        tracing::info!(retired, remaining = self.segment_count(), "compacted pile");
        Ok(retired)
    }

    /// Deletes everything: every segment is retired and its file removed.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the pile is closed.
    pub fn purge(&self) -> PileResult<()> {
        self.ensure_running()?;
        let old = {
            let _structure = self.structure.lock();
            self.segments.swap(Arc::new(Vec::new()))
        };

        let mut purged = 0;
        for segment in old.iter().flatten() {
            let mut writer = segment.write_blocking();
            if !segment.is_deleted() {
                self.retire(&mut writer);
                self.counters.record_segment_removed();
                purged += 1;
            }
        }
        tracing::info!(segments = purged, "purged pile");
        Ok(())
    }

    /// Returns an enumerator over every live chunk.
    pub fn entries(&self) -> PileEnumerator<'_, C> {
        PileEnumerator::new(self)
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> PileStats {
        let mut stats = PileStats::default();
        self.counters.fill(&mut stats);
        for segment in self.segments.load().iter().flatten() {
            if !segment.is_deleted() {
                stats.add_segment(segment.stats());
            }
        }
        stats
    }

    /// Stops the pile and flushes every segment.
    ///
    /// Operations started afterwards fail with `NotRunning`; threads waiting
    /// for a segment lock give up. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first flush error; the remaining segments are still
    /// flushed.
    pub fn close(&self) -> PileResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for segment in self.segments.load().iter().flatten() {
            if let Err(err) = segment.write_blocking().flush() {
                tracing::warn!(segment = segment.index(), error = %err, "segment flush failed");
                first_error.get_or_insert(err);
            }
        }
        tracing::debug!("closed pile");
        first_error.map_or(Ok(()), Err)
    }

    // === Internals ===

    pub(crate) fn segment_list(&self) -> Arc<SegmentList> {
        self.segments.load_full()
    }

    fn ensure_running(&self) -> PileResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PileError::NotRunning)
        }
    }

    fn encode<'a>(
        &self,
        value: &'a PileValue<C::Object>,
        buffer: &'a mut PutBuffer,
    ) -> PileResult<Payload<'a>> {
        Ok(match value {
            PileValue::Text(text) => Payload::new(SerializerTag::Utf8, text.as_bytes()),
            PileValue::Buffer(bytes) => Payload::new(SerializerTag::Buffer, bytes),
            PileValue::Object(object) => {
                buffer.buf.clear();
                self.codec.serialize(object, &mut buffer.buf)?;
                Payload::new(SerializerTag::Generic, &buffer.buf)
            }
        })
    }

    /// Resolves the segment a pointer names.
    fn segment_for(&self, pointer: PilePointer) -> PileResult<Arc<Segment>> {
        let list = self.segments.load();
        usize::try_from(pointer.segment)
            .ok()
            .and_then(|index| list.get(index))
            .and_then(Option::as_ref)
            .filter(|segment| !segment.is_deleted())
            .cloned()
            .ok_or_else(|| PileError::access_violation(pointer, "no such segment"))
    }

    fn lock_for_read<'s>(
        &self,
        segment: &'s Segment,
        pointer: PilePointer,
    ) -> PileResult<SegmentReader<'s>> {
        let reader = segment
            .read(|| !self.is_running())
            .ok_or(PileError::NotRunning)?;
        if segment.is_deleted() {
            return Err(PileError::access_violation(pointer, "segment was retired"));
        }
        Ok(reader)
    }

    fn lock_for_write<'s>(
        &self,
        segment: &'s Segment,
        pointer: PilePointer,
    ) -> PileResult<SegmentWriter<'s>> {
        let writer = segment
            .write(|| !self.is_running())
            .ok_or(PileError::NotRunning)?;
        if segment.is_deleted() {
            return Err(PileError::access_violation(pointer, "segment was retired"));
        }
        Ok(writer)
    }

    /// Runs `f` on the chunk holding the value at `pointer` with the read
    /// lock held. A link is followed once, keeping its own segment locked.
    fn with_chunk<R>(
        &self,
        pointer: PilePointer,
        follow_link: bool,
        f: impl FnOnce(&dyn Memory, usize, &ChunkHeader, SerializerTag) -> PileResult<R>,
    ) -> PileResult<R> {
        let segment = self.segment_for(pointer)?;
        let reader = self.lock_for_read(&segment, pointer)?;
        let memory = reader.memory();
        let (address, header, tag) = used_header(memory, pointer)?;

        if tag == SerializerTag::Link {
            if !follow_link {
                return Err(nested_link(pointer, address));
            }
            let target = PilePointer::read_from(memory, address + CHUNK_HDR_SZ);
            return self.with_chunk(target, false, f);
        }
        f(memory, address, &header, tag)
    }

    /// Finds a segment with room for `payload` and allocates there.
    ///
    /// `held` is a segment the caller already holds the write lock of; it is
    /// used directly instead of being locked again. While holding it, other
    /// segments are only tried if their lock is free.
    fn put_payload(
        &self,
        payload: &Payload<'_>,
        preallocate: usize,
        mut held: Option<&mut SegmentWriter<'_>>,
    ) -> PileResult<PilePointer> {
        let size = align8(payload.stored_len().max(preallocate));
        let chunk_size = size + CHUNK_HDR_SZ;
        if chunk_size > self.config.segment_size {
            return Err(PileError::ObjectTooLarge {
                size: chunk_size,
                max: self.config.segment_size,
            });
        }

        let list = self.segments.load_full();
        let count = list.len();
        let start = if count > 2 * self.cpu_count {
            self.next_start.fetch_add(1, Ordering::Relaxed) % count
        } else {
            0
        };

        for offset in 0..count {
            let index = (start + offset) % count;
            let Some(segment) = list[index].as_ref() else {
                continue;
            };
            if segment.is_deleted() || !segment.is_crawled() || !self.has_room(segment, chunk_size) {
                continue;
            }

            let address = match held.as_deref_mut() {
                Some(writer) if std::ptr::eq(writer.segment(), segment.as_ref()) => {
                    self.allocate_in(writer, size, payload)?
                }
                Some(_) => match segment.try_write() {
                    Some(mut writer) => self.allocate_in(&mut writer, size, payload)?,
                    None => continue,
                },
                None => {
                    let mut writer = segment
                        .write(|| !self.is_running())
                        .ok_or(PileError::NotRunning)?;
                    self.allocate_in(&mut writer, size, payload)?
                }
            };

            if let Some(address) = address {
                return Ok(PilePointer::new(index as i32, address as i32));
            }
        }

        self.put_in_new_segment(size, payload, count, held.is_some())
    }

    fn has_room(&self, segment: &Segment, chunk_size: usize) -> bool {
        let free = segment.free_bytes();
        match self.config.allocation_mode {
            AllocationMode::FavorSpeed => free >= (segment.len() / 8) as u64,
            AllocationMode::ReuseSpace => free >= chunk_size as u64,
        }
    }

    /// Allocates in a locked segment, crawling once first if a crawl is due.
    fn allocate_in(
        &self,
        writer: &mut SegmentWriter<'_>,
        size: usize,
        payload: &Payload<'_>,
    ) -> PileResult<Option<usize>> {
        if writer.segment().is_deleted() {
            return Ok(None);
        }
        if let Some(address) = writer.allocate(size, payload) {
            return Ok(Some(address));
        }
        if !writer.crawl_due(self.config.crawl_interval) {
            return Ok(None);
        }
        writer.crawl()?;
        self.counters.record_crawl();
        Ok(writer.allocate(size, payload))
    }

    /// Appends a segment and allocates in it.
    ///
    /// `seen` is the list length the caller already searched. Segments that
    /// other threads appended since then are tried first, outside the
    /// structure lock; a segment is only appended once the list has not
    /// grown past what was searched. With `holding` set the caller owns a
    /// segment lock, so other segments are only taken if free.
    fn put_in_new_segment(
        &self,
        size: usize,
        payload: &Payload<'_>,
        mut seen: usize,
        holding: bool,
    ) -> PileResult<PilePointer> {
        let chunk_size = size + CHUNK_HDR_SZ;
        loop {
            let list = {
                let structure = self.structure.lock();
                let list = self.segments.load_full();
                if list.len() <= seen {
                    return self.append_segment(&structure, &list, size, payload);
                }
                list
            };

            for (index, slot) in list.iter().enumerate().skip(seen) {
                let Some(segment) = slot.as_ref() else {
                    continue;
                };
                if segment.is_deleted() || !segment.is_crawled() || !self.has_room(segment, chunk_size) {
                    continue;
                }
                let writer = if holding {
                    segment.try_write()
                } else {
                    Some(
                        segment
                            .write(|| !self.is_running())
                            .ok_or(PileError::NotRunning)?,
                    )
                };
                let Some(mut writer) = writer else {
                    continue;
                };
                if let Some(address) = self.allocate_in(&mut writer, size, payload)? {
                    return Ok(PilePointer::new(index as i32, address as i32));
                }
            }
            seen = list.len();
        }
    }

    /// Creates segment `list.len()`, allocates in it and publishes it.
    fn append_segment(
        &self,
        _structure: &MutexGuard<'_, ()>,
        list: &SegmentList,
        size: usize,
        payload: &Payload<'_>,
    ) -> PileResult<PilePointer> {
        let live = list.iter().flatten().count();
        if self.config.max_segment_count != 0 && live >= self.config.max_segment_count {
            return Err(PileError::capacity_exceeded(format!(
                "segment count limit of {} reached",
                self.config.max_segment_count
            )));
        }
        let segment_size = self.config.segment_size;
        if self.config.max_memory != 0
            && (live as u64 + 1) * segment_size as u64 > self.config.max_memory
        {
            return Err(PileError::capacity_exceeded(format!(
                "memory limit of {} bytes reached",
                self.config.max_memory
            )));
        }

        let index = list.len();
        let memory: Box<dyn Memory> = match &self.dir {
            Some(dir) => Box::new(MappedMemory::create(&dir.segment_path(index), segment_size)?),
            None => Box::new(LocalMemory::new(segment_size)),
        };
        let segment = Arc::new(Segment::format(
            index,
            memory,
            self.config.free_chunk_sizes,
            self.config.free_list_size,
        ));

        let address = segment
            .write_blocking()
            .allocate(size, payload)
            .ok_or(PileError::ObjectTooLarge {
                size: size + CHUNK_HDR_SZ,
                max: segment_size,
            })?;

        let mut next = Vec::with_capacity(index + 1);
        next.extend(list.iter().cloned());
        next.push(Some(segment));
        self.segments.store(Arc::new(next));

        self.counters.record_segment_added();
        tracing::debug!(segment = index, size = segment_size, "added segment");
        Ok(PilePointer::new(index as i32, address as i32))
    }

    fn delete_chunk(&self, pointer: PilePointer) -> PileResult<bool> {
        let segment = self.segment_for(pointer)?;
        let mut writer = self.lock_for_write(&segment, pointer)?;
        let (address, _, tag) = used_header(writer.memory(), pointer)?;
        let target = (tag == SerializerTag::Link)
            .then(|| PilePointer::read_from(writer.memory(), address + CHUNK_HDR_SZ));

        if !writer.deallocate(address) {
            return Ok(false);
        }
        self.counters.record_delete();

        // Bit 3 is the lowest address bit not fixed by alignment
        let retire = segment.is_crawled()
            && segment.is_empty()
            && (self.config.allocation_mode == AllocationMode::ReuseSpace
                || ((address >> 3) & 1) == 0);
        if retire {
            self.retire(&mut writer);
        }
        drop(writer);
        if retire {
            self.remove_slot(&segment);
        }

        if let Some(target) = target {
            self.delete_quietly(target);
        }
        Ok(true)
    }

    /// Deletes a link target, ignoring every failure.
    fn delete_quietly(&self, pointer: PilePointer) {
        if let Err(err) = self.delete_chunk(pointer) {
            tracing::debug!(%pointer, error = %err, "link target cleanup failed");
        }
    }

    /// Tombstones a locked segment and releases its memory.
    fn retire(&self, writer: &mut SegmentWriter<'_>) {
        if let Err(err) = writer.retire() {
            tracing::warn!(segment = writer.segment().index(), error = %err, "segment release failed");
        }
    }

    /// Drops a retired segment from the list.
    ///
    /// The last slot is removed along with any empty slots before it; an
    /// inner slot is nulled so later indices stay put.
    fn remove_slot(&self, segment: &Arc<Segment>) {
        let _structure = self.structure.lock();
        let list = self.segments.load_full();
        let index = segment.index();
        if !matches!(list.get(index), Some(Some(s)) if Arc::ptr_eq(s, segment)) {
            return;
        }

        let mut next: SegmentList = list.as_ref().clone();
        next[index] = None;
        while matches!(next.last(), Some(None)) {
            next.pop();
        }
        self.segments.store(Arc::new(next));

        self.counters.record_segment_removed();
        tracing::debug!(segment = index, "retired segment");
    }
}

impl<C: Codec> Drop for Pile<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "pile close failed during drop");
        }
    }
}

impl<C: Codec> std::fmt::Debug for Pile<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pile")
            .field("running", &self.is_running())
            .field("segments", &self.segment_count())
            .field("data_dir", &self.data_dir())
            .finish()
    }
}

fn nested_link(pointer: PilePointer, address: usize) -> PileError {
    PileError::corruption(pointer.segment as usize, address, "link points to another link")
}

fn mount_segments(dir: &PileDir, config: &PileConfig) -> PileResult<SegmentList> {
    let mut list = SegmentList::new();
    for (index, path) in dir.segment_files()? {
        let memory = MappedMemory::open(&path)?;
        if list.len() <= index {
            list.resize(index + 1, None);
        }
        list[index] = Some(Arc::new(Segment::mount(
            index,
            Box::new(memory),
            config.free_chunk_sizes,
            config.free_list_size,
        )));
    }

    tracing::info!(
        path = %dir.path().display(),
        segments = list.iter().flatten().count(),
        "mounted segment files"
    );
    Ok(list)
}
