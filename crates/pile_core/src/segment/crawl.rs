//! Segment crawl: validation, free-chunk merging and bucket rebuild.

use super::chunk::{checked_header, write_free_header, CHUNK_HDR_SZ};
use super::free_list::FreeBuckets;
use super::SegmentWriter;
use crate::error::{PileError, PileResult};
use crate::types::SerializerTag;
use pile_storage::{ChunkFlag, Memory};
use serde::Serialize;
use std::ops::AddAssign;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Result of crawling one or more segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStatus {
    /// Segments crawled.
    pub segments: u64,
    /// Chunks found after merging.
    pub chunks: u64,
    /// USED chunks (objects and links).
    pub used_chunks: u64,
    /// USED chunks holding a value.
    pub object_count: u64,
    /// USED chunks holding a link.
    pub link_count: u64,
    /// FREE chunks after merging.
    pub free_chunks: u64,
    /// FREE chunks folded into a preceding FREE neighbor.
    pub merged_chunks: u64,
    /// FREE chunks that made it into a free bucket.
    pub tracked_free_chunks: u64,
    /// Sum of USED payload sizes.
    pub used_payload_bytes: u64,
    /// Sum of FREE payload sizes.
    pub free_payload_bytes: u64,
}

impl AddAssign for CrawlStatus {
    fn add_assign(&mut self, other: Self) {
        self.segments += other.segments;
        self.chunks += other.chunks;
        self.used_chunks += other.used_chunks;
        self.object_count += other.object_count;
        self.link_count += other.link_count;
        self.free_chunks += other.free_chunks;
        self.merged_chunks += other.merged_chunks;
        self.tracked_free_chunks += other.tracked_free_chunks;
        self.used_payload_bytes += other.used_payload_bytes;
        self.free_payload_bytes += other.free_payload_bytes;
    }
}

impl SegmentWriter<'_> {
    /// Walks every chunk of the segment.
    ///
    /// Runs of adjacent FREE chunks are merged into one chunk, the free
    /// buckets are rebuilt from scratch, and the segment counters are reset
    /// from what was found. Afterwards the segment takes allocations.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` when a header carries a wrong flag, a bad size
    /// or an unknown tag. The segment is then left uncrawled with empty
    /// free buckets, so it takes no allocations until a crawl succeeds.
    pub fn crawl(&mut self) -> PileResult<CrawlStatus> {
        let segment = self.segment;
        let index = segment.index();
        let started = Instant::now();
        let state = &mut *self.state;
        let memory = state.memory.as_mut();
        let buckets = &mut state.buckets;

        buckets.clear();
        segment.crawled.store(false, Ordering::Relaxed);
        state.layout_epoch = super::next_layout_epoch();
        let mut status = CrawlStatus {
            segments: 1,
            ..CrawlStatus::default()
        };
        let mut free_run: Option<(usize, usize)> = None;
        let mut address = 0;

        while address < memory.len() {
            let header = checked_header(memory, index, address)?;

            if header.flag == ChunkFlag::Used {
                if let Some((start, size)) = free_run.take() {
                    close_free_run(memory, buckets, &mut status, start, size);
                }
                match SerializerTag::from_byte(header.tag) {
                    Some(SerializerTag::Link) => status.link_count += 1,
                    Some(_) => status.object_count += 1,
                    None => {
                        return Err(PileError::corruption(
                            index,
                            address,
                            format!("unknown serializer tag {}", header.tag),
                        ))
                    }
                }
                status.chunks += 1;
                status.used_chunks += 1;
                status.used_payload_bytes += header.payload_size as u64;
            } else {
                free_run = match free_run {
                    Some((start, size)) => {
                        status.merged_chunks += 1;
                        Some((start, size + header.chunk_size()))
                    }
                    None => Some((address, header.payload_size)),
                };
            }

            address += header.chunk_size();
        }
        if let Some((start, size)) = free_run {
            close_free_run(memory, buckets, &mut status, start, size);
        }

        segment
            .used_bytes
            .store(status.used_payload_bytes, Ordering::Relaxed);
        segment.object_count.store(status.object_count, Ordering::Relaxed);
        segment.link_count.store(status.link_count, Ordering::Relaxed);
        segment.crawled.store(true, Ordering::Relaxed);
        state.last_crawl = Instant::now();
        state.used_bytes_at_last_crawl = status.used_payload_bytes;

        tracing::debug!(
            segment = index,
            chunks = status.chunks,
            merged = status.merged_chunks,
            free = status.free_chunks,
            elapsed_us = started.elapsed().as_micros() as u64,
            "crawled segment"
        );
        Ok(status)
    }
}

fn close_free_run(
    memory: &mut dyn Memory,
    buckets: &mut FreeBuckets,
    status: &mut CrawlStatus,
    start: usize,
    payload_size: usize,
) {
    write_free_header(memory, start, payload_size);
    if buckets.push(start, payload_size + CHUNK_HDR_SZ) {
        status.tracked_free_chunks += 1;
    }
    status.chunks += 1;
    status.free_chunks += 1;
    status.free_payload_bytes += payload_size as u64;
}
