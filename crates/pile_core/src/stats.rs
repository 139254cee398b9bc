//! Pile statistics.
//!
//! Operation counters are relaxed atomics bumped on the hot paths; segment
//! figures are read from each segment's own atomics when a snapshot is taken,
//! so a snapshot taken during concurrent writes is approximate.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = pile.stats();
//! println!("objects: {}", stats.object_count);
//! println!("utilized: {} of {} bytes", stats.utilized_bytes, stats.allocated_bytes);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of one pile.
#[derive(Debug, Default)]
pub(crate) struct PileCounters {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    in_place_updates: AtomicU64,
    links_created: AtomicU64,
    crawls: AtomicU64,
    segments_added: AtomicU64,
    segments_removed: AtomicU64,
}

impl PileCounters {
    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_in_place_update(&self) {
        self.in_place_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link(&self) {
        self.links_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_crawl(&self) {
        self.crawls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_added(&self) {
        self.segments_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_removed(&self) {
        self.segments_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`.
    pub(crate) fn fill(&self, stats: &mut PileStats) {
        stats.puts = self.puts.load(Ordering::Relaxed);
        stats.gets = self.gets.load(Ordering::Relaxed);
        stats.deletes = self.deletes.load(Ordering::Relaxed);
        stats.in_place_updates = self.in_place_updates.load(Ordering::Relaxed);
        stats.links_created = self.links_created.load(Ordering::Relaxed);
        stats.crawls = self.crawls.load(Ordering::Relaxed);
        stats.segments_added = self.segments_added.load(Ordering::Relaxed);
        stats.segments_removed = self.segments_removed.load(Ordering::Relaxed);
    }
}

/// Figures for one live segment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SegmentStats {
    /// Index in the segment list.
    pub index: usize,
    /// Region size in bytes.
    pub size: u64,
    /// Payload bytes of USED chunks.
    pub used_bytes: u64,
    /// Estimate of unallocated bytes.
    pub free_bytes: u64,
    /// Live values.
    pub object_count: u64,
    /// Live links.
    pub link_count: u64,
    /// Whether the segment has been crawled since it was mounted.
    pub crawled: bool,
}

/// A point-in-time snapshot of pile statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PileStats {
    /// Live segments.
    pub segment_count: usize,
    /// Live values across all segments.
    pub object_count: u64,
    /// Live links across all segments.
    pub link_count: u64,
    /// Payload bytes of USED chunks.
    pub utilized_bytes: u64,
    /// Header bytes of USED chunks.
    pub overhead_bytes: u64,
    /// Total segment memory.
    pub allocated_bytes: u64,

    /// Successful puts.
    pub puts: u64,
    /// Successful gets.
    pub gets: u64,
    /// Deletes that freed a chunk.
    pub deletes: u64,
    /// Updates that rewrote a chunk in place.
    pub in_place_updates: u64,
    /// Updates that turned a chunk into a link.
    pub links_created: u64,
    /// Segment crawls.
    pub crawls: u64,
    /// Segments created.
    pub segments_added: u64,
    /// Segments retired or purged.
    pub segments_removed: u64,

    /// Per-segment figures, ordered by index.
    pub segments: Vec<SegmentStats>,
}

impl PileStats {
    /// Adds one segment's figures to the totals.
    pub(crate) fn add_segment(&mut self, segment: SegmentStats) {
        self.segment_count += 1;
        self.object_count += segment.object_count;
        self.link_count += segment.link_count;
        self.utilized_bytes += segment.used_bytes;
        self.overhead_bytes += (segment.object_count + segment.link_count) * 8;
        self.allocated_bytes += segment.size;
        self.segments.push(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = PileCounters::default();
        let mut stats = PileStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats, PileStats::default());
    }

    #[test]
    fn counters_fill_snapshot() {
        let counters = PileCounters::default();
        counters.record_put();
        counters.record_put();
        counters.record_get();
        counters.record_delete();
        counters.record_link();
        counters.record_segment_added();

        let mut stats = PileStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.links_created, 1);
        assert_eq!(stats.segments_added, 1);
        assert_eq!(stats.crawls, 0);
    }

    #[test]
    fn segment_totals() {
        let mut stats = PileStats::default();
        stats.add_segment(SegmentStats {
            index: 0,
            size: 1024,
            used_bytes: 100,
            object_count: 3,
            link_count: 1,
            ..SegmentStats::default()
        });
        stats.add_segment(SegmentStats {
            index: 2,
            size: 1024,
            used_bytes: 50,
            object_count: 1,
            ..SegmentStats::default()
        });

        assert_eq!(stats.segment_count, 2);
        assert_eq!(stats.object_count, 4);
        assert_eq!(stats.link_count, 1);
        assert_eq!(stats.utilized_bytes, 150);
        assert_eq!(stats.overhead_bytes, 40);
        assert_eq!(stats.allocated_bytes, 2048);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(PileCounters::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..100 {
                        c.record_put();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut stats = PileStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats.puts, 800);
    }
}
