//! Compact command implementation.

use super::{format_size, open_pile};
use pile_core::SegmentStats;
use std::path::Path;

/// Compaction result.
#[derive(Debug)]
pub struct CompactResult {
    /// Segments before compaction.
    pub segments_before: usize,
    /// Segments retired (or that would be, on a dry run).
    pub segments_removed: usize,
    /// Bytes released by the retired segments.
    pub bytes_reclaimed: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let result = compact(path, dry_run)?;

    if dry_run {
        println!("Dry run: no files were changed");
    }
    println!("Segments before:  {}", result.segments_before);
    println!("Segments removed: {}", result.segments_removed);
    println!("Reclaimed:        {}", format_size(result.bytes_reclaimed));
    Ok(())
}

fn is_empty(segment: &SegmentStats) -> bool {
    segment.object_count == 0 && segment.link_count == 0
}

fn compact(path: &Path, dry_run: bool) -> Result<CompactResult, Box<dyn std::error::Error>> {
    let pile = open_pile(path, true)?;
    let stats = pile.stats();
    let empty: Vec<&SegmentStats> = stats.segments.iter().filter(|s| is_empty(s)).collect();

    let segments_removed = if dry_run {
        empty.len()
    } else {
        pile.compact()?
    };
    let bytes_reclaimed = if dry_run {
        empty.iter().map(|s| s.size).sum()
    } else {
        stats.allocated_bytes - pile.stats().allocated_bytes
    };
    pile.close()?;

    tracing::debug!(segments_removed, bytes_reclaimed, dry_run, "compaction finished");
    Ok(CompactResult {
        segments_before: stats.segment_count,
        segments_removed,
        bytes_reclaimed,
    })
}
