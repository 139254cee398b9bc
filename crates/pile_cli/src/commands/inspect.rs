//! Inspect command implementation.

use super::{format_size, open_pile};
use pile_core::{PileStats, SegmentStats};
use serde::Serialize;
use std::path::Path;

/// Pile inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Statistics gathered after the opening crawl.
    pub stats: PileStats,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_segments: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_segments)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result, show_segments),
    }
    Ok(())
}

fn inspect(path: &Path, show_segments: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let pile = open_pile(path, true)?;
    let mut stats = pile.stats();
    if !show_segments {
        stats.segments.clear();
    }
    pile.close()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        stats,
    })
}

fn print_text_output(result: &InspectResult, show_segments: bool) {
    let stats = &result.stats;
    println!("Pile Inspection");
    println!("===============");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Segments:   {}", stats.segment_count);
    println!("  Allocated:  {}", format_size(stats.allocated_bytes));
    println!("  Utilized:   {}", format_size(stats.utilized_bytes));
    println!("  Overhead:   {}", format_size(stats.overhead_bytes));
    println!();
    println!("Chunks:");
    println!("  Objects: {}", stats.object_count);
    println!("  Links:   {}", stats.link_count);

    if show_segments {
        println!();
        println!("Segments:");
        for segment in &stats.segments {
            print_segment(segment);
        }
    }
}

fn print_segment(segment: &SegmentStats) {
    println!(
        "  [{}] {} used, {} free of {}, {} objects, {} links",
        segment.index,
        format_size(segment.used_bytes),
        format_size(segment.free_bytes),
        format_size(segment.size),
        segment.object_count,
        segment.link_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pile_core::{CborCodec, Pile, PileConfig, PileValue, MIN_SEGMENT_SIZE};
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_crawled_counts() {
        let temp = tempdir().unwrap();
        {
            let pile: pile_core::ValuePile = Pile::open(
                PileConfig::new()
                    .segment_size(MIN_SEGMENT_SIZE)
                    .data_dir(temp.path()),
                CborCodec::new(),
            )
            .unwrap();
            pile.put(&"one".into()).unwrap();
            pile.put(&PileValue::Object(ciborium::Value::Integer(2.into())))
                .unwrap();
        }

        let result = inspect(temp.path(), true).unwrap();
        assert_eq!(result.stats.segment_count, 1);
        assert_eq!(result.stats.object_count, 2);
        assert_eq!(result.stats.segments.len(), 1);
        assert_eq!(result.stats.segments[0].size, MIN_SEGMENT_SIZE as u64);

        let brief = inspect(temp.path(), false).unwrap();
        assert!(brief.stats.segments.is_empty());
        let json = serde_json::to_value(&brief).unwrap();
        assert_eq!(json["stats"]["object_count"], 2);
    }
}
