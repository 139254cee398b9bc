//! Verify command implementation.

use super::open_pile;
use pile_core::{CrawlStatus, PileError, SerializerTag, ValuePile};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Crawl summary, absent if the crawl hit corruption.
    pub crawl: Option<CrawlStatus>,
    /// Number of chunks read back.
    pub chunks_checked: usize,
    /// Number of chunks that decoded cleanly.
    pub valid_chunks: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.crawl.is_some() && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying pile at {}", path.display());
    println!();

    let pile = open_pile(path, false)?;
    let result = verify(&pile);
    pile.close()?;

    if let Some(crawl) = &result.crawl {
        println!(
            "  Crawl: {} segments, {} chunks, {} used, {} free, {} merged",
            crawl.segments, crawl.chunks, crawl.used_chunks, crawl.free_chunks, crawl.merged_chunks
        );
    }
    println!(
        "  Chunks checked: {}, valid: {}",
        result.chunks_checked, result.valid_chunks
    );
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Pile verification passed");
        Ok(())
    } else {
        println!("✗ Pile verification failed");
        Err("Verification failed".into())
    }
}

fn verify(pile: &ValuePile) -> VerifyResult {
    let mut result = VerifyResult::default();

    match pile.crawl(false) {
        Ok(status) => result.crawl = Some(status),
        Err(err) => {
            // Chunk boundaries past a corrupt header are unknown
            result.errors.push(err.to_string());
            return result;
        }
    }

    for entry in pile.entries() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                result.errors.push(err.to_string());
                break;
            }
        };
        result.chunks_checked += 1;

        let checked = match entry.tag {
            SerializerTag::Generic | SerializerTag::Link => pile.get(entry.pointer).map(drop),
            _ => pile.get_raw_buffer(entry.pointer).map(drop),
        };
        match checked {
            Ok(()) => result.valid_chunks += 1,
            Err(err @ (PileError::Corruption { .. } | PileError::Codec { .. })) => {
                result.errors.push(format!("{}: {err}", entry.pointer));
            }
            Err(err) => result
                .errors
                .push(format!("{}: unreadable: {err}", entry.pointer)),
        }
    }
    result
}
