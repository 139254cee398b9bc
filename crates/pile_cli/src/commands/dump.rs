//! Dump command implementation.

use super::open_pile;
use pile_core::{PileEntry, PileResult, PileValue, SerializerTag, ValuePile};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

const PREVIEW_CHARS: usize = 48;
const PREVIEW_BYTES: usize = 16;

/// A dumped chunk.
#[derive(Debug, Serialize)]
pub struct DumpRecord {
    /// Pointer in `node:segment:address` form.
    pub pointer: String,
    /// Payload kind of the chunk itself.
    pub tag: SerializerTag,
    /// Payload size in bytes.
    pub size: usize,
    /// Short rendering of the value, following links.
    pub preview: String,
}

/// Runs the dump command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let pile = open_pile(path, true)?;
    let records = dump(&pile, limit)?;
    pile.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            for record in &records {
                println!(
                    "{:>16}  {:<7} {:>10}  {}",
                    record.pointer, record.tag, record.size, record.preview
                );
            }
            println!();
            println!("{} chunks", records.len());
        }
    }
    Ok(())
}

fn dump(pile: &ValuePile, limit: Option<usize>) -> PileResult<Vec<DumpRecord>> {
    pile.entries()
        .take(limit.unwrap_or(usize::MAX))
        .map(|entry| entry.and_then(|entry| record(pile, entry)))
        .collect()
}

fn record(pile: &ValuePile, entry: PileEntry) -> PileResult<DumpRecord> {
    let value = pile.get(entry.pointer)?;
    let preview = match &value {
        PileValue::Text(text) => truncate(text),
        PileValue::Buffer(bytes) => hex_preview(bytes),
        PileValue::Object(object) => truncate(&format!("{object:?}")),
    };
    let preview = if entry.tag == SerializerTag::Link {
        format!("-> {preview}")
    } else {
        preview
    };

    Ok(DumpRecord {
        pointer: entry.pointer.to_string(),
        tag: entry.tag,
        size: entry.size,
        preview,
    })
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{:?}...", &text[..end]),
        None => format!("{text:?}"),
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 16);
    for b in bytes.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{b:02x}");
    }
    if bytes.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    let _ = write!(out, " ({} bytes)", bytes.len());
    out
}
