//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use pile_core::{CborCodec, Pile, PileConfig, PileResult, ValuePile};
use std::path::Path;

/// Opens an existing data directory. Segment sizes come from the files.
pub(crate) fn open_pile(path: &Path, crawl_on_open: bool) -> PileResult<ValuePile> {
    let config = PileConfig::new()
        .data_dir(path)
        .create_if_missing(false)
        .crawl_on_open(crawl_on_open);
    Pile::open(config, CborCodec::new())
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
