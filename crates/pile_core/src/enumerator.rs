//! Streaming enumeration of live chunks.
//!
//! The enumerator walks raw chunk headers segment by segment. Each refill
//! takes a segment's read lock, collects up to [`BATCH_SIZE`] entries from
//! the last recorded offset, and releases the lock again, so writers are
//! never blocked for a whole segment scan.
//!
//! Enumeration is not a snapshot: chunks written or freed between refills
//! may or may not be seen. A crawl between refills can merge away the chunk
//! boundary the scan stopped at; the next refill then resumes at the first
//! boundary at or after the recorded offset.

use crate::codec::Codec;
use crate::error::{PileError, PileResult};
use crate::pile::Pile;
use crate::segment::checked_header;
use crate::types::{PilePointer, SerializerTag};
use pile_storage::{ChunkFlag, Memory};
use std::collections::VecDeque;

/// Maximum entries collected per read-locked pass.
const BATCH_SIZE: usize = 1024;

/// One live chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PileEntry {
    /// Pointer to the chunk.
    pub pointer: PilePointer,
    /// Kind of payload; links are reported as [`SerializerTag::Link`].
    pub tag: SerializerTag,
    /// Payload size in bytes.
    pub size: usize,
}

/// Iterator over every USED chunk of a pile.
///
/// A corrupt header is yielded as an error, after which the enumerator is
/// exhausted.
///
/// # Example
///
/// ```ignore
/// for entry in pile.entries() {
///     let entry = entry?;
///     println!("{} {} {}", entry.pointer, entry.tag, entry.size);
/// }
/// ```
pub struct PileEnumerator<'a, C: Codec> {
    pile: &'a Pile<C>,
    segment: usize,
    address: usize,
    /// Layout epoch `address` was recorded under.
    epoch: u64,
    buffer: VecDeque<PileEntry>,
    finished: bool,
}

impl<'a, C: Codec> PileEnumerator<'a, C> {
    pub(crate) fn new(pile: &'a Pile<C>) -> Self {
        Self {
            pile,
            segment: 0,
            address: 0,
            epoch: 0,
            buffer: VecDeque::with_capacity(BATCH_SIZE),
            finished: false,
        }
    }

    /// Restarts enumeration from the first segment.
    pub fn reset(&mut self) {
        self.segment = 0;
        self.address = 0;
        self.epoch = 0;
        self.buffer.clear();
        self.finished = false;
    }

    fn next_segment(&mut self) {
        self.segment += 1;
        self.address = 0;
    }

    /// Collects the next batch of entries.
    fn fill(&mut self) -> PileResult<()> {
        let pile = self.pile;
        let list = pile.segment_list();

        while self.buffer.is_empty() {
            let Some(slot) = list.get(self.segment) else {
                self.finished = true;
                return Ok(());
            };
            let Some(segment) = slot.as_ref().filter(|s| !s.is_deleted()) else {
                self.next_segment();
                continue;
            };

            let reader = segment
                .read(|| !pile.is_running())
                .ok_or(PileError::NotRunning)?;
            let memory = reader.memory();
            let index = reader.segment().index();
            if self.address > 0 && reader.layout_epoch() != self.epoch {
                self.address = next_boundary(memory, index, self.address)?;
            }
            self.epoch = reader.layout_epoch();

            // A segment retired after the list was loaded has no memory left
            while self.address < memory.len() && self.buffer.len() < BATCH_SIZE {
                let header = checked_header(memory, index, self.address)?;
                if header.flag == ChunkFlag::Used {
                    let tag = SerializerTag::from_byte(header.tag).ok_or_else(|| {
                        PileError::corruption(
                            index,
                            self.address,
                            format!("unknown serializer tag {}", header.tag),
                        )
                    })?;
                    self.buffer.push_back(PileEntry {
                        pointer: PilePointer::new(index as i32, self.address as i32),
                        tag,
                        size: header.payload_size,
                    });
                }
                self.address += header.chunk_size();
            }

            if self.address >= memory.len() {
                self.next_segment();
            }
        }
        Ok(())
    }
}

/// First chunk address at or after `from`, walking from the segment start.
fn next_boundary(memory: &dyn Memory, segment: usize, from: usize) -> PileResult<usize> {
    let mut address = 0;
    while address < from && address < memory.len() {
        address += checked_header(memory, segment, address)?.chunk_size();
    }
    Ok(address)
}

impl<C: Codec> Iterator for PileEnumerator<'_, C> {
    type Item = PileResult<PileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.buffer.pop_front() {
            return Some(Ok(entry));
        }
        if self.finished {
            return None;
        }
        match self.fill() {
            Ok(()) => self.buffer.pop_front().map(Ok),
            Err(err) => {
                self.finished = true;
                self.buffer.clear();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CborCodec;
    use crate::config::{PileConfig, MIN_SEGMENT_SIZE};
    use crate::types::PileValue;

    fn pile() -> Pile<CborCodec<u32>> {
        Pile::open(
            PileConfig::new().segment_size(MIN_SEGMENT_SIZE),
            CborCodec::new(),
        )
        .unwrap()
    }

    #[test]
    fn empty_pile() {
        let pile = pile();
        assert_eq!(pile.entries().count(), 0);
    }

    #[test]
    fn yields_every_live_chunk_in_address_order() {
        let pile = pile();
        let pointers: Vec<_> = (0..3000u32)
            .map(|i| pile.put(&PileValue::Object(i)).unwrap())
            .collect();
        pile.delete(pointers[10], true).unwrap();

        let entries: Vec<PileEntry> = pile.entries().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2999);
        assert!(entries.windows(2).all(|w| w[0].pointer < w[1].pointer));
        assert!(entries.iter().all(|e| e.tag == SerializerTag::Generic));
        assert!(!entries.iter().any(|e| e.pointer == pointers[10]));
    }

    #[test]
    fn links_are_reported() {
        let pile = pile();
        let p = pile.put(&"0123456789abcdef".into()).unwrap();
        assert!(pile.put_at(p, &"x".repeat(1000).into(), true).unwrap());

        let entries: Vec<PileEntry> = pile.entries().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pointer, p);
        assert_eq!(entries[0].tag, SerializerTag::Link);
        assert_eq!(entries[1].tag, SerializerTag::Utf8);
        assert_eq!(entries[1].size, 1008);
    }

    #[test]
    fn resumes_after_crawl_merges_the_recorded_offset() {
        let pile = pile();
        // 4 + 20 bytes of text: 32-byte chunks
        let pointers: Vec<_> = (0..1100)
            .map(|i| pile.put(&format!("{i:020}").into()).unwrap())
            .collect();

        let mut entries = pile.entries();
        assert!(entries.next().unwrap().is_ok());
        // The first batch ends at chunk 1024, offset 32768

        for p in &pointers[1012..1037] {
            pile.delete(*p, true).unwrap();
        }
        pile.crawl(false).unwrap();
        // Covers the merged run from 32384 past 32768
        let filler = pile.put(&"f".repeat(756).into()).unwrap();
        assert_eq!(filler, pointers[1012]);

        let rest: Vec<PileEntry> = entries.map(Result::unwrap).collect();
        assert_eq!(rest.len(), 1023 + 63);
        assert_eq!(rest[1023].pointer, pointers[1037]);
        assert_eq!(rest.last().unwrap().pointer, pointers[1099]);
    }

    #[test]
    fn reset_restarts() {
        let pile = pile();
        for i in 0..5 {
            pile.put(&PileValue::Object(i)).unwrap();
        }
        let mut entries = pile.entries();
        assert_eq!(entries.by_ref().take(3).count(), 3);
        entries.reset();
        assert_eq!(entries.count(), 5);
    }
}
