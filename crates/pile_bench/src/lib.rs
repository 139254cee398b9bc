//! Benchmark utilities.

use pile_core::{CborCodec, Pile, PileConfig, PilePointer, MIN_SEGMENT_SIZE};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pile of plain strings and buffers.
pub type BenchPile = Pile<CborCodec<String>>;

/// Seeded generator so runs are comparable.
pub fn rng() -> StdRng {
    StdRng::seed_from_u64(0xBE7C)
}

/// Generate random bytes of the specified size.
pub fn random_data(rng: &mut StdRng, size: usize) -> Vec<u8> {
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random alphanumeric string of the specified length.
pub fn random_text(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Opens an in-memory pile with the smallest segments.
pub fn small_pile() -> BenchPile {
    let config = PileConfig::new().segment_size(MIN_SEGMENT_SIZE);
    Pile::open(config, CborCodec::new()).expect("pile opens")
}

/// Fills a pile with `count` strings of 16..2000 characters.
pub fn populate(pile: &BenchPile, count: usize) -> Vec<PilePointer> {
    let mut rng = rng();
    (0..count)
        .map(|_| {
            let len = rng.gen_range(16..2000);
            pile.put(&random_text(&mut rng, len).into())
                .expect("put succeeds")
        })
        .collect()
}
