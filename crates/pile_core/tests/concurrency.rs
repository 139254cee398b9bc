//! Multi-threaded put/get/delete over one pile.

use pile_core::{
    AllocationMode, CborCodec, Pile, PileConfig, PileError, PilePointer, PileValue, PutBuffer,
    MIN_SEGMENT_SIZE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type TestPile = Pile<CborCodec<Vec<u64>>>;

fn shared(mode: AllocationMode) -> Arc<TestPile> {
    let config = PileConfig::new()
        .segment_size(MIN_SEGMENT_SIZE)
        .allocation_mode(mode)
        .crawl_interval(Duration::from_millis(50));
    Arc::new(Pile::open(config, CborCodec::new()).unwrap())
}

fn value(seed: u64) -> PileValue<Vec<u64>> {
    let len = (seed % 64) as usize + 1;
    PileValue::Object((0..len as u64).map(|i| seed ^ i).collect())
}

fn churn(pile: &TestPile, seed: u64, rounds: usize) -> Vec<(PilePointer, u64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buffer = PutBuffer::new();
    let mut live: Vec<(PilePointer, u64)> = Vec::new();

    for _ in 0..rounds {
        match rng.gen_range(0..10) {
            0..=4 => {
                let key = rng.gen();
                let p = pile.put_with(&value(key), &mut buffer, 0).unwrap();
                live.push((p, key));
            }
            5..=7 if !live.is_empty() => {
                let (p, key) = live[rng.gen_range(0..live.len())];
                assert_eq!(pile.get(p).unwrap(), value(key));
            }
            8 if !live.is_empty() => {
                let (p, _) = live.swap_remove(rng.gen_range(0..live.len()));
                assert!(pile.delete(p, true).unwrap());
            }
            9 if !live.is_empty() => {
                let i = rng.gen_range(0..live.len());
                let key = rng.gen();
                assert!(pile.put_at(live[i].0, &value(key), true).unwrap());
                live[i].1 = key;
            }
            _ => {}
        }
    }
    live
}

fn run_workers(pile: &Arc<TestPile>, threads: u64, rounds: usize) -> Vec<(PilePointer, u64)> {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pile = Arc::clone(pile);
            thread::spawn(move || churn(&pile, t, rounds))
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect()
}

#[test]
fn concurrent_churn_favor_speed() {
    let pile = shared(AllocationMode::FavorSpeed);
    let live = run_workers(&pile, 8, 3000);

    for (p, key) in &live {
        assert_eq!(pile.get(*p).unwrap(), value(*key));
    }

    let status = pile.crawl(true).unwrap();
    let stats = pile.stats();
    assert_eq!(stats.object_count, status.object_count);
    assert_eq!(
        status.object_count + status.link_count,
        pile.entries().count() as u64
    );

    let live_size: u64 = live
        .iter()
        .map(|(p, _)| pile.size_of(*p).unwrap() as u64)
        .sum();
    assert!(status.used_payload_bytes >= live_size);
}

#[test]
fn concurrent_churn_reuse_space() {
    let pile = shared(AllocationMode::ReuseSpace);
    let live = run_workers(&pile, 4, 2000);

    for (p, key) in &live {
        assert_eq!(pile.get(*p).unwrap(), value(*key));
    }
    pile.crawl(false).unwrap();
}

#[test]
fn concurrent_growth_appends_only_needed_segments() {
    // 96 buffers of 4 MiB fill exactly 7 segments of 64 MiB when every
    // segment is used up before the next one is added
    let config = PileConfig::new()
        .segment_size(MIN_SEGMENT_SIZE)
        .max_segment_count(7);
    let pile: Arc<Pile<CborCodec<()>>> = Arc::new(Pile::open(config, CborCodec::new()).unwrap());
    let buffer = Arc::new(PileValue::<()>::Buffer(vec![0xAB; 4 * 1024 * 1024]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pile = Arc::clone(&pile);
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                (0..12)
                    .map(|_| pile.put(&buffer))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    let pointers: Vec<PilePointer> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(pointers.len(), 96);
    assert_eq!(pile.segment_count(), 7);
    assert_eq!(pile.stats().segments_added, 7);
    assert_eq!(pile.stats().object_count, 96);
}

#[test]
fn readers_follow_links_while_writers_run() {
    let pile = shared(AllocationMode::FavorSpeed);
    let p = pile.put(&PileValue::Object(vec![0; 4])).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let pile = Arc::clone(&pile);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reads = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let PileValue::Object(v) = pile.get(p).unwrap() else {
                        panic!("expected an object");
                    };
                    assert!(v.iter().all(|&x| x == v[0]));
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for round in 1..200u64 {
        let len = (round % 50 + 1) as usize;
        assert!(pile
            .put_at(p, &PileValue::Object(vec![round; len]), true)
            .unwrap());
    }
    stop.store(true, Ordering::Relaxed);

    let reads: u64 = readers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(reads > 0);
}

#[test]
fn close_stops_workers() {
    let pile = shared(AllocationMode::FavorSpeed);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pile = Arc::clone(&pile);
            thread::spawn(move || loop {
                match pile.put(&"spin".into()) {
                    Ok(_) => {}
                    Err(PileError::NotRunning) => return,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    pile.close().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(!pile.is_running());
}
