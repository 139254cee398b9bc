//! Size-classed free-chunk buckets.

use super::chunk::read_payload_size;
use crate::config::FREE_BUCKET_COUNT;
use pile_storage::Memory;

/// The 16 free-chunk stacks of one segment.
///
/// Bucket `i` holds chunks whose total size (header included) is at least
/// `thresholds[i]` and below `thresholds[i + 1]`; the last bucket holds
/// everything at or above the last threshold. Each stack is a bounded LIFO
/// of chunk addresses.
#[derive(Debug)]
pub(crate) struct FreeBuckets {
    thresholds: [usize; FREE_BUCKET_COUNT],
    capacity: usize,
    stacks: [Vec<u32>; FREE_BUCKET_COUNT],
}

const LAST: usize = FREE_BUCKET_COUNT - 1;

impl FreeBuckets {
    pub fn new(thresholds: [usize; FREE_BUCKET_COUNT], capacity: usize) -> Self {
        Self {
            thresholds,
            capacity,
            stacks: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Smallest threshold; free remainders below it are not worth keeping.
    pub fn min_chunk_size(&self) -> usize {
        self.thresholds[0]
    }

    /// Largest threshold; bigger requests take the linear path.
    pub fn max_chunk_size(&self) -> usize {
        self.thresholds[LAST]
    }

    /// Highest bucket whose threshold is <= `chunk_size`.
    pub fn bucket_for(&self, chunk_size: usize) -> Option<usize> {
        self.thresholds.iter().rposition(|&t| t <= chunk_size)
    }

    /// Tracks a free chunk. Returns false when the chunk is too small or its
    /// bucket is full; the chunk then waits for the next crawl.
    pub fn push(&mut self, address: usize, chunk_size: usize) -> bool {
        let Some(bucket) = self.bucket_for(chunk_size) else {
            return false;
        };
        let stack = &mut self.stacks[bucket];
        if stack.len() >= self.capacity {
            return false;
        }
        stack.push(address as u32);
        true
    }

    /// Pops the most recently freed chunk from the first non-empty bucket
    /// guaranteed to hold `alloc_size` bytes.
    pub fn pop_fitting(&mut self, alloc_size: usize) -> Option<usize> {
        (0..FREE_BUCKET_COUNT)
            .filter(|&i| self.thresholds[i] >= alloc_size)
            .find_map(|i| self.stacks[i].pop())
            .map(|a| a as usize)
    }

    /// First fit from the top of the last bucket for payloads of `size`.
    ///
    /// The chosen entry is removed and the remaining entries keep their
    /// order.
    pub fn take_large(&mut self, memory: &dyn Memory, size: usize) -> Option<usize> {
        let stack = &mut self.stacks[LAST];
        let position = stack
            .iter()
            .rposition(|&a| read_payload_size(memory, a as usize) >= size)?;
        Some(stack.remove(position) as usize)
    }

    /// Forgets every tracked chunk.
    pub fn clear(&mut self) {
        for stack in &mut self.stacks {
            stack.clear();
        }
    }

    /// Number of tracked chunks across all buckets.
    pub fn tracked(&self) -> usize {
        self.stacks.iter().map(Vec::len).sum()
    }

    /// Number of tracked chunks in one bucket.
    #[cfg(test)]
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.stacks[bucket].len()
    }

    /// Addresses tracked in one bucket, bottom of the stack first.
    #[cfg(test)]
    pub fn bucket_addresses(&self, bucket: usize) -> Vec<usize> {
        self.stacks[bucket].iter().map(|&a| a as usize).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FREE_CHUNK_SIZES;
    use crate::segment::chunk::write_free_header;
    use pile_storage::LocalMemory;

    fn buckets(capacity: usize) -> FreeBuckets {
        FreeBuckets::new(DEFAULT_FREE_CHUNK_SIZES, capacity)
    }

    #[test]
    fn bucket_selection() {
        let b = buckets(16);
        assert_eq!(b.bucket_for(63), None);
        assert_eq!(b.bucket_for(64), Some(0));
        assert_eq!(b.bucket_for(127), Some(0));
        assert_eq!(b.bucket_for(128), Some(1));
        assert_eq!(b.bucket_for(65536), Some(15));
        assert_eq!(b.bucket_for(10 << 20), Some(15));
    }

    #[test]
    fn push_respects_capacity_and_minimum() {
        let mut b = buckets(2);
        assert!(!b.push(0, 32));
        assert!(b.push(0, 64));
        assert!(b.push(64, 100));
        assert!(!b.push(128, 64));
        assert_eq!(b.bucket_len(0), 2);
        assert_eq!(b.tracked(), 2);
    }

    #[test]
    fn pop_is_lifo_from_first_fitting_bucket() {
        let mut b = buckets(16);
        b.push(0, 64);
        b.push(64, 64);
        b.push(1024, 256);

        // 64-byte chunks cannot be trusted to hold 100 bytes
        assert_eq!(b.pop_fitting(100), Some(1024));
        assert_eq!(b.pop_fitting(64), Some(64));
        assert_eq!(b.pop_fitting(64), Some(0));
        assert_eq!(b.pop_fitting(64), None);
    }

    #[test]
    fn take_large_is_first_fit_from_top() {
        let mut memory = LocalMemory::new(1 << 20);
        let mut b = buckets(16);
        // Stack bottom..top: 200K, 70K, 300K, 80K (payload sizes)
        let chunks = [(0, 200_000), (262_144, 70_000), (393_216, 300_000), (786_432, 80_000)];
        for &(addr, size) in &chunks {
            write_free_header(&mut memory, addr, size);
            b.push(addr, size + 8);
        }

        // 75_000 skips nothing on top: 80K fits
        assert_eq!(b.take_large(&memory, 75_000), Some(786_432));
        // 250_000: 300K is the first fit scanning down
        assert_eq!(b.take_large(&memory, 250_000), Some(393_216));
        assert_eq!(b.bucket_addresses(15), vec![0, 262_144]);
        assert_eq!(b.take_large(&memory, 500_000), None);
        assert_eq!(b.bucket_len(15), 2);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut b = buckets(16);
        b.push(0, 64);
        b.push(64, 70_000);
        b.clear();
        assert_eq!(b.tracked(), 0);
    }
}
