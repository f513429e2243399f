//! Lock-free address cache
//!
//! A fixed-size bloom filter over IPv4 addresses backing the hot-path
//! whitelist and block checks. Writers publish bits with atomic OR; readers
//! never lock. Removal is not supported: a stale positive falls through to
//! the authoritative table, a missing bit would let blocked traffic pass.
//! The engine rebuilds the filter from authoritative state on the cleanup
//! tick when it gets too full.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Filter size in bits.
const BLOOM_BITS: usize = 8192;
const BLOOM_WORDS: usize = BLOOM_BITS / 64;
/// Probes per key.
const NUM_HASHES: u32 = 3;

/// splitmix64 finalizer. One multiply-shift chain gives a well-mixed 64-bit
/// value; the three probe positions are rotations of it.
#[inline]
fn mix(addr: u32) -> u64 {
    let mut x = addr as u64;
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Lock-free bloom filter over IPv4 addresses.
pub struct AtomicBloom {
    words: [AtomicU64; BLOOM_WORDS],
}

impl Default for AtomicBloom {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicBloom {
    pub fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[inline]
    fn positions(addr: Ipv4Addr) -> [usize; NUM_HASHES as usize] {
        let h = mix(u32::from(addr));
        std::array::from_fn(|i| (h.rotate_right(i as u32 * 21) as usize) % BLOOM_BITS)
    }

    /// Insert an address. Never fails, never blocks.
    pub fn add(&self, addr: Ipv4Addr) {
        for pos in Self::positions(addr) {
            self.words[pos / 64].fetch_or(1u64 << (pos % 64), Ordering::Relaxed);
        }
    }

    /// Probabilistic membership test: false positives possible, false
    /// negatives not.
    #[inline]
    pub fn may_contain(&self, addr: Ipv4Addr) -> bool {
        Self::positions(addr)
            .iter()
            .all(|&pos| self.words[pos / 64].load(Ordering::Relaxed) & (1u64 << (pos % 64)) != 0)
    }

    /// Fraction of bits set. Drives the rebuild decision.
    pub fn fill_ratio(&self) -> f64 {
        let set: u32 = self
            .words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones())
            .sum();
        set as f64 / BLOOM_BITS as f64
    }

    /// Reset every bit. Only used on the standby half of a
    /// [`RebuildableBloom`]; a filter readers are probing is never cleared.
    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
    }
}

/// Double-buffered filter pair whose rebuilds never expose a torn filter.
///
/// Readers probe only the active half. Inserts land in both halves, so the
/// standby keeps every address added while a rebuild is in flight. A rebuild
/// clears the standby, refills it from authoritative state, and swaps it in
/// with a release store: a concurrent reader sees a complete old filter or a
/// complete new one, never a partially cleared one.
pub struct RebuildableBloom {
    filters: [AtomicBloom; 2],
    active: AtomicUsize,
}

impl Default for RebuildableBloom {
    fn default() -> Self {
        Self::new()
    }
}

impl RebuildableBloom {
    pub fn new() -> Self {
        Self {
            filters: [AtomicBloom::new(), AtomicBloom::new()],
            active: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, addr: Ipv4Addr) {
        self.filters[0].add(addr);
        self.filters[1].add(addr);
    }

    #[inline]
    pub fn may_contain(&self, addr: Ipv4Addr) -> bool {
        self.filters[self.active.load(Ordering::Acquire)].may_contain(addr)
    }

    /// Fill ratio of the filter readers are currently probing.
    pub fn fill_ratio(&self) -> f64 {
        self.filters[self.active.load(Ordering::Acquire)].fill_ratio()
    }

    /// Rebuild off to the side and swap. `refill` re-adds the authoritative
    /// set into the standby filter; addresses added concurrently through
    /// `add` are already there.
    pub fn rebuild(&self, refill: impl FnOnce(&AtomicBloom)) {
        let standby = 1 - self.active.load(Ordering::Acquire);
        self.filters[standby].clear();
        refill(&self.filters[standby]);
        self.active.store(standby, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_address_is_contained() {
        let bloom = AtomicBloom::new();
        let addr = Ipv4Addr::new(10, 0, 0, 66);
        assert!(!bloom.may_contain(addr));
        bloom.add(addr);
        assert!(bloom.may_contain(addr));
    }

    #[test]
    fn test_no_false_negatives() {
        let bloom = AtomicBloom::new();
        let addrs: Vec<Ipv4Addr> = (0..500u32).map(|i| Ipv4Addr::from(0x0a000000 + i)).collect();
        for addr in &addrs {
            bloom.add(*addr);
        }
        for addr in &addrs {
            assert!(bloom.may_contain(*addr), "lost {addr}");
        }
    }

    #[test]
    fn test_mostly_negative_when_sparse() {
        let bloom = AtomicBloom::new();
        for i in 0..16u32 {
            bloom.add(Ipv4Addr::from(0xc0a80000 + i));
        }
        let false_positives = (0..10_000u32)
            .map(|i| Ipv4Addr::from(0x01000000 + i))
            .filter(|a| bloom.may_contain(*a))
            .count();
        // 48 of 8192 bits set; the false-positive rate should be tiny.
        assert!(false_positives < 20, "{false_positives} false positives");
    }

    #[test]
    fn test_rebuild_preserves_membership() {
        let bloom = RebuildableBloom::new();
        let kept: Vec<Ipv4Addr> = (0..64u32).map(|i| Ipv4Addr::from(0x0a000000 + i)).collect();
        let dropped = Ipv4Addr::new(203, 0, 113, 7);
        for addr in &kept {
            bloom.add(*addr);
        }
        bloom.add(dropped);

        // Rebuild from an authoritative set that no longer contains `dropped`.
        bloom.rebuild(|fresh| {
            for addr in &kept {
                fresh.add(*addr);
            }
        });

        for addr in &kept {
            assert!(bloom.may_contain(*addr), "lost {addr} across rebuild");
        }
    }

    #[test]
    fn test_add_during_rebuild_survives_swap() {
        let bloom = RebuildableBloom::new();
        let late = Ipv4Addr::new(10, 0, 0, 200);
        // An address added mid-rebuild lands in both halves and is still
        // visible once the standby is swapped in.
        bloom.rebuild(|_| {
            bloom.add(late);
        });
        assert!(bloom.may_contain(late));
    }

    #[test]
    fn test_rebuild_shrinks_fill_ratio() {
        let bloom = RebuildableBloom::new();
        for i in 0..2000u32 {
            bloom.add(Ipv4Addr::from(i * 7919));
        }
        assert!(bloom.fill_ratio() > 0.3);
        bloom.rebuild(|_| {});
        assert_eq!(bloom.fill_ratio(), 0.0);
    }

    #[test]
    fn test_fill_ratio_and_clear() {
        let bloom = AtomicBloom::new();
        assert_eq!(bloom.fill_ratio(), 0.0);
        for i in 0..2000u32 {
            bloom.add(Ipv4Addr::from(i * 7919));
        }
        assert!(bloom.fill_ratio() > 0.3);
        bloom.clear();
        assert_eq!(bloom.fill_ratio(), 0.0);
        assert!(!bloom.may_contain(Ipv4Addr::from(7919u32)));
    }
}
