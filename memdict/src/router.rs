//! Shard routing for keys.
//!
//! The router decides which shard owns a key. Two properties matter:
//!
//! - **Determinism**: the same key and shard count always produce the same shard, so
//!   every load and every lookup agree on placement.
//! - **Hash independence**: the routing hash is seeded differently from the hash the
//!   shard tables use internally. Reusing the table hash would funnel each shard's
//!   keys into a narrow slice of its buckets and wreck the probe distribution.

use std::hash::Hasher;

use rustc_hash::FxHasher;

/// Stable salt mixed into the routing hash so it never collides with the unseeded
/// hash used by the shard tables.
const ROUTE_SEED: u64 = 0xA076_1D64_78BD_642F;

#[inline(always)]
fn fxhash64_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut h = FxHasher::default();
    h.write_u64(seed);
    h.write(bytes);
    h.finish()
}

/// Unbiased reduction of a 64-bit hash into [0, n) using a 128-bit multiply.
/// (Lemire: Fast Random Integer Generation in an Interval)
#[inline(always)]
fn fast_reduce_u64_to_range(x: u64, n: u64) -> u64 {
    ((x as u128).wrapping_mul(n as u128) >> 64) as u64
}

/// Maps keys onto `[0, shard_count)`.
///
/// A router is a pure value: it holds nothing but the shard count, so it can be
/// copied into loader workers and shared with lookups without synchronization.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    shard_count: u64,
}

impl ShardRouter {
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count >= 1);
        Self {
            shard_count: shard_count as u64,
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shard_count as usize
    }

    /// Shard for a simple `u64` key.
    #[inline]
    pub fn shard_for_u64(&self, key: u64) -> usize {
        if self.shard_count == 1 {
            return 0;
        }
        let hash = fxhash64_with_seed(ROUTE_SEED, &key.to_le_bytes());
        fast_reduce_u64_to_range(hash, self.shard_count) as usize
    }

    /// Shard for an opaque composite key.
    #[inline]
    pub fn shard_for_bytes(&self, key: &[u8]) -> usize {
        if self.shard_count == 1 {
            return 0;
        }
        let hash = fxhash64_with_seed(ROUTE_SEED, key);
        fast_reduce_u64_to_range(hash, self.shard_count) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn routing_is_deterministic() {
        let router = ShardRouter::new(8);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let key: u64 = rng.random();
            assert_eq!(router.shard_for_u64(key), router.shard_for_u64(key));
        }
    }

    #[test]
    fn single_shard_takes_everything() {
        let router = ShardRouter::new(1);
        assert_eq!(router.shard_for_u64(u64::MAX), 0);
        assert_eq!(router.shard_for_bytes(b"anything"), 0);
    }

    #[test]
    fn shards_stay_in_range_and_balanced() {
        let shard_count = 4;
        let router = ShardRouter::new(shard_count);
        let mut counts = vec![0usize; shard_count];
        let n = 40_000u64;
        for key in 0..n {
            let shard = router.shard_for_u64(key);
            assert!(shard < shard_count);
            counts[shard] += 1;
        }
        // Sequential keys should spread close to uniformly.
        let expected = (n as usize) / shard_count;
        for (shard, &count) in counts.iter().enumerate() {
            assert!(
                count > expected / 2 && count < expected * 2,
                "shard {shard} got {count} of {n} keys"
            );
        }
    }

    #[test]
    fn byte_keys_spread_across_shards() {
        let router = ShardRouter::new(6);
        let mut seen = vec![false; 6];
        for i in 0..1_000u32 {
            let key = format!("key-{i}");
            seen[router.shard_for_bytes(key.as_bytes())] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
