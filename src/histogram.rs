//! Concurrent frequency tables for the hot recording path.
//!
//! Both histograms are exact: every observed value becomes its own key, so no
//! precision is lost to bucketing and percentiles can be derived later from a
//! full snapshot. Writers contend only on the shard that owns their key, which
//! keeps increments cheap under many workers.
//!
//! [`UintHistogram`] records per-request latencies in microseconds.
//! [`FloatHistogram`] records per-tick RPS samples; non-finite samples are
//! admissible here and filtered where the statistics are derived.

use std::collections::HashMap;

use parking_lot::Mutex;

const SHARDS: usize = 16;

/// Sharded `key -> count` table. The shard index mixes the high bits into the
/// low ones so float bit patterns (which vary mostly in the mantissa) spread
/// as well as small integer keys.
struct ShardedCounts {
    shards: Vec<Mutex<HashMap<u64, u64>>>,
}

impl ShardedCounts {
    fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn increment(&self, key: u64) {
        let mixed = key ^ (key >> 17) ^ (key >> 43);
        let mut shard = self.shards[(mixed as usize) % SHARDS].lock();
        *shard.entry(key).or_insert(0) += 1;
    }

    /// Every key with a non-zero count, exactly once. Order is unspecified.
    fn snapshot(&self) -> Vec<(u64, u64)> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            entries.extend(shard.iter().map(|(&k, &c)| (k, c)));
        }
        entries
    }
}

/// Concurrent histogram over `u64` keys.
pub struct UintHistogram {
    counts: ShardedCounts,
}

impl UintHistogram {
    pub fn new() -> Self {
        Self {
            counts: ShardedCounts::new(),
        }
    }

    pub fn increment(&self, key: u64) {
        self.counts.increment(key);
    }

    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        self.counts.snapshot()
    }
}

impl Default for UintHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent histogram over `f64` keys, stored by bit pattern.
pub struct FloatHistogram {
    counts: ShardedCounts,
}

impl FloatHistogram {
    pub fn new() -> Self {
        Self {
            counts: ShardedCounts::new(),
        }
    }

    pub fn increment(&self, key: f64) {
        self.counts.increment(key.to_bits());
    }

    pub fn snapshot(&self) -> Vec<(f64, u64)> {
        self.counts
            .snapshot()
            .into_iter()
            .map(|(bits, c)| (f64::from_bits(bits), c))
            .collect()
    }
}

impl Default for FloatHistogram {
    fn default() -> Self {
        Self::new()
    }
}
