//! Key routing: which partition an encoded key belongs to.

use xxhash_rust::xxh64::xxh64;

/// Seed for partition hashing. Changing it reshuffles every stored table.
const PARTITION_SEED: u64 = 0;

/// Return the partition index in `0..partitions` for an encoded key.
///
/// `partitions` must be at least 1.
pub fn partition_for(key: &[u8], partitions: usize) -> usize {
    debug_assert!(partitions > 0);
    (xxh64(key, PARTITION_SEED) % partitions as u64) as usize
}
