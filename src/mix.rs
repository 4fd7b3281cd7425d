//! Secondary mixing of caller-supplied hashes into bucket indices.
//!
//! Callers hand the table a precomputed 64-bit hash of unknown quality. Before
//! it is masked down to a bucket index it goes through one round of the
//! fasthash64 compression function, with the per-table salt folded into the
//! state. A weak caller hash still spreads across buckets, and an adversary
//! who can pick hash values cannot predict which bucket they land in without
//! knowing the salt.

/// Multiplier from fasthash64.
const M: u64 = 0x880355f21e6d1965;

/// The fasthash64 compression step.
#[inline(always)]
const fn compress(mut h: u64) -> u64 {
    h ^= h >> 23;
    h = h.wrapping_mul(0x2127599bf4325c37);
    h ^= h >> 47;
    h
}

/// Mixes `hash` with `salt` into a full-width 64-bit value.
#[inline(always)]
pub(crate) const fn mix(hash: u64, salt: u64) -> u64 {
    let mut h = M.wrapping_mul(8) ^ salt;
    h ^= compress(hash);
    h = h.wrapping_mul(M);
    compress(h)
}

/// Returns the bucket index for `hash`.
///
/// `mask` must be `bucket_count - 1` for a power-of-two bucket count.
#[inline(always)]
pub(crate) const fn bucket_index(hash: u64, mask: usize, salt: u64) -> usize {
    mix(hash, salt) as usize & mask
}
