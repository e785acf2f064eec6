//! Stable partitioning of result identifiers into result chunks.

/// Hard ceiling on the number of result chunks in a bundle.
pub const MAX_NUM_RESULT_CHUNKS: usize = 1000;

/// Target number of definition/reference results per chunk.
pub const RESULTS_PER_RESULT_CHUNK: usize = 500;

/// The number of result chunks to allocate for a bundle holding
/// `num_results` definition and reference results.
pub fn num_result_chunks(num_results: usize) -> usize {
    (num_results / RESULTS_PER_RESULT_CHUNK).clamp(1, MAX_NUM_RESULT_CHUNKS)
}

/// Map a result identifier to a chunk index in `0..max_index`.
///
/// The accumulator follows the classic string-hash shape
/// `h = (h << 5) - h + c` over the id's Unicode code points with
/// 32-bit signed wrap-around. Bundles are read back by consumers that
/// compute the same hash, so the arithmetic must stay bit-exact;
/// wrapping operations are required, not an optimization.
pub fn hash_key(id: &str, max_index: usize) -> usize {
    let mut hash: i32 = 0;
    for c in id.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
    }
    hash.unsigned_abs() as usize % max_index
}
