//! Static split of a chunk list into parallel lanes.

use std::ops::Range;

/// Splits `len` items into `min(parallelism, len)` contiguous ranges.
///
/// Every range but the last holds `len / lanes` items; the last one also
/// takes the remainder. Order is preserved and every index appears in
/// exactly one range. A `parallelism` of 0 is treated as 1.
pub fn partition(len: usize, parallelism: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }

    let lanes = parallelism.clamp(1, len);
    let size = len / lanes;

    (0..lanes)
        .map(|lane| {
            let start = lane * size;
            let end = if lane == lanes - 1 { len } else { start + size };
            start..end
        })
        .collect()
}
