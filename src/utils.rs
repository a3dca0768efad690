//! Size arithmetic shared by the arena, its backings and the platform layer.

/// Rounds `value` up to the next multiple of `boundary`, which must be a
/// power of two.
///
/// Used to check that backing buffers start on a quantum boundary and to
/// round mappings to whole pages.
pub fn align(value: usize, boundary: usize) -> usize {
    (value + boundary - 1) & !(boundary - 1)
}

/// Rounds a requested payload `size` up to the smallest positive multiple of
/// `quantum` that is greater or equal than it.
///
/// A request for zero bytes still gets one quantum of payload, so every
/// allocated block has a usable data region. Returns `None` when the rounded
/// value would not fit in a `usize`, which the allocator treats as exhaustion.
pub fn round_up(size: u64, quantum: usize) -> Option<usize> {
    let size = usize::try_from(size).ok()?;

    if size == 0 {
        return Some(quantum);
    }

    let rounded = size.checked_add(quantum - 1)?;

    Some(rounded & !(quantum - 1))
}
