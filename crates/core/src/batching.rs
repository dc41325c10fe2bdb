//! Batch arithmetic shared by the executor and progress reporting.

/// Number of batches needed to cover `total` items.
///
/// A `batch_size` of 0 is treated as 1.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}

/// `round(batches_done / total_batches * 100)`, clamped to `0..=100`.
pub fn progress_percent(batches_done: usize, total_batches: usize) -> u8 {
    if total_batches == 0 {
        return 100;
    }
    let pct = (batches_done as f64 / total_batches as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Split `targets` into consecutive batches of at most `batch_size`.
pub fn partition<T>(targets: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    targets.chunks(batch_size.max(1))
}

/// Remove duplicates while keeping the first occurrence of each item.
pub fn dedup_preserving_order<T>(items: impl IntoIterator<Item = T>) -> Vec<T>
where
    T: Eq + std::hash::Hash + Clone,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
