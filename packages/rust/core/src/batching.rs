//! Greedy size-bounded batching shared by extraction and refinement.

/// Split `items` into consecutive batches whose measured size stays under `budget`.
///
/// Each batch starts at `base` (fixed framing such as an opening bracket) and
/// grows by `measure(item)` per item. An item joins the current batch only while
/// `running + measure(item) < budget`; otherwise the batch is closed and the
/// item starts the next one. An empty batch always accepts its first item, so a
/// single oversized item forms a batch of its own. The final batch is always
/// emitted.
pub fn greedy_batches<T, I, F>(items: I, budget: usize, base: usize, mut measure: F) -> Vec<Vec<T>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> usize,
{
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut running = base;

    for item in items {
        let size = measure(&item);
        if !current.is_empty() && running + size >= budget {
            batches.push(std::mem::take(&mut current));
            running = base;
        }
        running += size;
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
