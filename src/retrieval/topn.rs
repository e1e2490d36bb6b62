use std::cmp::Ordering;

/// Upper bound on the up-front allocation; `n` comes straight from the caller.
const MAX_PREALLOC: usize = 1024;

/// Keep the `n` highest-scoring candidates, returned best first.
///
/// Retains at most `n` entries at any time. A candidate only displaces the current minimum
/// when it scores strictly higher, so among equal scores the earliest seen wins. The output is
/// identical to a stable descending sort of all candidates truncated to `n`.
pub fn select_top_n<T>(candidates: impl IntoIterator<Item = (f32, T)>, n: usize) -> Vec<(f32, T)> {
    if n == 0 {
        return Vec::new();
    }

    // Ascending by score; among equal scores the latest seen sorts lowest, so it is evicted
    // first and reversing gives first-seen order.
    let mut retained: Vec<(f32, usize, T)> = Vec::with_capacity(n.min(MAX_PREALLOC));
    let ascending = |a: &(f32, usize, T), b: &(f32, usize, T)| -> Ordering {
        a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1))
    };

    for (seq, (score, item)) in candidates.into_iter().enumerate() {
        let entry = (score, seq, item);
        if retained.len() == n {
            if score.total_cmp(&retained[0].0) != Ordering::Greater {
                continue;
            }
            retained.remove(0);
        }
        let at = retained.partition_point(|kept| ascending(kept, &entry) == Ordering::Less);
        retained.insert(at, entry);
    }

    retained
        .into_iter()
        .rev()
        .map(|(score, _, item)| (score, item))
        .collect()
}

/// Cosine similarity of two equal-length vectors. Zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
