//! Splitting oversized texts into embeddable chunks and merging the
//! per-chunk vectors back into one.

use unicode_segmentation::UnicodeSegmentation;

/// Split `text` into contiguous chunks of at most `max_chars` characters.
///
/// Chunks are exact slices: concatenating them reproduces the input. Word
/// segments (Unicode word bounds) are packed greedily, so splits land on
/// word boundaries; only a single unbroken run longer than the whole budget
/// is split mid-run, at the character budget.
pub(crate) fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for segment in text.split_word_bounds() {
        let segment_chars = segment.chars().count();

        if segment_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            // Hard split: no boundary inside this run fits the budget.
            let mut piece = String::new();
            let mut piece_chars = 0usize;
            for ch in segment.chars() {
                if piece_chars == max_chars {
                    chunks.push(std::mem::take(&mut piece));
                    piece_chars = 0;
                }
                piece.push(ch);
                piece_chars += 1;
            }
            current = piece;
            current_chars = piece_chars;
            continue;
        }

        if current_chars + segment_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push_str(segment);
        current_chars += segment_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Weighted mean of chunk vectors; weights are the chunks' character counts.
pub(crate) fn merge_weighted(vectors: &[Vec<f32>], weights: &[usize]) -> Vec<f32> {
    debug_assert_eq!(vectors.len(), weights.len());
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let total: f64 = weights.iter().map(|w| *w as f64).sum();
    if total == 0.0 {
        return vec![0.0; first.len()];
    }

    let mut merged = vec![0.0f64; first.len()];
    for (vector, weight) in vectors.iter().zip(weights) {
        let weight = *weight as f64;
        for (slot, value) in merged.iter_mut().zip(vector) {
            *slot += f64::from(*value) * weight;
        }
    }
    merged.into_iter().map(|v| (v / total) as f32).collect()
}

/// Scale to unit L2 norm in place. All-zero vectors stay all-zero so the
/// degraded-fallback signal survives merging.
pub(crate) fn normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value = (f64::from(*value) / norm) as f32;
        }
    }
}
