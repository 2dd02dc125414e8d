//! Vector scoring shared by the dense backends and the models.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::error::{EmbeddingError, Result};

fn check_dims(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        })
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// A zero vector scores 0 against anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let denom = l2_norm(a) * l2_norm(b);
    Ok(if denom == 0.0 { 0.0 } else { dot / denom })
}

/// Inner product; equals the cosine for unit rows.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Map a cosine score from `[-1, 1]` onto `[0, 1]`.
pub fn rescale_cosine(score: f32) -> f32 {
    ((score + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Scale `row` to unit length in place. Zero rows stay zero.
pub fn normalize(row: &mut [f32]) {
    let norm = l2_norm(row);
    if norm > 0.0 {
        row.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Order `(id, score)` pairs by score descending, then id ascending.
pub fn rank_cmp(a: &(String, f32), b: &(String, f32)) -> Ordering {
    OrderedFloat(b.1)
        .cmp(&OrderedFloat(a.1))
        .then_with(|| a.0.cmp(&b.0))
}

/// Find the top-k candidates by dot product with `query`.
///
/// Candidates are expected to be unit length. Ties break on the id so the
/// result is independent of candidate order.
pub fn find_top_k<'a, I>(query: &[f32], candidates: I, k: usize) -> Result<Vec<(String, f32)>>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut scores = candidates
        .into_iter()
        .map(|(id, row)| Ok((id.to_string(), dot_product(query, row)?)))
        .collect::<Result<Vec<_>>>()?;
    scores.sort_by(rank_cmp);
    scores.truncate(k);
    Ok(scores)
}
