//! Vector similarity helpers.

/// Cosine similarity `dot / (|a| * |b|)`, in `[-1, 1]`.
///
/// Returns NaN when either vector has zero magnitude, when the lengths
/// differ, or when the vectors are empty. NaN compares false against any
/// threshold, so such pairs never count as similar.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::NAN;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::NAN;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
