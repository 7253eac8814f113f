//! Vector helpers for f16 snapshot storage.

use half::f16;

/// Scales `values` to unit length in place; a zero vector is left unchanged.
pub fn normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Normalises then narrows to f16.
pub fn to_f16_normalized(values: &[f32]) -> Vec<f16> {
    let mut scaled = values.to_vec();
    normalize(&mut scaled);
    scaled.into_iter().map(f16::from_f32).collect()
}

/// Cosine similarity between a stored f16 vector and an f32 query, clamped to `[0, 1]`.
///
/// Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity_f16_f32(stored: &[f16], query: &[f32]) -> f32 {
    if stored.len() != query.len() || stored.is_empty() {
        return 0.0;
    }

    let (dot, norm_a_sq, norm_b_sq) = stored.iter().zip(query.iter()).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, na, nb), (a, &b)| {
            let a = a.to_f32();
            (dot + a * b, na + a * a, nb + b * b)
        },
    );

    let norm = norm_a_sq.sqrt() * norm_b_sq.sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    (dot / norm).clamp(0.0, 1.0)
}

pub fn f16_to_le_bytes(values: &[f16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Returns `None` if `bytes` is not a whole number of f16 values.
pub fn f16_from_le_bytes(bytes: &[u8]) -> Option<Vec<f16>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(2)
            .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    )
}
