//! Binary codec for embedding vectors and brute-force cosine similarity
//! (§4.4 "Vector codec & cosine", §8 testable properties).

use crate::error::{MemoryError, Result};

/// Encode a float32 vector as `little-endian uint32 dim ‖ dim * f32`.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + vector.len() * 4);
    out.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a blob produced by [`encode`]. Rejects a length mismatch between
/// the header and the trailing bytes, non-finite values, and a zero or
/// overflowing dimension header.
pub fn decode(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() < 4 {
        return Err(MemoryError::Vector("blob shorter than dimension header".into()));
    }
    let dim = u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize;
    if dim == 0 {
        return Err(MemoryError::Vector("zero dimension".into()));
    }
    let expected_bytes = dim
        .checked_mul(4)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| MemoryError::Vector("dimension overflow".into()))?;
    if blob.len() != expected_bytes {
        return Err(MemoryError::Vector(format!(
            "length mismatch: header says dim={dim} ({} bytes expected), got {} bytes",
            expected_bytes,
            blob.len()
        )));
    }

    let mut out = Vec::with_capacity(dim);
    for chunk in blob[4..].chunks_exact(4) {
        let v = f32::from_le_bytes(chunk.try_into().unwrap());
        if !v.is_finite() {
            return Err(MemoryError::Vector("non-finite value in vector".into()));
        }
        out.push(v);
    }
    Ok(out)
}

/// Cosine similarity, clamped to `[-1, 1]`. Rejects dimension mismatch and
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::Vector(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(MemoryError::Vector("zero-norm vector".into()));
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(sim.clamp(-1.0, 1.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_values() {
        let v = vec![0.1_f32, -2.5, 3.75, 0.0];
        let blob = encode(&v);
        let back = decode(&blob).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut blob = encode(&[1.0, 2.0, 3.0]);
        blob.pop();
        assert!(decode(&blob).is_err());
    }

    #[test]
    fn decode_rejects_zero_dimension() {
        let blob = 0u32.to_le_bytes().to_vec();
        assert!(decode(&blob).is_err());
    }

    #[test]
    fn decode_rejects_non_finite() {
        let mut blob = (1u32).to_le_bytes().to_vec();
        blob.extend_from_slice(&f32::NAN.to_le_bytes());
        assert!(decode(&blob).is_err());
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_anti_parallel_is_minus_one() {
        let sim = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_rejects_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 2.0], &[1.0]).is_err());
    }

    #[test]
    fn cosine_rejects_zero_norm() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).is_err());
    }
}
