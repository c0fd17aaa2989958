//! Embedding codec and similarity.
//!
//! Vectors are stored locally as little-endian `f32` BLOBs. The managed
//! backend returns them either as JSON arrays or as pgvector text (`[..]`).

use soulo_core::error::{SouloError, SouloResult};

/// Encode an embedding as a little-endian BLOB.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian BLOB into an embedding.
pub fn decode(bytes: &[u8]) -> SouloResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(SouloError::Database(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Parse an embedding from a backend JSON value (array or pgvector text).
pub fn from_json(value: &serde_json::Value) -> Option<Vec<f32>> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
        serde_json::Value::String(text) => serde_json::from_str::<Vec<f32>>(text).ok(),
        _ => None,
    }
}

/// Cosine similarity of two vectors.
///
/// Returns `None` when dimensions differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some((dot / (na.sqrt() * nb.sqrt())) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_codec() {
        let v = vec![0.25f32, -1.5, 3.0];
        let bytes = encode(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode(&bytes).unwrap(), v);
        assert!(decode(&bytes[..5]).is_err());
    }

    #[test]
    fn test_from_json_forms() {
        let arr = serde_json::json!([0.5, 1.0]);
        assert_eq!(from_json(&arr), Some(vec![0.5, 1.0]));
        let text = serde_json::json!("[0.5,1]");
        assert_eq!(from_json(&text), Some(vec![0.5, 1.0]));
        assert_eq!(from_json(&serde_json::json!(null)), None);
        assert_eq!(from_json(&serde_json::json!(["x"])), None);
    }

    #[test]
    fn test_cosine_similarity() {
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).is_none());
    }
}
