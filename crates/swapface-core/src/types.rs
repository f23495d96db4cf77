use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]: `1 - similarity`.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Copy of the embedding scaled to unit L2 norm. Zero vectors are returned as-is.
    pub fn normalized(&self) -> Vec<f32> {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        }
    }
}

/// A detected face with its alignment landmarks and identity embedding.
#[derive(Debug, Clone)]
pub struct Face {
    pub bbox: BoundingBox,
    pub landmarks: [(f32, f32); 5],
    pub embedding: Embedding,
}

/// Strategy for deciding whether two faces belong to the same person.
pub trait Matcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;

    fn is_match(&self, a: &Embedding, b: &Embedding) -> bool;
}

/// Cosine distance matcher: faces match when their distance is below `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl CosineMatcher {
    pub const DEFAULT_THRESHOLD: f32 = 0.8;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl Matcher for CosineMatcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.cosine_distance(b)
    }

    fn is_match(&self, a: &Embedding, b: &Embedding) -> bool {
        self.distance(a, b) < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_distance_is_scale_invariant() {
        let a = emb(vec![3.0, 4.0]);
        let b = emb(vec![30.0, 40.0]);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_unit_length() {
        let a = emb(vec![3.0, 4.0]);
        let n = a.normalized();
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert_eq!(emb(vec![0.0, 0.0]).normalized(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_matcher_accepts_same_direction() {
        let matcher = CosineMatcher::default();
        assert!(matcher.is_match(&emb(vec![1.0, 0.1]), &emb(vec![1.0, 0.0])));
    }

    #[test]
    fn test_matcher_rejects_orthogonal() {
        // distance 1.0 is not below 0.8
        let matcher = CosineMatcher::default();
        assert!(!matcher.is_match(&emb(vec![1.0, 0.0]), &emb(vec![0.0, 1.0])));
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(!CosineMatcher::new(1.0).is_match(&a, &b));
        assert!(CosineMatcher::new(1.01).is_match(&a, &b));
    }
}
