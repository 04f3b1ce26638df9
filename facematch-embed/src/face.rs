use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Two embeddings of different length were compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("embedding dimension mismatch: expected {expected}, got {found}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub found: usize,
}

/// Face embedding as produced by the external extractor.
///
/// Stored raw: nothing here assumes the vector is already L2-normalized.
/// Serializes as a plain sequence of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct Embedding {
    pub vector: Array1<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            vector: Array1::from(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f64 {
        self.vector.dot(&self.vector).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.vector.iter().all(|x| x.is_finite())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.vector.to_vec()
    }

    pub fn normalized(&self) -> Embedding {
        normalize(self)
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f64> {
    fn from(e: Embedding) -> Self {
        e.vector.to_vec()
    }
}

/// Detector metadata kept alongside an embedding.
///
/// `confidence` comes from whichever detector produced the face and is not
/// comparable across extractor implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// x1, y1, x2, y2
    pub bbox: Option<[f64; 4]>,
    pub keypoints: Option<Vec<[f64; 2]>>,
    pub confidence: Option<f64>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.bbox.is_none() && self.keypoints.is_none() && self.confidence.is_none()
    }
}

/// L2-normalize an embedding. A zero vector comes back unchanged.
pub fn normalize(v: &Embedding) -> Embedding {
    let norm = v.norm();
    if norm == 0.0 {
        return v.clone();
    }
    Embedding {
        vector: &v.vector / norm,
    }
}

/// Cosine similarity between two embeddings.
///
/// Both operands are re-normalized here regardless of how they were stored,
/// so legacy un-normalized vectors compare correctly. The result is not
/// clamped and may be negative.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f64, DimensionMismatch> {
    if a.dim() != b.dim() {
        return Err(DimensionMismatch {
            expected: a.dim(),
            found: b.dim(),
        });
    }
    Ok(normalize(a).vector.dot(&normalize(b).vector))
}
