pub mod face;
pub mod oracle;
pub mod raw;

// Re-export commonly used types
pub use face::{cosine_similarity, normalize, Detection, DimensionMismatch, Embedding};
pub use oracle::{CommandOracle, EmbeddingOracle, OracleError};
pub use raw::{IngestError, RawFace};
