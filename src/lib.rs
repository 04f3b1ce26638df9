pub mod config;
pub mod error;
pub mod export;
pub mod key;
pub mod matcher;
pub mod resolver;
pub mod storage;
pub mod train;

// Re-export embedding types for convenience
pub use facematch_embed::{
    cosine_similarity, normalize, raw, CommandOracle, Detection, DimensionMismatch, Embedding,
    EmbeddingOracle, RawFace,
};
pub use matcher::{match_faces, MatchOptions, MatchReport, MatchResult, Matcher};
pub use resolver::PathResolver;
pub use storage::{FaceDatabase, FaceRecord, StoreFormat};
