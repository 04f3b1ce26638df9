use std::path::PathBuf;

use facematch_embed::{DimensionMismatch, IngestError};
use thiserror::Error;

/// Failure to produce a usable database from a persisted store. Always fatal
/// to the operation that needed the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not found: {path}")]
    Missing { path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt store {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode store: {0}")]
    Encode(#[source] CodecError),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("postcard: {0}")]
    Binary(#[from] postcard::Error),
    #[error("expected a mapping of face key to record, got {0}")]
    NotAMapping(&'static str),
    #[error("pickle stores cannot be read; convert the .pkl to JSON first")]
    Pickle,
    #[error("record {0} has a non-finite embedding value, which JSON cannot hold")]
    NonFinite(String),
}

/// A problem confined to one face record. The record is skipped and the
/// surrounding load or match carries on.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record {key}: {source}")]
    Ingest {
        key: String,
        #[source]
        source: IngestError,
    },
    #[error("record {key}: {source}")]
    Dimension {
        key: String,
        #[source]
        source: DimensionMismatch,
    },
    #[error("record {key}: similarity is not a finite number")]
    NonFinite { key: String },
}
