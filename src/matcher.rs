use std::collections::HashSet;
use std::path::{Path, PathBuf};

use facematch_embed::{cosine_similarity, Embedding};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::RecordError;
use crate::resolver::PathResolver;
use crate::storage::{FaceDatabase, FaceRecord};

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Exclusive lower bound on similarity.
    pub threshold: f64,
    /// Keep only the best-scoring face of each photo.
    pub dedupe_by_photo: bool,
    pub max_results: Option<usize>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            dedupe_by_photo: false,
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub key: String,
    pub photo: String,
    pub face_index: usize,
    pub similarity: f64,
    /// `None` means matched, but the photo is not available on this machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub matches: Vec<MatchResult>,
    pub total_checked: usize,
    /// Matches before `max_results` truncation.
    pub total_matches: usize,
    pub skipped: usize,
    pub threshold: f64,
}

/// Linear-scan matcher over one loaded database.
pub struct Matcher<'a> {
    resolver: &'a PathResolver,
    options: MatchOptions,
}

impl<'a> Matcher<'a> {
    pub fn new(resolver: &'a PathResolver, options: MatchOptions) -> Self {
        Self { resolver, options }
    }

    /// Scores every record against `query` and returns those strictly above
    /// the threshold, best first. Records that cannot be compared are logged
    /// and skipped; they never fail the call.
    pub fn run(&self, query: &Embedding, db: &FaceDatabase) -> MatchReport {
        let threshold = self.options.threshold;
        if let Some(d) = db.dimension().filter(|&d| d != query.dim()) {
            warn!(
                "Query has dimension {} but the database was built with {}",
                query.dim(),
                d
            );
        }

        let scores: Vec<Result<f64, RecordError>> = db
            .records()
            .par_iter()
            .map(|record| score(query, record))
            .collect();

        let mut skipped = 0;
        let mut kept: Vec<(&FaceRecord, f64)> = Vec::new();
        for (record, score) in db.records().iter().zip(scores) {
            match score {
                Ok(similarity) if similarity > threshold => kept.push((record, similarity)),
                Ok(_) => {}
                Err(e) => {
                    warn!("Skipping {}", e);
                    skipped += 1;
                }
            }
        }

        // stable: equal scores keep database order
        kept.sort_by(|a, b| b.1.total_cmp(&a.1));

        if self.options.dedupe_by_photo {
            let mut seen = HashSet::new();
            kept.retain(|(record, _)| seen.insert(record.face_key().photo));
        }

        let total_matches = kept.len();
        if let Some(limit) = self.options.max_results {
            kept.truncate(limit);
        }

        let matches: Vec<MatchResult> = kept
            .into_iter()
            .map(|(record, similarity)| {
                let key = record.face_key();
                MatchResult {
                    key: record.key.clone(),
                    photo: key.photo,
                    face_index: key.index,
                    similarity,
                    resolved_path: self.resolver.resolve(record),
                }
            })
            .collect();

        info!(
            "Checked {} face(s): {} above {:.3}, {} skipped",
            db.len(),
            total_matches,
            threshold,
            skipped
        );
        if let (Some(best), Some(worst)) = (matches.first(), matches.last()) {
            debug!(
                "Best similarity {:.4} ({}), lowest returned {:.4}",
                best.similarity, best.key, worst.similarity
            );
        }

        MatchReport {
            matches,
            total_checked: db.len(),
            total_matches,
            skipped,
            threshold,
        }
    }
}

fn score(query: &Embedding, record: &FaceRecord) -> Result<f64, RecordError> {
    let similarity =
        cosine_similarity(query, &record.embedding).map_err(|source| RecordError::Dimension {
            key: record.key.clone(),
            source,
        })?;
    if !similarity.is_finite() {
        return Err(RecordError::NonFinite {
            key: record.key.clone(),
        });
    }
    Ok(similarity)
}

/// Per-face matching with default options.
pub fn match_faces(
    query: &Embedding,
    db: &FaceDatabase,
    threshold: f64,
    model_root: &Path,
) -> Vec<MatchResult> {
    let resolver = PathResolver::new(model_root);
    let options = MatchOptions {
        threshold,
        ..MatchOptions::default()
    };
    Matcher::new(&resolver, options).run(query, db).matches
}
