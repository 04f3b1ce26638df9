use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use facematch_embed::EmbeddingOracle;
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::key::FaceKey;
use crate::storage::{FaceDatabase, FaceRecord};

pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "tiff"];

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub recursive: bool,
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainSummary {
    pub images: usize,
    pub processed: usize,
    pub faces: usize,
    pub no_face: usize,
    pub failed: usize,
    /// Faces whose dimension differed from the first face stored.
    pub skipped_faces: usize,
}

/// Image files under `folder`, in file-name order.
pub fn scan_images(folder: &Path, options: &TrainOptions) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(folder).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Cannot read {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_image_extension(e.path(), &options.extensions))
        .map(|e| e.into_path())
        .collect()
}

fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Path of `image` relative to `folder`, always with `/` separators.
fn relative_name(folder: &Path, image: &Path) -> String {
    let rel = image.strip_prefix(folder).unwrap_or(image);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds a database from every image under `folder`.
///
/// Each face becomes one record keyed `<relative path>||face_<i>`. Images the
/// oracle fails on are counted and skipped. Fails only if nothing usable was
/// extracted at all.
pub fn train(
    folder: &Path,
    oracle: &mut dyn EmbeddingOracle,
    options: &TrainOptions,
) -> Result<(FaceDatabase, TrainSummary)> {
    if !folder.is_dir() {
        bail!("photo folder not found: {}", folder.display());
    }
    let images = scan_images(folder, options);
    info!("Found {} image(s) under {}", images.len(), folder.display());

    let mut summary = TrainSummary {
        images: images.len(),
        ..TrainSummary::default()
    };
    let mut db = FaceDatabase::new();

    for (i, image) in images.iter().enumerate() {
        let name = relative_name(folder, image);
        let faces = match oracle.extract(image) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("{}: {}", name, e);
                summary.failed += 1;
                continue;
            }
        };
        summary.processed += 1;
        if faces.is_empty() {
            debug!("{}: no face", name);
            summary.no_face += 1;
            continue;
        }

        for (index, mut face) in faces.into_iter().enumerate() {
            if let Some(d) = db.dimension().filter(|&d| d != face.embedding.dim()) {
                warn!(
                    "{} face {}: dimension {} does not match {}, skipped",
                    name,
                    index,
                    face.embedding.dim(),
                    d
                );
                summary.skipped_faces += 1;
                continue;
            }
            face.source_path = Some(name.clone());
            let key = FaceKey::new(&name, index).to_string();
            db.insert(FaceRecord::from_raw(key, face));
            summary.faces += 1;
        }

        if (i + 1) % 50 == 0 {
            info!("Processed {}/{} image(s)", i + 1, images.len());
        }
    }

    if db.is_empty() {
        bail!(
            "no faces extracted from {} image(s) in {}",
            summary.images,
            folder.display()
        );
    }
    info!(
        "Extracted {} face(s) from {} image(s); {} without faces, {} failed",
        summary.faces, summary.processed, summary.no_face, summary.failed
    );
    Ok((db, summary))
}
