use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::matcher::MatchResult;
use crate::resolver::basename;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopiedPhoto {
    pub key: String,
    pub source: PathBuf,
    pub copied: PathBuf,
    pub similarity: f64,
}

/// `match_03_sim_0_953_IMG_1.JPG`: rank is 1-based, similarity has three
/// decimals with the point replaced.
pub fn export_name(rank: usize, similarity: f64, source: &Path) -> String {
    let sim = format!("{:.3}", similarity).replace('.', "_");
    let name = source.to_string_lossy();
    format!("match_{:02}_sim_{}_{}", rank, sim, basename(&name))
}

/// Copies every resolved match into `out_dir`, best first. Matches without a
/// file on this machine are skipped, as are individual copy failures.
pub fn copy_matches(matches: &[MatchResult], out_dir: &Path) -> Result<Vec<CopiedPhoto>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output folder {}", out_dir.display()))?;

    let mut copied = Vec::new();
    for (i, m) in matches.iter().enumerate() {
        let Some(source) = &m.resolved_path else {
            warn!("{}: photo not found, not copied", m.key);
            continue;
        };
        let target = out_dir.join(export_name(i + 1, m.similarity, source));
        match std::fs::copy(source, &target) {
            Ok(_) => copied.push(CopiedPhoto {
                key: m.key.clone(),
                source: source.clone(),
                copied: target,
                similarity: m.similarity,
            }),
            Err(e) => warn!("Failed to copy {}: {}", source.display(), e),
        }
    }
    info!("Copied {} photo(s) to {}", copied.len(), out_dir.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn result(key: &str, similarity: f64, resolved_path: Option<PathBuf>) -> MatchResult {
        MatchResult {
            key: key.to_string(),
            photo: key.split("||").next().unwrap().to_string(),
            face_index: 0,
            similarity,
            resolved_path,
        }
    }

    #[test]
    fn test_export_name() {
        assert_eq!(
            export_name(3, 0.95312, Path::new("/srv/denemelik/IMG_1.JPG")),
            "match_03_sim_0_953_IMG_1.JPG"
        );
        assert_eq!(export_name(12, 1.0, Path::new("a.png")), "match_12_sim_1_000_a.png");
    }

    #[test]
    fn test_copy_skips_unresolved() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("IMG_1.JPG");
        fs::write(&src, b"jpeg").unwrap();
        let out = tmp.path().join("out");

        let matches = [
            result("gone.jpg||face_0", 0.99, None),
            result("IMG_1.JPG||face_0", 0.81, Some(src.clone())),
        ];
        let copied = copy_matches(&matches, &out).unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].copied, out.join("match_02_sim_0_810_IMG_1.JPG"));
        assert_eq!(fs::read(&copied[0].copied).unwrap(), b"jpeg");
    }
}
