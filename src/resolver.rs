use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::OnceCell;
use walkdir::WalkDir;

use crate::storage::FaceRecord;

/// Subfolder the training tool copies photos into under a model root.
pub const DEFAULT_PHOTOS_SUBDIR: &str = "denemelik";

/// File name component of a stored path, accepting both `/` and `\`
/// separators regardless of the platform that wrote it.
pub fn basename(source: &str) -> &str {
    source
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(source)
}

/// `C:\...`, `C:/...` or `\\server\...`: absolute somewhere else, never
/// meaningful relative to a model root.
fn is_foreign_absolute(source: &str) -> bool {
    let bytes = source.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    drive || source.starts_with("\\\\")
}

/// Maps stored photo paths (often captured on another machine) to files that
/// exist under a model root.
///
/// Resolution order, first existing file wins:
/// 1. the stored path as-is
/// 2. a relative stored path joined onto the model root
/// 3. `<root>/<basename>`
/// 4. `<root>/<photos subdir>/<basename>`
/// 5. the first file named `<basename>` found walking the root, with
///    directory entries visited in file-name order
#[derive(Debug)]
pub struct PathResolver {
    model_root: PathBuf,
    photos_subdir: String,
    by_name: OnceCell<HashMap<OsString, PathBuf>>,
}

impl PathResolver {
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
            photos_subdir: DEFAULT_PHOTOS_SUBDIR.to_string(),
            by_name: OnceCell::new(),
        }
    }

    pub fn with_photos_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.photos_subdir = subdir.into();
        self
    }

    pub fn model_root(&self) -> &Path {
        &self.model_root
    }

    pub fn resolve(&self, record: &FaceRecord) -> Option<PathBuf> {
        self.resolve_path(&record.source_path)
    }

    pub fn resolve_path(&self, source: &str) -> Option<PathBuf> {
        let name = basename(source);
        if name.is_empty() {
            return None;
        }
        let found = self
            .candidates(source)
            .into_iter()
            .find(|p| p.is_file())
            .or_else(|| self.search(name));
        if found.is_none() {
            debug!("No file for {} under {}", source, self.model_root.display());
        }
        found
    }

    /// Direct locations tried before falling back to a recursive search.
    pub fn candidates(&self, source: &str) -> Vec<PathBuf> {
        let name = basename(source);
        let mut out = Vec::with_capacity(4);
        if !source.is_empty() {
            out.push(PathBuf::from(source));
        }
        let normalized = source.replace('\\', "/");
        if !is_foreign_absolute(source) && Path::new(&normalized).is_relative() {
            out.push(self.model_root.join(&normalized));
        }
        out.push(self.model_root.join(name));
        if !self.photos_subdir.is_empty() {
            out.push(self.model_root.join(&self.photos_subdir).join(name));
        }
        out
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        self.by_name
            .get_or_init(|| index_files(&self.model_root))
            .get(std::ffi::OsStr::new(name))
            .cloned()
    }
}

/// First path seen for every file name under `root`. Built once per
/// resolver; the walk is deterministic because entries are sorted by name.
fn index_files(root: &Path) -> HashMap<OsString, PathBuf> {
    let mut index = HashMap::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        index
            .entry(entry.file_name().to_os_string())
            .or_insert_with(|| entry.path().to_path_buf());
    }
    debug!("Indexed {} file name(s) under {}", index.len(), root.display());
    index
}
