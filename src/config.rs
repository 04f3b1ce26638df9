use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matcher::{MatchOptions, DEFAULT_THRESHOLD};
use crate::resolver::DEFAULT_PHOTOS_SUBDIR;
use crate::train::{TrainOptions, DEFAULT_IMAGE_EXTENSIONS};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("FACEMATCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "facematch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/facematch/config.toml"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threshold: f64,
    /// Where photos live at match time. Defaults to the store's directory.
    pub model_root: Option<PathBuf>,
    pub photos_subdir: String,
    pub dedupe_by_photo: bool,
    pub max_results: Option<usize>,
    pub recursive: bool,
    pub image_extensions: Vec<String>,
    /// External extractor command line; the image path is appended.
    pub extractor: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            model_root: None,
            photos_subdir: DEFAULT_PHOTOS_SUBDIR.to_string(),
            dedupe_by_photo: false,
            max_results: None,
            recursive: true,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extractor: Vec::new(),
        }
    }
}

impl Config {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            threshold: self.threshold,
            dedupe_by_photo: self.dedupe_by_photo,
            max_results: self.max_results,
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            recursive: self.recursive,
            extensions: self.image_extensions.clone(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
