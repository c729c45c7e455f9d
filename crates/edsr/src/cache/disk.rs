//! # Checkpoint Disk Cache
//!
//! Pretrained checkpoints live under ``{root}/weights/{file name}``, where
//! ``root`` is ``~/.cache/{root_cache_key}`` unless [`DiskCacheConfig::root_dir`]
//! is set.

use anyhow::Context;
use burn::config::Config;
use burn::data::network::downloader;
use std::path::{Path, PathBuf};

/// Sub-directory holding checkpoint files.
pub const WEIGHTS_DIR: &str = "weights";

/// Checkpoint cache location.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Name of the cache directory under ``~/.cache``.
    #[config(default = "\"edsr\".to_string()")]
    pub root_cache_key: String,

    /// Explicit cache root; replaces ``~/.cache/{root_cache_key}``.
    #[config(default = "None")]
    pub root_dir: Option<String>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// The cache root; it may not exist yet.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(root) = &self.root_dir {
            return Ok(PathBuf::from(root));
        }
        Ok(dirs::home_dir()
            .context("Cannot locate the home directory")?
            .join(".cache")
            .join(&self.root_cache_key))
    }

    /// The cache path of the checkpoint file `file_name`.
    ///
    /// Neither checks for, nor creates, the file.
    pub fn weights_path(
        &self,
        file_name: &str,
    ) -> anyhow::Result<PathBuf> {
        Ok(self.base_cache_dir()?.join(WEIGHTS_DIR).join(file_name))
    }

    /// Download `url` to [`DiskCacheConfig::weights_path`], unless already cached.
    pub fn fetch_weights(
        &self,
        url: &str,
        file_name: &str,
    ) -> anyhow::Result<PathBuf> {
        let path = self.weights_path(file_name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        try_cache_download_to_path(url, &path)?;
        Ok(path)
    }
}

/// Download `url` to `path`, unless `path` already exists.
///
/// The download is written beside `path` and then renamed into place,
/// so an interrupted download never leaves a truncated checkpoint.
pub fn try_cache_download_to_path(
    url: &str,
    path: &Path,
) -> anyhow::Result<()> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "cached");
        return Ok(());
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?
        .to_string_lossy()
        .to_string();

    tracing::info!(url, path = %path.display(), "downloading");
    let bytes = downloader::download_file_as_bytes(url, &file_name);

    let partial = path.with_file_name(format!("{file_name}.partial"));
    std::fs::write(&partial, &bytes)
        .with_context(|| format!("Cannot write {}", partial.display()))?;
    std::fs::rename(&partial, path)
        .with_context(|| format!("Cannot move download into {}", path.display()))?;

    Ok(())
}
