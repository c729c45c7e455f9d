//! # Pretrained Checkpoint Tables
//!
//! A [`PretrainedWeightsTable`] maps a network-shape key to one published
//! checkpoint; the cached copy is stored under the URL's file name.

use crate::cache::disk::DiskCacheConfig;
use std::path::PathBuf;

/// A published checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PretrainedWeights {
    /// Table key.
    pub key: &'static str,

    /// Description of the weights.
    pub description: &'static str,

    /// License.
    pub license: &'static str,

    /// Project the weights were published by.
    pub origin: &'static str,

    /// Download URL.
    pub url: &'static str,
}

impl PretrainedWeights {
    /// The checkpoint file name; the last URL path segment.
    pub fn file_name(&self) -> &'static str {
        self.url.rsplit('/').next().unwrap_or(self.url)
    }

    /// The disk cache location of the checkpoint.
    ///
    /// Does not fetch, or check for, the file.
    pub fn disk_cache_path(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        disk_cache.weights_path(self.file_name())
    }

    /// Download the checkpoint into the disk cache, unless already present.
    ///
    /// # Returns
    ///
    /// The disk location of the cached checkpoint.
    pub fn fetch_weights_to_disk_cache(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        disk_cache.fetch_weights(self.url, self.file_name())
    }
}

/// A static checkpoint table.
#[derive(Debug)]
pub struct PretrainedWeightsTable {
    /// The checkpoints; keys are unique.
    pub items: &'static [PretrainedWeights],
}

impl PretrainedWeightsTable {
    /// The table keys, in declaration order.
    pub fn keys(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.key).collect()
    }

    /// Lookup a checkpoint by key.
    pub fn lookup(
        &self,
        key: &str,
    ) -> Option<&'static PretrainedWeights> {
        let items: &'static [PretrainedWeights] = self.items;
        items.iter().find(|item| item.key == key)
    }
}
