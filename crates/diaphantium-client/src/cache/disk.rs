use std::{
    fs::create_dir_all,
    path::PathBuf,
};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use time::OffsetDateTime;
use tokio::{fs, task};
use tracing::debug;

use super::stats::CacheStats;
use crate::types::CacheEntry;

const MAX_FILE_STEM: usize = 120;

#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    stats: CacheStats,
}

impl DiskCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            stats: CacheStats::new(),
        }
    }

    /// Maps a script URL onto a flat, filesystem-safe file name.
    pub fn file_name_for(url: &str) -> String {
        let trimmed = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut stem: String = trimmed
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if stem.len() > MAX_FILE_STEM {
            stem = stem.split_off(stem.len() - MAX_FILE_STEM);
        }
        format!("{stem}.json")
    }

    pub async fn load<T>(&self, file_name: &str) -> Result<Option<CacheEntry<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = self.root.join(file_name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            self.stats.record_miss();
            return Ok(None);
        }

        let data = fs::read(&path)
            .await
            .with_context(|| format!("failed to read cache file {path:?}"))?;
        let size = data.len() as u64;
        let entry = task::spawn_blocking(move || {
            serde_json::from_slice::<CacheEntry<T>>(&data)
                .map_err(|err| anyhow!("failed to deserialize cache file {path:?}: {err}"))
        })
        .await??;

        self.stats.record_hit();
        self.stats.record_bytes(size);
        Ok(Some(entry))
    }

    pub async fn store<T>(&self, file_name: &str, value: T) -> Result<()>
    where
        T: Serialize + Send + 'static,
    {
        let path = self.root.join(file_name);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .with_context(|| format!("failed to create cache dir {parent:?}"))?;
        }

        let entry = CacheEntry {
            value,
            stored_at: OffsetDateTime::now_utc(),
        };

        let payload = task::spawn_blocking(move || serde_json::to_vec(&entry)).await??;
        fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write cache file {path:?}"))?;

        self.stats.set_entry_count(self.count_entries());
        debug!(target: "diaphantium_client", file = ?path, "wrote cache entry");
        Ok(())
    }

    /// Number of cache files currently on disk.
    pub fn count_entries(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
