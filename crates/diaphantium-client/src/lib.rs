pub mod cache;
pub mod types;

pub use cache::CombinedCacheStats;

use std::{path::PathBuf, time::Duration as StdDuration};

use anyhow::{Context, Result};
use cache::{DiskCache, MemoryCache};
use directories::ProjectDirs;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use time::Duration;
use tracing::{debug, instrument, warn};

use crate::types::ScriptDocument;

const USER_AGENT: &str = "Diaphantium/1.0";

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("unexpected status code {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("response body for {0} is not valid text")]
    Body(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub cache_dir: PathBuf,
    pub memory_cache_ttl: Duration,
    pub request_timeout: StdDuration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let cache_dir = ProjectDirs::from("com", "OrakomoRi", "diaphantium").map_or_else(
            || std::env::temp_dir().join("diaphantium"),
            |dirs| dirs.cache_dir().to_path_buf(),
        );

        Self {
            cache_dir,
            memory_cache_ttl: Duration::minutes(10),
            request_timeout: StdDuration::from_secs(15),
        }
    }
}

/// Fetches game bundles and pages as text, backed by a memory and a disk cache.
///
/// Bundle URLs carry a content hash, so a cached body stays valid for as long
/// as the page keeps referencing the same URL.
#[derive(Debug)]
pub struct ScriptClient {
    http: Client,
    disk_cache: DiskCache,
    memory_cache: MemoryCache<String>,
    config: ClientConfig,
}

impl ScriptClient {
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;

        if let Err(error) = std::fs::create_dir_all(&config.cache_dir) {
            warn!(
                target: "diaphantium_client",
                error = %error,
                cache_dir = %config.cache_dir.display(),
                "failed to create cache directory; proceeding but disk cache writes may fail"
            );
        }

        Ok(Self {
            http,
            disk_cache: DiskCache::new(&config.cache_dir),
            memory_cache: MemoryCache::new(config.memory_cache_ttl),
            config,
        })
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.config.cache_dir
    }

    /// Returns the body of `url`, serving it from cache when possible.
    #[instrument(name = "script_client.fetch_text", skip(self))]
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(text) = self.memory_cache.get_with_size(url, String::len) {
            debug!(target: "diaphantium_client", url, "script served from memory cache");
            return Ok(text);
        }

        let file_name = DiskCache::file_name_for(url);
        match self.disk_cache.load::<ScriptDocument>(&file_name).await {
            Ok(Some(entry)) if entry.value.url == url => {
                debug!(target: "diaphantium_client", url, "script served from disk cache");
                self.memory_cache
                    .insert(url.to_string(), entry.value.text.clone());
                return Ok(entry.value.text);
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    target: "diaphantium_client",
                    url,
                    error = %error,
                    "ignoring unreadable disk cache entry"
                );
            }
        }

        self.refresh_text(url).await
    }

    /// Downloads `url` unconditionally and replaces any cached copy.
    #[instrument(name = "script_client.refresh_text", skip(self))]
    pub async fn refresh_text(&self, url: &str) -> Result<String> {
        let text = self.download(url).await?;
        self.memory_cache.insert(url.to_string(), text.clone());

        let document = ScriptDocument {
            url: url.to_string(),
            text: text.clone(),
        };
        if let Err(error) = self
            .disk_cache
            .store(&DiskCache::file_name_for(url), document)
            .await
        {
            warn!(target: "diaphantium_client", url, error = %error, "failed to persist script");
        }
        Ok(text)
    }

    /// Downloads `url` without reading or filling either cache. Used for
    /// pages, whose content changes between deployments under the same URL.
    #[instrument(name = "script_client.fetch_live", skip(self))]
    pub async fn fetch_live(&self, url: &str) -> Result<String> {
        self.download(url).await
    }

    pub fn clear_memory_cache(&self) {
        self.memory_cache.clear();
    }

    pub fn cache_stats(&self) -> CombinedCacheStats {
        self.disk_cache
            .stats()
            .set_entry_count(self.disk_cache.count_entries());
        CombinedCacheStats {
            memory: self.memory_cache.stats().snapshot(),
            disk: self.disk_cache.stats().snapshot(),
        }
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ClientError::Http(err.to_string()))?;
        if !response.status().is_success() {
            warn!(target: "diaphantium_client", status = %response.status(), url, "script request failed");
            return Err(ClientError::Status {
                url: url.to_string(),
                status: response.status(),
            }
            .into());
        }

        let text = response
            .text()
            .await
            .map_err(|_| ClientError::Body(url.to_string()))?;
        debug!(target: "diaphantium_client", url, bytes = text.len(), "downloaded script");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn client_in(dir: &std::path::Path) -> ScriptClient {
        ScriptClient::with_config(ClientConfig {
            cache_dir: dir.to_path_buf(),
            ..ClientConfig::default()
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn creates_cache_dir() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        let client = client_in(&nested);
        assert!(client.cache_dir().exists());
    }

    #[tokio::test]
    async fn serves_disk_cached_script_without_network() {
        let dir = tempdir().expect("tempdir");
        let client = client_in(dir.path());
        let url = "http://127.0.0.1:9/static/js/main.js";

        let document = ScriptDocument {
            url: url.to_string(),
            text: "StopCooldownMessage(supplyType=\"+this.q1+\")".to_string(),
        };
        client
            .disk_cache
            .store(&DiskCache::file_name_for(url), document)
            .await
            .unwrap();

        let text = client.fetch_text(url).await.expect("served from disk");
        assert!(text.starts_with("StopCooldownMessage"));

        let again = client.fetch_text(url).await.expect("served from memory");
        assert_eq!(text, again);
        let stats = client.cache_stats();
        assert_eq!(stats.memory.hits, 1);
        assert_eq!(stats.disk.hits, 1);
        assert_eq!(stats.disk.entry_count, 1);
    }

    #[tokio::test]
    async fn live_fetch_bypasses_cached_copy() {
        let dir = tempdir().expect("tempdir");
        let client = client_in(dir.path());
        let url = "http://127.0.0.1:9/play/";

        let document = ScriptDocument {
            url: url.to_string(),
            text: "<html></html>".to_string(),
        };
        client
            .disk_cache
            .store(&DiskCache::file_name_for(url), document)
            .await
            .unwrap();

        assert!(client.fetch_live(url).await.is_err(), "nothing listens on port 9");
        let stats = client.cache_stats();
        assert_eq!(stats.memory.hits + stats.memory.misses, 0);
        assert_eq!(stats.disk.hits, 0);
    }
}
