//! Finding the game bundle and pulling the field names out of it.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use diaphantium_client::ScriptClient;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::extract::{extract_fields, ExtractError, FieldIdentifier};

#[allow(clippy::expect_used)]
static SCRIPT_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("script src pattern compiles")
});

/// Enumerates the `src` of every script the page references.
#[async_trait]
pub trait ScriptLocator: Send + Sync {
    async fn script_sources(&self) -> Result<Vec<String>>;
}

/// Retrieves a script (or page) body as text.
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Retrieves an HTML page. Must not answer from a cache: the page is
    /// what changes when the game is redeployed.
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetch_text(url).await
    }
}

#[async_trait]
impl ScriptFetcher for ScriptClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        ScriptClient::fetch_text(self, url).await
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetch_live(url).await
    }
}

/// A locator over a fixed list of script URLs.
#[derive(Debug, Clone, Default)]
pub struct StaticScripts {
    sources: Vec<String>,
}

impl StaticScripts {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ScriptLocator for StaticScripts {
    async fn script_sources(&self) -> Result<Vec<String>> {
        Ok(self.sources.clone())
    }
}

/// Reads the script tags of an HTML page. The page is fetched live on every
/// call, so a retry sees a bundle injected late and a redeployed game yields
/// its new bundle.
pub struct PageScripts {
    page_url: String,
    fetcher: Arc<dyn ScriptFetcher>,
}

impl PageScripts {
    pub fn new(page_url: impl Into<String>, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        Self {
            page_url: page_url.into(),
            fetcher,
        }
    }
}

#[async_trait]
impl ScriptLocator for PageScripts {
    async fn script_sources(&self) -> Result<Vec<String>> {
        let html = self.fetcher.fetch_page(&self.page_url).await?;
        Ok(script_sources_in(&html, &self.page_url))
    }
}

/// Collects `<script src>` values from `html`, resolved against `page_url`
/// when it is an absolute URL.
pub fn script_sources_in(html: &str, page_url: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    SCRIPT_SRC
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|src| {
            let src = src.as_str().trim();
            base.as_ref()
                .and_then(|base| base.join(src).ok())
                .map_or_else(|| src.to_string(), String::from)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Substring identifying the game bundle among the page's scripts.
    pub path_fragment: String,
    pub retry_interval_ms: u64,
    /// Total number of looks at the page, the first one included.
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            path_fragment: "/static/js/".to_string(),
            retry_interval_ms: 100,
            max_attempts: 2,
        }
    }
}

impl DiscoveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no script containing `{fragment}` found after {attempts} attempt(s)")]
    ScriptNotFound { fragment: String, attempts: u32 },
    #[error("failed to enumerate page scripts")]
    Locate(#[source] anyhow::Error),
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

pub struct ScriptDiscovery {
    locator: Arc<dyn ScriptLocator>,
    fetcher: Arc<dyn ScriptFetcher>,
    config: DiscoveryConfig,
}

impl ScriptDiscovery {
    pub fn new(
        locator: Arc<dyn ScriptLocator>,
        fetcher: Arc<dyn ScriptFetcher>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            locator,
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Returns the first script source containing the path fragment, looking
    /// again after `retry_interval` up to `max_attempts` times in total.
    #[instrument(name = "discovery.locate", skip(self), fields(fragment = %self.config.path_fragment))]
    pub async fn locate(&self) -> Result<String, DiscoveryError> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let sources = self
                .locator
                .script_sources()
                .await
                .map_err(DiscoveryError::Locate)?;
            if let Some(url) = sources
                .into_iter()
                .find(|source| source.contains(&self.config.path_fragment))
            {
                debug!(target: "diaphantium_discovery", attempt, %url, "bundle located");
                return Ok(url);
            }

            debug!(target: "diaphantium_discovery", attempt, attempts, "bundle not referenced yet");
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_interval()).await;
            }
        }

        Err(DiscoveryError::ScriptNotFound {
            fragment: self.config.path_fragment.clone(),
            attempts,
        })
    }

    /// Locates the bundle, fetches it and extracts both field names.
    #[instrument(name = "discovery.discover", skip(self))]
    pub async fn discover(&self) -> Result<FieldIdentifier, DiscoveryError> {
        let url = self.locate().await?;
        let source = self
            .fetcher
            .fetch_text(&url)
            .await
            .map_err(|source| DiscoveryError::Fetch {
                url: url.clone(),
                source,
            })?;
        let fields = extract_fields(&source)?;
        info!(
            target: "diaphantium_discovery",
            %url,
            supply_field = %fields.supply_field,
            cooldown_field = %fields.cooldown_field,
            "field identifiers extracted"
        );
        Ok(fields)
    }
}
