use std::sync::Arc;

use anyhow::Result;
use diaphantium_client::ScriptClient;
use tracing::{debug, info};

pub mod actions;
pub mod category;
pub mod clicker;
pub mod config;
pub mod cooldown;
pub mod discovery;
pub mod engine;
pub mod events;
pub mod extract;
pub mod host;
pub mod registry;

pub use actions::ActionTable;
pub use category::{resolve_category, Category};
pub use clicker::{Clicker, ClickerConfig};
pub use crate::config::EngineConfig;
pub use cooldown::{CooldownPolicy, CooldownTracker};
pub use discovery::{DiscoveryError, PageScripts, ScriptDiscovery, ScriptFetcher, ScriptLocator, StaticScripts};
pub use engine::{ClickOutcome, DebugInfo, EngineOptions, PacketEngine};
pub use extract::{extract_fields, ExtractError, FieldIdentifier};
pub use registry::SupplyRegistry;

/// Shared services built from an [`EngineConfig`].
#[derive(Clone)]
pub struct Runtime {
    config: EngineConfig,
    client: Arc<ScriptClient>,
}

impl Runtime {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ScriptClient> {
        &self.client
    }

    /// Discovery that reads the script tags of `page_url` through the client.
    pub fn page_discovery(&self, page_url: &str) -> ScriptDiscovery {
        let fetcher: Arc<dyn ScriptFetcher> = self.client.clone();
        ScriptDiscovery::new(
            Arc::new(PageScripts::new(page_url, Arc::clone(&fetcher))),
            fetcher,
            self.config.discovery.clone(),
        )
    }

    /// An engine for the host behind `installer`, discovering through `page_url`.
    pub fn engine(
        &self,
        installer: Arc<dyn host::PropertyObserverInstaller>,
        page_url: &str,
    ) -> PacketEngine {
        PacketEngine::new(installer, self.config.engine_options())
            .with_discovery(self.page_discovery(page_url))
    }
}

pub fn bootstrap(config: EngineConfig) -> Result<Runtime> {
    let client = ScriptClient::with_config(config.client.to_client_config())?;
    debug!(
        target: "diaphantium_core",
        cache_dir = %client.cache_dir().display(),
        "ScriptClient initialized"
    );

    info!(
        target: "diaphantium_core",
        path_fragment = %config.discovery.path_fragment,
        cooldown_policy = ?config.cooldown_policy,
        actions = config.actions.entries().len(),
        "runtime ready"
    );

    Ok(Runtime {
        config,
        client: Arc::new(client),
    })
}
