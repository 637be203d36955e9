use std::{path::Path, path::PathBuf, time::Duration as StdDuration};

use config::{Config, ConfigError, Environment, File, Map};
use diaphantium_client::ClientConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    actions::ActionTable,
    category::Category,
    clicker::ClickerConfig,
    cooldown::CooldownPolicy,
    discovery::DiscoveryConfig,
    engine::EngineOptions,
    events::DEFAULT_EVENT_CAPACITY,
};

pub const ENV_PREFIX: &str = "DIAPHANTIUM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Falls back to the platform cache directory when unset.
    pub cache_dir: Option<PathBuf>,
    pub memory_ttl_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_ttl_secs: 600,
            timeout_secs: 15,
        }
    }
}

impl ClientSettings {
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        config.memory_cache_ttl =
            time::Duration::seconds(i64::try_from(self.memory_ttl_secs).unwrap_or(i64::MAX));
        config.request_timeout = StdDuration::from_secs(self.timeout_secs);
        config
    }
}

/// Everything the engine, the clicker loops and the script client read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub actions: ActionTable,
    pub exempt_category: Option<Category>,
    pub cooldown_policy: CooldownPolicy,
    pub skip_on_cooldown: bool,
    pub event_capacity: usize,
    pub clicker: ClickerConfig,
    pub client: ClientSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            actions: ActionTable::default(),
            exempt_category: Some(Category::from("MINE")),
            cooldown_policy: CooldownPolicy::default(),
            skip_on_cooldown: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            clicker: ClickerConfig::default(),
            client: ClientSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Layers defaults, then the optional TOML or JSON file at `path`, then
    /// `DIAPHANTIUM_*` environment variables (`__` separates nested keys, as
    /// in `DIAPHANTIUM_CLICKER__MINE_DELAY_MS`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            debug!(target: "diaphantium_core", path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        builder.build()?.try_deserialize()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            actions: self.actions.clone(),
            exempt_category: self.exempt_category.clone(),
            cooldown_policy: self.cooldown_policy,
            skip_on_cooldown: self.skip_on_cooldown,
            event_capacity: self.event_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_env() -> Option<Map<String, String>> {
        Some(Map::new())
    }

    #[test]
    fn defaults_survive_an_empty_layer_stack() {
        let config = EngineConfig::load_with_env(None, no_env()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.exempt_category, Some(Category::from("MINE")));
        assert_eq!(config.actions.category_for("3").map(Category::as_str), Some("DOUBLE_DAMAGE"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diaphantium.toml");
        fs::write(
            &path,
            r#"
cooldown_policy = "clear-all"
skip_on_cooldown = false

[discovery]
path_fragment = "/assets/"

[clicker]
mine_delay_ms = 250
click_values = [{ key = "1", enabled = true }, { key = "2" }]
"#,
        )
        .unwrap();

        let config = EngineConfig::load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(config.cooldown_policy, CooldownPolicy::ClearAll);
        assert!(!config.skip_on_cooldown);
        assert_eq!(config.discovery.path_fragment, "/assets/");
        assert_eq!(config.discovery.max_attempts, 2, "untouched keys keep defaults");
        assert_eq!(config.clicker.mine_delay_ms, 250);
        assert_eq!(config.clicker.enabled_keys().collect::<Vec<_>>(), vec!["1"]);
    }

    #[test]
    fn json_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diaphantium.json");
        fs::write(&path, r#"{"event_capacity": 10, "client": {"timeout_secs": 3}}"#).unwrap();

        let config = EngineConfig::load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(config.event_capacity, 10);
        assert_eq!(config.client.timeout_secs, 3);
        assert_eq!(config.client.memory_ttl_secs, 600);
    }

    #[test]
    fn environment_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diaphantium.toml");
        fs::write(&path, "[clicker]\nmine_delay_ms = 250\n").unwrap();

        let mut env = Map::new();
        env.insert("DIAPHANTIUM_CLICKER__MINE_DELAY_MS".to_string(), "40".to_string());
        env.insert("DIAPHANTIUM_SKIP_ON_COOLDOWN".to_string(), "false".to_string());

        let config = EngineConfig::load_with_env(Some(&path), Some(env)).unwrap();
        assert_eq!(config.clicker.mine_delay_ms, 40);
        assert!(!config.skip_on_cooldown);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(EngineConfig::load_with_env(Some(&path), no_env()).is_err());
    }

    #[test]
    fn client_settings_map_onto_client_config() {
        let settings = ClientSettings {
            cache_dir: Some(PathBuf::from("/tmp/diaphantium-test")),
            memory_ttl_secs: 30,
            timeout_secs: 2,
        };
        let config = settings.to_client_config();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/diaphantium-test"));
        assert_eq!(config.memory_cache_ttl, time::Duration::seconds(30));
        assert_eq!(config.request_timeout, StdDuration::from_secs(2));
    }

    #[test]
    fn engine_options_mirror_config() {
        let config = EngineConfig {
            exempt_category: None,
            cooldown_policy: CooldownPolicy::Keep,
            ..EngineConfig::default()
        };
        let options = config.engine_options();
        assert_eq!(options.exempt_category, None);
        assert_eq!(options.cooldown_policy, CooldownPolicy::Keep);
        assert!(options.skip_on_cooldown);
    }
}
