use anyhow::{bail, Context, Result};
use orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Logging section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the `concierge` binary reads at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LogSettings,
    pub orchestrator: OrchestratorConfig,
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Default,
}

pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    config_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            config_paths: Self::default_config_paths(),
            env_prefix: "CONCIERGE_".to_string(),
        }
    }

    /// Use `path` instead of the search list; a missing file is then an error
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.explicit_path = Some(path);
        self
    }

    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.config_paths = paths;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("concierge.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("concierge").join("config.toml"));
        }
        paths
    }

    /// Read `.env`, the first config file found, then `CONCIERGE_*` overrides
    pub async fn load(&self) -> Result<(AppConfig, ConfigSource)> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let (mut config, source) = match &self.explicit_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                (Self::load_file(path).await?, ConfigSource::File(path.clone()))
            }
            None => self.load_first_found().await,
        };

        self.apply_env_overrides(&mut config)?;
        config
            .orchestrator
            .validate()
            .context("Invalid orchestrator configuration")?;

        Ok((config, source))
    }

    async fn load_first_found(&self) -> (AppConfig, ConfigSource) {
        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            match Self::load_file(path).await {
                Ok(config) => {
                    info!("Loaded configuration from: {}", path.display());
                    return (config, ConfigSource::File(path.clone()));
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {:#}", path.display(), e);
                }
            }
        }
        debug!("No config file found, using defaults");
        (AppConfig::default(), ConfigSource::Default)
    }

    async fn load_file(path: &Path) -> Result<AppConfig> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse TOML config")
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(level) = self.var("LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(json) = self.var("LOG_JSON") {
            config.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(network_id) = self.var("NETWORK_ID") {
            config.orchestrator.network_id = network_id;
        }

        if let Some(retries) = self.var("MAX_RETRIES") {
            config.orchestrator.reliability.retry.max_retries = retries
                .parse()
                .with_context(|| format!("{}MAX_RETRIES must be an integer", self.env_prefix))?;
        }

        if let Some(timeout) = self.var("REQUEST_TIMEOUT_MS") {
            config.orchestrator.reliability.timeout.message_timeout_ms = timeout
                .parse()
                .with_context(|| {
                    format!("{}REQUEST_TIMEOUT_MS must be an integer", self.env_prefix)
                })?;
        }

        Ok(())
    }

    fn var(&self, name: &str) -> Option<String> {
        env::var(format!("{}{}", self.env_prefix, name)).ok()
    }

    pub fn generate_example_config() -> Result<String> {
        toml::to_string_pretty(&AppConfig::default()).context("Failed to render example config")
    }
}
