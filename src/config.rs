use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use tracing::info;

pub const CONFIG_FILE: &str = "appforge.toml";
pub const DATA_DIR_ENV: &str = "APPFORGE_DATA_DIR";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Where the SQLite database lives. Defaults to `~/.appforge`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub mock_data: MockDataConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// "openai" or "template"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockDataConfig {
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_min_records() -> usize {
    5
}
fn default_max_records() -> usize {
    10
}
fn default_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for MockDataConfig {
    fn default() -> Self {
        Self {
            min_records: default_min_records(),
            max_records: default_max_records(),
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from `<data_dir>/appforge.toml` when no path is
    /// given. A missing default file means defaults; a missing explicit file
    /// is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_data_dir()?.join(CONFIG_FILE), false),
        };
        if !config_path.exists() {
            if explicit {
                bail!("Config file {} does not exist", config_path.display());
            }
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded config from {}: generator={}, records={}..={}",
            config_path.display(),
            config.generator.provider,
            config.mock_data.min_records,
            config.mock_data.max_records
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mock_data.min_records == 0 {
            bail!("mock_data.min_records must be at least 1");
        }
        if self.mock_data.min_records > self.mock_data.max_records {
            bail!(
                "mock_data.min_records ({}) exceeds max_records ({})",
                self.mock_data.min_records,
                self.mock_data.max_records
            );
        }
        if self.generator.timeout_secs == 0 {
            bail!("generator.timeout_secs must be greater than 0");
        }
        if !matches!(self.generator.provider.as_str(), "openai" | "template") {
            bail!(
                "generator.provider must be 'openai' or 'template', got '{}'",
                self.generator.provider
            );
        }
        Ok(())
    }

    /// `APPFORGE_DATA_DIR`, then `data_dir`, then `~/.appforge`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.trim().is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("appforge.db"))
    }
}

fn default_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".appforge"))
        .ok_or_else(|| anyhow!("Could not find home directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.generator.provider, "openai");
        assert_eq!(config.generator.timeout_secs, 60);
        assert_eq!(config.generator.max_retries, 2);
        assert_eq!(config.mock_data.min_records, 5);
        assert_eq!(config.mock_data.max_records, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::parse(
            r#"
            data_dir = "/tmp/forge"

            [server]
            port = 9100

            [generator]
            provider = "template"

            [mock_data]
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.generator.provider, "template");
        assert_eq!(config.generator.model, "gpt-4o-mini");
        assert_eq!(config.mock_data.seed, Some(7));
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/forge")));
    }

    #[test]
    fn rejects_inverted_record_bounds() {
        let err = AppConfig::parse("[mock_data]\nmin_records = 8\nmax_records = 3\n").unwrap_err();
        assert!(err.to_string().contains("exceeds max_records"));
        assert!(AppConfig::parse("[mock_data]\nmin_records = 0\n").is_err());
    }

    #[test]
    fn rejects_zero_timeout_and_unknown_provider() {
        assert!(AppConfig::parse("[generator]\ntimeout_secs = 0\n").is_err());
        assert!(AppConfig::parse("[generator]\nprovider = \"oracle\"\n").is_err());
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(&missing)).await.is_err());

        let present = dir.path().join("appforge.toml");
        std::fs::write(&present, "[server]\nport = 8123\n").unwrap();
        let config = AppConfig::load(Some(&present)).await.unwrap();
        assert_eq!(config.server.port, 8123);
    }
}
