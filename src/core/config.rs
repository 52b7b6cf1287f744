use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// LLM backend configuration
    pub llm: LlmConfig,

    /// Governance platform configuration
    pub platform: PlatformConfig,

    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// LLM backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of the Ollama server
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// Model name to use
    pub model: String,

    /// Temperature setting for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// How long to wait for the LLM backend to become reachable on startup
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

/// Governance platform configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    /// Base URL of the platform API
    pub base_url: String,

    /// Network to operate against (e.g. "staging", "ic")
    #[serde(default = "default_network")]
    pub network: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrently running telos runners
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Scheduler tick interval in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Execution lease lifetime in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Maximum attempts per step before a retryable failure becomes fatal
    #[serde(default = "default_step_retry_limit")]
    pub step_retry_limit: u32,

    /// Base delay for exponential backoff between step retries
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on the backoff delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long to wait before re-probing storage after it becomes unavailable
    #[serde(default = "default_storage_retry_ms")]
    pub storage_retry_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            tick_ms: default_tick_ms(),
            lease_ttl_secs: default_lease_ttl(),
            step_retry_limit: default_step_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            storage_retry_ms: default_storage_retry_ms(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Data directory for the file-based store
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// MongoDB settings (used instead of the file store when enabled)
    #[serde(default)]
    pub mongodb: MongoConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mongodb: MongoConfig::default(),
        }
    }
}

/// MongoDB configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MongoConfig {
    /// Whether to use MongoDB instead of file-based storage
    #[serde(default)]
    pub enabled: bool,

    /// Connection string
    #[serde(default = "default_mongo_connection")]
    pub connection_string: String,

    /// Database name
    #[serde(default = "default_mongo_database")]
    pub database: String,
}

// Default values for optional configuration
fn default_llm_base() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    2048
}

fn default_ready_timeout() -> u64 {
    120
}

fn default_network() -> String {
    "staging".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    8
}

fn default_tick_ms() -> u64 {
    500
}

fn default_lease_ttl() -> u64 {
    300
}

fn default_step_retry_limit() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    64_000
}

fn default_storage_retry_ms() -> u64 {
    2000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_mongo_connection() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongo_database() -> String {
    "hive".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&config_text)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Create a new config with default values for testing
    pub fn for_testing(data_dir: &str) -> Self {
        Self {
            llm: LlmConfig {
                api_base: "http://localhost:11434".to_string(),
                model: "test-model".to_string(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                ready_timeout_secs: 1,
            },
            platform: PlatformConfig {
                base_url: "http://localhost:9000".to_string(),
                network: default_network(),
                request_timeout_secs: 5,
            },
            engine: EngineConfig {
                tick_ms: 10,
                backoff_base_ms: 1,
                backoff_max_ms: 10,
                ..EngineConfig::default()
            },
            storage: StorageConfig {
                data_dir: data_dir.to_string(),
                mongodb: MongoConfig::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_text = r#"
[llm]
model = "gpt-oss:20b"

[platform]
base_url = "http://localhost:9000"
"#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.llm.model, "gpt-oss:20b");
        assert_eq!(config.llm.api_base, "http://localhost:11434");
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.engine.step_retry_limit, 3);
        assert!(!config.storage.mongodb.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_text = r#"
[llm]
api_base = "http://llm:11434"
model = "gpt-oss:20b"
temperature = 0.2

[platform]
base_url = "http://platform:9000"
network = "ic"

[engine]
max_concurrency = 32
lease_ttl_secs = 60
step_retry_limit = 5

[storage]
data_dir = "/var/lib/hive"

[storage.mongodb]
enabled = true
connection_string = "mongodb://db:27017"
database = "hive_prod"
"#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.engine.max_concurrency, 32);
        assert_eq!(config.engine.lease_ttl_secs, 60);
        assert_eq!(config.platform.network, "ic");
        assert!(config.storage.mongodb.enabled);
        assert_eq!(config.storage.mongodb.database, "hive_prod");
    }
}
