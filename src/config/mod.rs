use config::{Config as ConfigFile, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::error::Error;
use std::time::Duration;

use crate::models::directive::{SecurityProtocol, TopicRole};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub engine: EngineTimeoutConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub dsl: DslConfig,
    #[serde(default)]
    pub cucumber: CucumberConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            engine: EngineTimeoutConfig::default(),
            kafka: KafkaConfig::default(),
            dsl: DslConfig::default(),
            cucumber: CucumberConfig::default(),
            services: ServicesConfig::default(),
            storage: StorageConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
        }
    }
}

/// Process-level lifecycle knobs shared by every engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub system_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub initialization_timeout_ms: u64,
    pub pool_size: u32,
    pub max_execution_time_ms: u64,
    pub max_restarts: u32,
    pub restart_time_range_ms: u64,
    pub max_retries: u32,
    pub cleanup_delay_ms: u64,
    pub stash_buffer_size: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_timeout_ms: 30_000,
            shutdown_timeout_ms: 30_000,
            initialization_timeout_ms: 60_000,
            pool_size: 4,
            max_execution_time_ms: 300_000,
            max_restarts: 3,
            restart_time_range_ms: 60_000,
            max_retries: 3,
            cleanup_delay_ms: 5_000,
            stash_buffer_size: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    pub fn restart_time_range(&self) -> Duration {
        Duration::from_millis(self.restart_time_range_ms)
    }
}

/// Per-phase deadlines of the test execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTimeoutConfig {
    pub setup_state_timeout_ms: u64,
    pub loading_state_timeout_ms: u64,
    pub completed_state_timeout_ms: u64,
    pub exception_state_timeout_ms: u64,
}

impl Default for EngineTimeoutConfig {
    fn default() -> Self {
        Self {
            setup_state_timeout_ms: 60_000,
            loading_state_timeout_ms: 60_000,
            completed_state_timeout_ms: 120_000,
            exception_state_timeout_ms: 30_000,
        }
    }
}

impl EngineTimeoutConfig {
    pub fn setup_state_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_state_timeout_ms)
    }

    pub fn loading_state_timeout(&self) -> Duration {
        Duration::from_millis(self.loading_state_timeout_ms)
    }

    pub fn completed_state_timeout(&self) -> Duration {
        Duration::from_millis(self.completed_state_timeout_ms)
    }

    pub fn exception_state_timeout(&self) -> Duration {
        Duration::from_millis(self.exception_state_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Engine-wide default, overridable per topic directive.
    pub bootstrap_servers: Vec<String>,
    pub schema_registry_url: String,
    /// Strict mode (`false`) expects every subject to be pre-registered;
    /// development configs enable auto-registration on first produce.
    pub schema_auto_register: bool,
    /// Entry bound for the schema caches; unset means unbounded for the
    /// process lifetime.
    pub schema_cache_max_entries: Option<usize>,
    pub oauth: Option<KafkaOauthConfig>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            schema_registry_url: "http://localhost:8081".to_string(),
            schema_auto_register: false,
            schema_cache_max_entries: None,
            oauth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaOauthConfig {
    pub token_endpoint: String,
    pub client_scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslConfig {
    pub ask_timeout_ms: u64,
    /// Pending-request bound per stream worker inbox.
    pub stream_buffer_size: usize,
    /// How long a fetch-by-correlation waits for a record to arrive.
    pub fetch_wait_ms: u64,
}

impl Default for DslConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: 5_000,
            stream_buffer_size: 64,
            fetch_wait_ms: 3_000,
        }
    }
}

impl DslConfig {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    pub fn fetch_wait(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CucumberConfig {
    pub glue_packages: Vec<String>,
}

impl Default for CucumberConfig {
    fn default() -> Self {
        Self {
            glue_packages: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl ServicesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object-store layout
    /// (`{root}/{bucket}/tests/{test-id}/...`).
    pub root_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: "object-store".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub credentials: Vec<VaultCredentialConfig>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            credentials: vec![],
        }
    }
}

/// Security material the config-backed vault hands out for a (topic, role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCredentialConfig {
    pub topic: String,
    pub role: TopicRole,
    pub protocol: SecurityProtocol,
    pub credential_blob: Option<String>,
}

/// Outcome of configuration validation. Failures prevent startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidation {
    Success { warnings: Vec<String> },
    Failure { errors: Vec<String>, warnings: Vec<String> },
}

impl Config {
    pub fn validate(&self) -> ConfigValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.runtime.max_execution_time_ms <= self.runtime.system_timeout_ms {
            errors.push(format!(
                "max_execution_time_ms ({}) must be greater than system_timeout_ms ({})",
                self.runtime.max_execution_time_ms, self.runtime.system_timeout_ms
            ));
        }
        if self.runtime.cleanup_delay_ms >= self.runtime.max_execution_time_ms {
            errors.push(format!(
                "cleanup_delay_ms ({}) must be less than max_execution_time_ms ({})",
                self.runtime.cleanup_delay_ms, self.runtime.max_execution_time_ms
            ));
        }
        if !(1..=10_000).contains(&self.runtime.stash_buffer_size) {
            errors.push(format!(
                "stash_buffer_size ({}) must be within [1, 10000]",
                self.runtime.stash_buffer_size
            ));
        }
        if self.runtime.pool_size < 1 {
            errors.push("pool_size must be at least 1".to_string());
        } else if self.runtime.pool_size > 50 {
            warnings.push(format!(
                "pool_size ({}) is unusually large",
                self.runtime.pool_size
            ));
        }

        if self.dsl.ask_timeout_ms < 100 {
            errors.push(format!(
                "dsl.ask_timeout_ms ({}) must be at least 100ms",
                self.dsl.ask_timeout_ms
            ));
        } else if self.dsl.ask_timeout_ms > 30_000 {
            warnings.push(format!(
                "dsl.ask_timeout_ms ({}) above 30s will make scenario steps very slow to fail",
                self.dsl.ask_timeout_ms
            ));
        }

        if !self.kafka.schema_registry_url.starts_with("http://")
            && !self.kafka.schema_registry_url.starts_with("https://")
        {
            errors.push(format!(
                "kafka.schema_registry_url ('{}') must begin with http:// or https://",
                self.kafka.schema_registry_url
            ));
        }

        // Every engine state timer has to be able to fire before the test
        // itself is declared overdue.
        for (name, value) in [
            ("setup_state_timeout_ms", self.engine.setup_state_timeout_ms),
            ("loading_state_timeout_ms", self.engine.loading_state_timeout_ms),
            ("completed_state_timeout_ms", self.engine.completed_state_timeout_ms),
            ("exception_state_timeout_ms", self.engine.exception_state_timeout_ms),
        ] {
            if value >= self.runtime.max_execution_time_ms {
                errors.push(format!(
                    "engine.{} ({}) must be less than max_execution_time_ms ({})",
                    name, value, self.runtime.max_execution_time_ms
                ));
            }
        }

        if errors.is_empty() {
            ConfigValidation::Success { warnings }
        } else {
            ConfigValidation::Failure { errors, warnings }
        }
    }
}

pub fn load_config() -> Result<Config, Box<dyn Error>> {
    // Load .env file if it exists
    dotenv::dotenv().ok();

    let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config".to_string());

    let config = ConfigFile::builder()
        // Start with default settings
        .add_source(File::with_name(&format!("{}.default", config_path)).required(false))
        // Add config file settings
        .add_source(File::with_name(&config_path).required(false))
        // Add environment variables (with prefix TESTPROBE_)
        .add_source(Environment::with_prefix("TESTPROBE").separator("__"))
        .build()?;

    let config: Config = config.try_deserialize()?;

    match config.validate() {
        ConfigValidation::Success { warnings } => {
            for warning in warnings {
                tracing::warn!("Configuration warning: {}", warning);
            }
            Ok(config)
        }
        ConfigValidation::Failure { errors, warnings } => {
            for warning in warnings {
                tracing::warn!("Configuration warning: {}", warning);
            }
            Err(format!("Invalid configuration: {}", errors.join("; ")).into())
        }
    }
}
