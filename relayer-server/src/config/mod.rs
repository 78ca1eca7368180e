//! Configuration module for relayer-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{AuthConfig, FileConfig, KafkaConfig};
use crate::rpc::RetryPolicy;
use ethers::types::{Address, U256};
use relayer_core::chain::TxOptions;
use relayer_core::entities::reward::parse_address;
use relayer_core::relayer::RelayerConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,

    #[error("failed to read database URL file {path:?}: {source}")]
    DatabaseUrlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Chain settings after validation.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub rpc_url: Url,
    pub chain_id: u64,
    pub reward_token: Address,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
    pub retry: RetryPolicy,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub worker_count: usize,
    pub job_buffer: usize,
    pub settlement_buffer: usize,
    pub shutdown_timeout: Duration,
    pub kafka: KafkaConfig,
    pub chain: ChainSettings,
    pub auth: AuthConfig,
    pub telemetry_listen: SocketAddr,
}

impl LoadedConfig {
    /// Pipeline configuration for a relayer signing as `from`.
    pub fn relayer_config(&self, from: Address) -> RelayerConfig {
        let mut tx_options = TxOptions::new(from);
        tx_options.gas_limit = self.chain.gas_limit.map(U256::from);
        tx_options.gas_price = self.chain.gas_price.map(U256::from);

        let mut config = RelayerConfig::new(self.chain.reward_token, tx_options);
        config.worker_count = self.worker_count;
        config.job_buffer = self.job_buffer;
        config.settlement_buffer = self.settlement_buffer;
        config
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    telemetry_listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(
        config_path: impl AsRef<Path>,
        telemetry_listen_override: Option<SocketAddr>,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            telemetry_listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.telemetry_listen_override {
            file_config.telemetry.listen = listen;
        }

        let reward_token = self.validate(&file_config)?;
        Ok(build_loaded_config(file_config, reward_token))
    }

    fn validate(&self, config: &FileConfig) -> Result<Address, ConfigError> {
        if config.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "kafka.brokers must not be empty".to_string(),
            ));
        }
        if config.kafka.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "kafka.topics must name at least one topic".to_string(),
            ));
        }
        if config.relayer.shutdown_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "relayer.shutdown_timeout_secs must be positive".to_string(),
            ));
        }
        if config.chain.retry.min_wait_ms > config.chain.retry.max_wait_ms {
            return Err(ConfigError::ValidationError(
                "chain.retry.min_wait_ms must not exceed max_wait_ms".to_string(),
            ));
        }
        parse_address(&config.chain.reward_token).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "chain.reward_token {:?} is not an address",
                config.chain.reward_token
            ))
        })
    }
}

fn build_loaded_config(file_config: FileConfig, reward_token: Address) -> LoadedConfig {
    let mut kafka = file_config.kafka;
    kafka.topics.retain(|t| !t.trim().is_empty());

    LoadedConfig {
        worker_count: file_config.relayer.worker_count,
        job_buffer: file_config.relayer.job_buffer,
        settlement_buffer: file_config.relayer.settlement_buffer,
        shutdown_timeout: Duration::from_secs(file_config.relayer.shutdown_timeout_secs),
        kafka,
        chain: ChainSettings {
            rpc_url: file_config.chain.rpc_url,
            chain_id: file_config.chain.chain_id,
            reward_token,
            gas_limit: file_config.chain.gas_limit,
            gas_price: file_config.chain.gas_price,
            retry: RetryPolicy {
                max_retries: file_config.chain.retry.max_retries,
                min_wait: Duration::from_millis(file_config.chain.retry.min_wait_ms),
                max_wait: Duration::from_millis(file_config.chain.retry.max_wait_ms),
            },
        },
        auth: file_config.auth,
        telemetry_listen: file_config.telemetry.listen,
    }
}

/// Get the database URL.
///
/// A URL file, when given, wins over the explicit value, which in turn wins
/// over the `DATABASE_URL` environment variable.
pub fn get_database_url(
    explicit: Option<String>,
    file: Option<&Path>,
) -> Result<String, ConfigError> {
    if let Some(path) = file {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::DatabaseUrlFile {
                path: path.to_path_buf(),
                source,
            })?;
        let url = content.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        return Ok(url.to_string());
    }
    match explicit {
        Some(url) => Ok(url),
        None => std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl),
    }
}
