//! TOML file configuration structures.
//!
//! These structs directly map to the `relayer-config.toml` file format.

use crate::auth::Secret;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub relayer: RelayerSection,
    pub kafka: KafkaConfig,
    pub chain: ChainConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Pipeline sizing section.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerSection {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_buffer")]
    pub job_buffer: usize,
    #[serde(default = "default_buffer")]
    pub settlement_buffer: usize,
    /// How long a graceful stop may take before every stage is cancelled.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RelayerSection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            job_buffer: default_buffer(),
            settlement_buffer: default_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_worker_count() -> usize {
    5
}

fn default_buffer() -> usize {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Kafka consumer section.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub brokers: String,
    pub topics: Vec<String>,
    /// The consumer group is `{group_prefix}-relayer`.
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
}

fn default_group_prefix() -> String {
    "reward".to_string()
}

impl KafkaConfig {
    pub fn group_id(&self) -> String {
        format!("{}-relayer", self.group_prefix)
    }
}

/// Chain section.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub chain_id: u64,
    /// Address of the token contract rewards are minted on.
    pub reward_token: String,
    pub gas_limit: Option<u64>,
    /// Legacy gas price in wei.
    pub gas_price: Option<u64>,
    #[serde(default)]
    pub retry: RpcRetryConfig,
}

/// `[chain.retry]`: backoff for failed RPC requests.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for RpcRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    4
}

fn default_min_wait_ms() -> u64 {
    1000
}

fn default_max_wait_ms() -> u64 {
    30_000
}

/// Where the signing key comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Hex private key, inline or from `RELAYER_AUTH_PRIVATE_KEY`.
    PrivateKey { private_key: Option<Secret> },
    PrivateKeyFile { path: PathBuf },
    /// BIP-39 phrase, inline or from `RELAYER_AUTH_MNEMONIC`.
    Mnemonic {
        mnemonic: Option<Secret>,
        #[serde(default)]
        account_index: u32,
    },
    MnemonicFile {
        path: PathBuf,
        #[serde(default)]
        account_index: u32,
    },
}

/// Health endpoint section.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_listen")]
    pub listen: SocketAddr,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            listen: default_telemetry_listen(),
        }
    }
}

fn default_telemetry_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 10000))
}
