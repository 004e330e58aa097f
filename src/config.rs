use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::blockfetcher::ChainInfoRetry;
use crate::runtime::ingestor::IngestPolicy;

fn default_cache_max_blocks() -> usize {
    40_000
}

fn default_activation_upgrade_id() -> String {
    // Sapling
    "76b809bb".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retry_backoff_step_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    10
}

fn default_reorg_rollback_depth() -> u32 {
    2
}

fn default_max_reorg_depth() -> u32 {
    100
}

fn default_max_range_blocks() -> u32 {
    1_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub node_rpc_url: String,
    #[serde(default)]
    pub node_rpc_user: String,
    #[serde(default)]
    pub node_rpc_pass: String,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_cache_max_blocks")]
    pub cache_max_blocks: usize,
    #[serde(default)]
    pub start_height: Option<u32>,
    #[serde(default = "default_activation_upgrade_id")]
    pub activation_upgrade_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_backoff_step_secs")]
    pub retry_backoff_step_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_reorg_rollback_depth")]
    pub reorg_rollback_depth: u32,
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u32,
    #[serde(default)]
    pub http_host: Option<SocketAddr>,
    #[serde(default = "default_max_range_blocks")]
    pub max_range_blocks: u32,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub node_rpc_url: String,
    /// Basic auth credentials; `None` when no user is configured.
    pub node_rpc_auth: Option<(String, String)>,
    pub db_path: Option<PathBuf>,
    pub cache_max_blocks: usize,
    pub start_height: Option<u32>,
    pub activation_upgrade_id: String,
    pub ingest: IngestPolicy,
    pub http_host: Option<SocketAddr>,
    /// Widest `/blocks/{start}/{end}` span the HTTP API will serve.
    pub max_range_blocks: u32,
    pub log_filter: String,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file.
    #[arg(long, default_value = "./config.json")]
    pub config_path: String,
}

pub fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?;
    parse_config_file(&raw)
}

pub fn parse_config_file(raw: &str) -> Result<ConfigFile> {
    serde_json::from_str(raw).context("failed to parse config JSON")
}

impl AppConfig {
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        let node_rpc_url = file.node_rpc_url.trim().to_string();
        if node_rpc_url.is_empty() {
            bail!("node_rpc_url must not be empty");
        }
        if file.cache_max_blocks == 0 {
            bail!("cache_max_blocks must be greater than 0");
        }
        if file.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than 0");
        }
        if file.reorg_rollback_depth == 0 {
            bail!("reorg_rollback_depth must be greater than 0");
        }
        if file.max_range_blocks == 0 {
            bail!("max_range_blocks must be greater than 0");
        }
        let activation_upgrade_id = file.activation_upgrade_id.trim().to_ascii_lowercase();
        if activation_upgrade_id.is_empty() {
            bail!("activation_upgrade_id must not be empty");
        }

        let node_rpc_auth = normalize_optional_string(Some(file.node_rpc_user))
            .map(|user| (user, file.node_rpc_pass));

        Ok(Self {
            node_rpc_url,
            node_rpc_auth,
            db_path: normalize_optional_string(file.db_path).map(PathBuf::from),
            cache_max_blocks: file.cache_max_blocks,
            start_height: file.start_height,
            activation_upgrade_id,
            ingest: IngestPolicy {
                poll_interval: Duration::from_secs(file.poll_interval_secs),
                retry_backoff_step: Duration::from_secs(file.retry_backoff_step_secs),
                max_retries: file.max_retries,
                rollback_depth: file.reorg_rollback_depth,
                max_reorg_depth: file.max_reorg_depth,
            },
            http_host: file.http_host,
            max_range_blocks: file.max_range_blocks,
            log_filter: file.log_filter,
        })
    }

    pub fn load(args: &CliArgs) -> Result<Self> {
        let file = load_config_file(&args.config_path)?;
        Self::from_file(file).with_context(|| format!("invalid config in {}", args.config_path))
    }

    /// Startup `getblockchaininfo` retry schedule, paced like ingestion.
    pub fn chain_info_retry(&self) -> ChainInfoRetry {
        ChainInfoRetry {
            max_retries: self.ingest.max_retries,
            base_delay: self.ingest.poll_interval,
            step: self.ingest.retry_backoff_step,
        }
    }
}
