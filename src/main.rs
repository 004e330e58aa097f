use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lightgate::config::{AppConfig, CliArgs};
use lightgate::core::blockfetcher::{NodeAdapter, fetch_chain_info_with_retry};
use lightgate::core::hash::Sha256dHasher;
use lightgate::core::header::HeaderCodec;
use lightgate::node_rpc::JsonRpcNode;
use lightgate::runtime::block_cache::{BlockCache, CacheConfig};
use lightgate::runtime::cache_store::CacheStore;
use lightgate::runtime::clock::TokioSleeper;
use lightgate::runtime::ingestor::{IngestExit, Ingestor};
use lightgate::runtime::reader::BlockReader;
use lightgate::server::{self, ServerState};

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cfg: AppConfig) -> Result<IngestExit> {
    let node: Arc<dyn NodeAdapter> = Arc::new(
        JsonRpcNode::new(&cfg.node_rpc_url, cfg.node_rpc_auth.clone(), &cfg.activation_upgrade_id)
            .context("failed to build node rpc client")?,
    );
    let sleeper = Arc::new(TokioSleeper);

    let info = fetch_chain_info_with_retry(node.as_ref(), sleeper.as_ref(), cfg.chain_info_retry())
        .await
        .context("unable to get chain info from node")?;
    tracing::info!(
        chain = %info.chain,
        activation_height = info.activation_height,
        headers = info.headers,
        branch_id = %info.branch_id,
        "connected to node"
    );

    let cache_config = CacheConfig {
        max_entries: cfg.cache_max_blocks,
        start_height: cfg.start_height.unwrap_or(info.activation_height),
    };
    let cache = Arc::new(match &cfg.db_path {
        Some(path) => {
            let store = CacheStore::open(path)
                .with_context(|| format!("failed to open cache store at {}", path.display()))?;
            BlockCache::open(cache_config, store).context("failed to load cache snapshot")?
        }
        None => BlockCache::new(cache_config),
    });

    let codec = HeaderCodec::new(Arc::new(Sha256dHasher));
    let ingestor =
        Ingestor::new(cache.clone(), node.clone(), codec.clone(), sleeper, cfg.ingest);
    let handle = ingestor.spawn();
    let shutdown = handle.cancel_token();

    if let Some(addr) = cfg.http_host {
        let state = ServerState {
            reader: BlockReader::new(cache.clone(), node.clone(), codec),
            status: handle.status(),
            max_range_blocks: cfg.max_range_blocks,
        };
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run(addr, state, token.clone()).await {
                tracing::error!(error = ?e, "http api failed");
                token.cancel();
            }
        });
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_token.cancel();
        }
    });

    let exit = handle.wait().await;
    shutdown.cancel();
    Ok(exit)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let cfg = match AppConfig::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log_filter);

    match run(cfg).await {
        Ok(IngestExit::Stopped) => ExitCode::SUCCESS,
        Ok(IngestExit::Fatal(e)) => {
            tracing::error!(error = %e, "ingestion halted");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = ?e, "startup failed");
            ExitCode::FAILURE
        }
    }
}
