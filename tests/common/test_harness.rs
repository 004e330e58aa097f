/// Integration harness for the ingest and read paths
///
/// Combines:
/// - a simulated node (ChainBuilder + MockNode)
/// - the block cache, optionally backed by a RocksDB store
/// - an ingestor driven one step at a time
/// - a reader over the same cache and node
use anyhow::Result;
use lightgate::config::AppConfig;
use lightgate::core::hash::Sha256dHasher;
use lightgate::core::header::HeaderCodec;
use lightgate::runtime::block_cache::{BlockCache, CacheConfig};
use lightgate::runtime::cache_store::CacheStore;
use lightgate::runtime::ingestor::{Ingestor, IngestorHandle, Step};
use lightgate::runtime::reader::BlockReader;
use lightgate::test_utils::{BuiltBlock, ChainBuilder, MockNode, RecordingSleeper, TestConfigBuilder};
use std::sync::Arc;
use tempfile::TempDir;

pub struct GatewayTestHarness {
    pub node: Arc<MockNode>,
    pub cache: Arc<BlockCache>,
    pub sleeper: Arc<RecordingSleeper>,
    pub ingestor: Ingestor,
    pub config: AppConfig,
    chain: Vec<BuiltBlock>,
    _temp_dirs: Vec<TempDir>,
}

impl GatewayTestHarness {
    /// Harness whose node serves a single block at the configured start height
    pub fn new(builder: TestConfigBuilder) -> Result<Self> {
        let (config, temp_dirs) = builder.build();
        let start = config.start_height.unwrap_or(0);
        let chain = ChainBuilder::starting_at(start).build();
        let node = Arc::new(MockNode::with_chain(chain.clone()));
        let sleeper = Arc::new(RecordingSleeper::default());
        let cache = Arc::new(open_cache(&config)?);
        let ingestor = new_ingestor(&config, &cache, &node, &sleeper);

        Ok(Self { node, cache, sleeper, ingestor, config, chain, _temp_dirs: temp_dirs })
    }

    /// Extend the node's chain by `count` blocks
    pub fn mine_blocks(&mut self, count: u32) -> Vec<BuiltBlock> {
        let chain = ChainBuilder::from_chain(self.chain.clone()).add_blocks(count).build();
        let new_blocks = chain[self.chain.len()..].to_vec();
        for block in &new_blocks {
            self.node.add_block(block.clone());
        }
        self.chain = chain;
        new_blocks
    }

    /// Replace the top `back` blocks with `count` new ones on a different branch
    pub fn simulate_reorg(&mut self, back: u32, count: u32, salt: u64) -> Vec<BuiltBlock> {
        let chain = ChainBuilder::from_chain(self.chain.clone())
            .fork(back)
            .with_salt(salt)
            .add_blocks(count)
            .build();
        let kept = self.chain.len() - back as usize;
        let fork_height = chain[kept].height;
        let new_blocks = chain[kept..].to_vec();
        self.node.apply_reorg(fork_height, new_blocks.clone());
        self.chain = chain;
        new_blocks
    }

    /// Step the ingestor until it sleeps for lack of new blocks
    pub async fn ingest_until_waiting(&mut self) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        loop {
            let step = self.ingestor.step().await?;
            let done = step == Step::Waited { error: None };
            steps.push(step);
            if done {
                return Ok(steps);
            }
        }
    }

    /// Drop the cache and ingestor and rebuild both from the configured store
    pub fn restart(&mut self) -> Result<()> {
        // The old cache must be dropped first; it holds the RocksDB lock.
        let placeholder = Arc::new(BlockCache::new(CacheConfig { max_entries: 1, start_height: 0 }));
        self.ingestor = new_ingestor(&self.config, &placeholder, &self.node, &self.sleeper);
        self.cache = placeholder;
        self.cache = Arc::new(open_cache(&self.config)?);
        self.ingestor = new_ingestor(&self.config, &self.cache, &self.node, &self.sleeper);
        Ok(())
    }

    /// Hand the ingestor to a tokio task; the harness is consumed
    pub fn spawn_ingestor(self) -> (IngestorHandle, Arc<BlockCache>) {
        (self.ingestor.spawn(), self.cache)
    }

    pub fn reader(&self) -> BlockReader {
        BlockReader::new(self.cache.clone(), self.node.clone(), codec())
    }

    pub fn chain(&self) -> &[BuiltBlock] {
        &self.chain
    }

    pub fn block(&self, height: u32) -> Option<&BuiltBlock> {
        self.chain.iter().find(|b| b.height == height)
    }
}

fn codec() -> HeaderCodec {
    HeaderCodec::new(Arc::new(Sha256dHasher))
}

fn open_cache(config: &AppConfig) -> Result<BlockCache> {
    let cache_config = CacheConfig {
        max_entries: config.cache_max_blocks,
        start_height: config.start_height.unwrap_or(0),
    };
    Ok(match &config.db_path {
        Some(path) => BlockCache::open(cache_config, CacheStore::open(path)?)?,
        None => BlockCache::new(cache_config),
    })
}

fn new_ingestor(
    config: &AppConfig,
    cache: &Arc<BlockCache>,
    node: &Arc<MockNode>,
    sleeper: &Arc<RecordingSleeper>,
) -> Ingestor {
    Ingestor::new(cache.clone(), node.clone(), codec(), sleeper.clone(), config.ingest)
}
