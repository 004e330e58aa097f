use futures::Stream;
use futures::stream;
use std::sync::Arc;

use crate::core::block::CompactBlock;
use crate::core::blockfetcher::{NodeAdapter, fetch_compact_block};
use crate::core::errors::ReadError;
use crate::core::header::HeaderCodec;
use crate::runtime::block_cache::BlockCache;

/// Read side of the gateway: cache first, node on a miss.
///
/// Never writes the cache; blocks fetched on a miss are returned and dropped.
#[derive(Clone)]
pub struct BlockReader {
    cache: Arc<BlockCache>,
    node: Arc<dyn NodeAdapter>,
    codec: HeaderCodec,
}

impl BlockReader {
    pub fn new(cache: Arc<BlockCache>, node: Arc<dyn NodeAdapter>, codec: HeaderCodec) -> Self {
        Self { cache, node, codec }
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub async fn get_block(&self, height: u32) -> Result<CompactBlock, ReadError> {
        if let Some(block) = self.cache.get(height) {
            return Ok(block);
        }
        tracing::debug!(height, "cache miss, asking node");
        fetch_compact_block(self.node.as_ref(), &self.codec, height)
            .await?
            .ok_or(ReadError::BeyondTip(height))
    }

    /// Blocks `start..=end` in order. Ends after yielding the first error.
    pub fn get_block_range(
        &self,
        start: u32,
        end: u32,
    ) -> impl Stream<Item = Result<CompactBlock, ReadError>> + Send + 'static {
        let reader = self.clone();
        stream::unfold(Some(start), move |next| {
            let reader = reader.clone();
            async move {
                let height = next.filter(|h| *h <= end)?;
                let res = reader.get_block(height).await;
                let next = match res {
                    Ok(_) => height.checked_add(1),
                    Err(_) => None,
                };
                Some((res, next))
            }
        })
    }
}
