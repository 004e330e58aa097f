// blockfetcher.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::block::{CompactBlock, parse_compact_block};
use crate::core::errors::{FetchError, NodeError};
use crate::core::header::HeaderCodec;
use crate::runtime::clock::Sleeper;

/// Source of raw blocks by height.
///
/// `Ok(None)` means the node has no block at that height yet; every `Err` is
/// treated as transient by callers.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    async fn fetch_block(&self, height: u32) -> Result<Option<Vec<u8>>, NodeError>;

    async fn chain_info(&self) -> Result<ChainInfo, NodeError>;
}

/// What the gateway needs to know about the node's chain at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    /// Activation height of the configured network upgrade.
    pub activation_height: u32,
    pub headers: u32,
    /// Consensus branch id of the next block, hex as the node reports it.
    pub branch_id: String,
}

/// Fetches one height and turns it into a compact block.
///
/// Any decode failure counts as a failure to fetch that height.
pub async fn fetch_compact_block<N: NodeAdapter + ?Sized>(
    node: &N,
    codec: &HeaderCodec,
    height: u32,
) -> Result<Option<CompactBlock>, FetchError> {
    let Some(bytes) = node.fetch_block(height).await? else {
        return Ok(None);
    };
    Ok(Some(parse_compact_block(codec, &bytes, height)?))
}

/// How startup retries `chain_info` before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInfoRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl Default for ChainInfoRetry {
    fn default() -> Self {
        Self { max_retries: 10, base_delay: Duration::from_secs(10), step: Duration::from_secs(5) }
    }
}

/// Calls `chain_info` until it succeeds, sleeping `base + retry * step`
/// between attempts. Returns the last error once `max_retries` is exceeded.
pub async fn fetch_chain_info_with_retry<N, S>(
    node: &N,
    sleeper: &S,
    policy: ChainInfoRetry,
) -> Result<ChainInfo, NodeError>
where
    N: NodeAdapter + ?Sized,
    S: Sleeper + ?Sized,
{
    let mut retry = 0u32;
    loop {
        match node.chain_info().await {
            Ok(info) => return Ok(info),
            Err(e) => {
                retry += 1;
                if retry > policy.max_retries {
                    tracing::error!(error = %e, retries = policy.max_retries, "giving up on getblockchaininfo");
                    return Err(e);
                }
                let delay = policy.base_delay + policy.step * retry;
                tracing::warn!(error = %e, retry, ?delay, "error getting chain info, retrying");
                sleeper.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::DecodeError;
    use crate::core::hash::Sha256dHasher;
    use crate::test_utils::RecordingSleeper;
    use crate::test_utils::{ChainBuilder, MockNode};
    use std::sync::Arc;

    fn codec() -> HeaderCodec {
        HeaderCodec::new(Arc::new(Sha256dHasher))
    }

    #[tokio::test]
    async fn missing_height_is_not_an_error() {
        let node = MockNode::with_chain(ChainBuilder::starting_at(10).add_blocks(2).build());
        let block = fetch_compact_block(&node, &codec(), 12).await.unwrap().unwrap();
        assert_eq!(block.height, 12);
        assert!(fetch_compact_block(&node, &codec(), 13).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn node_and_decode_failures_are_fetch_errors() {
        let node = MockNode::with_chain(ChainBuilder::starting_at(10).add_blocks(2).build());
        node.fail_at(11);
        assert!(matches!(
            fetch_compact_block(&node, &codec(), 11).await,
            Err(FetchError::Node(NodeError::Transport(_)))
        ));

        // Serve block 12's bytes at height 13.
        let twelve = node.block_at(12).unwrap();
        node.insert_raw(13, twelve.bytes);
        assert_eq!(
            fetch_compact_block(&node, &codec(), 13).await.unwrap_err(),
            FetchError::Decode(DecodeError::UnexpectedHeight { expected: 13, actual: 12 })
        );
    }

    #[tokio::test]
    async fn chain_info_retry_backs_off_then_succeeds() {
        let node = MockNode::new();
        node.fail_chain_info(3);
        let sleeper = RecordingSleeper::default();

        let info = fetch_chain_info_with_retry(&node, &sleeper, ChainInfoRetry::default())
            .await
            .unwrap();
        assert_eq!(info, node.chain_info_value());
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(15), Duration::from_secs(20), Duration::from_secs(25)]
        );
    }

    #[tokio::test]
    async fn chain_info_retry_gives_up() {
        let node = MockNode::new();
        node.fail_chain_info(u32::MAX);
        let sleeper = RecordingSleeper::default();
        let policy = ChainInfoRetry { max_retries: 2, ..ChainInfoRetry::default() };

        assert!(fetch_chain_info_with_retry(&node, &sleeper, policy).await.is_err());
        assert_eq!(sleeper.sleeps().len(), 2);
    }
}
