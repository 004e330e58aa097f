use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::blockfetcher::{NodeAdapter, fetch_compact_block};
use crate::core::errors::{FatalError, FetchError};
use crate::core::header::HeaderCodec;
use crate::runtime::block_cache::BlockCache;
use crate::runtime::clock::Sleeper;

/// Tuning for the ingestion loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestPolicy {
    /// Sleep once caught up with the node.
    pub poll_interval: Duration,
    /// Extra sleep per consecutive node failure.
    pub retry_backoff_step: Duration,
    /// Consecutive node failures tolerated; one more is fatal.
    pub max_retries: u32,
    /// How far below a mismatched height to roll back.
    pub rollback_depth: u32,
    /// Total rollback tolerated before the next successful append.
    pub max_reorg_depth: u32,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_backoff_step: Duration::from_secs(5),
            max_retries: 10,
            rollback_depth: 2,
            max_reorg_depth: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Fetching,
    Waiting,
    ReorgRecovery,
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestStatus {
    pub state: IngestState,
    /// Next height to fetch.
    pub height: u32,
    pub retries: u32,
    pub reorg_depth: u32,
}

/// What one transition did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Added(u32),
    /// Slept after the node had nothing at the cursor, or failed with `error`.
    Waited { error: Option<FetchError> },
    Reorged { resume: u32 },
}

/// How a supervised loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestExit {
    Stopped,
    Fatal(FatalError),
}

/// The only writer into the block cache.
pub struct Ingestor {
    cache: Arc<BlockCache>,
    node: Arc<dyn NodeAdapter>,
    codec: HeaderCodec,
    sleeper: Arc<dyn Sleeper>,
    policy: IngestPolicy,
    height: u32,
    retry_count: u32,
    reorg_depth: u32,
    caught_up: bool,
    fatal: Option<FatalError>,
    status: watch::Sender<IngestStatus>,
}

impl Ingestor {
    /// The cursor starts at the cache's next height.
    pub fn new(
        cache: Arc<BlockCache>,
        node: Arc<dyn NodeAdapter>,
        codec: HeaderCodec,
        sleeper: Arc<dyn Sleeper>,
        policy: IngestPolicy,
    ) -> Self {
        let height = cache.next_height();
        let (status, _) = watch::channel(IngestStatus {
            state: IngestState::Fetching,
            height,
            retries: 0,
            reorg_depth: 0,
        });
        Self {
            cache,
            node,
            codec,
            sleeper,
            policy,
            height,
            retry_count: 0,
            reorg_depth: 0,
            caught_up: false,
            fatal: None,
            status,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> IngestStatus {
        self.status.borrow().clone()
    }

    fn publish(&self, state: IngestState) {
        self.status.send_replace(IngestStatus {
            state,
            height: self.height,
            retries: self.retry_count,
            reorg_depth: self.reorg_depth,
        });
    }

    fn fail(&mut self, err: FatalError) -> FatalError {
        tracing::error!(error = %err, height = self.height, "ingestor stopped");
        self.fatal = Some(err.clone());
        self.publish(IngestState::Fatal);
        err
    }

    /// Runs exactly one transition of the loop.
    ///
    /// Once an error has been returned every later call returns it again.
    pub async fn step(&mut self) -> Result<Step, FatalError> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        self.publish(IngestState::Fetching);

        let fetched = fetch_compact_block(self.node.as_ref(), &self.codec, self.height).await;
        let block = match fetched {
            Ok(Some(block)) => block,
            Ok(None) => {
                self.wait(self.policy.poll_interval).await;
                return Ok(Step::Waited { error: None });
            }
            Err(error) => {
                self.retry_count += 1;
                tracing::warn!(height = self.height, retries = self.retry_count, error = %error, "error fetching block");
                if self.retry_count > self.policy.max_retries {
                    return Err(self.fail(FatalError::UnreachableNode {
                        retries: self.retry_count,
                        last_error: error,
                    }));
                }
                let delay = self.policy.poll_interval + self.policy.retry_backoff_step * self.retry_count;
                self.wait(delay).await;
                return Ok(Step::Waited { error: Some(error) });
            }
        };
        self.retry_count = 0;

        if self.caught_up || self.height % 100 == 0 {
            tracing::info!(height = self.height, "ingestor adding block to cache");
        }

        if let Some(latest) = self.cache.latest_hash() {
            if block.prev_hash != latest {
                let target = self.height.saturating_sub(self.policy.rollback_depth);
                let resume = self.cache.reorg(target);
                self.reorg_depth += self.height - resume;
                tracing::warn!(
                    height = self.height,
                    resume,
                    hash = %block.hash,
                    prev_hash = %block.prev_hash,
                    cached = %latest,
                    reorg_depth = self.reorg_depth,
                    "reorg detected"
                );
                self.height = resume;
                if self.reorg_depth > self.policy.max_reorg_depth {
                    return Err(self.fail(FatalError::ReorgDepthExceeded {
                        depth: self.reorg_depth,
                        max: self.policy.max_reorg_depth,
                    }));
                }
                self.publish(IngestState::ReorgRecovery);
                return Ok(Step::Reorged { resume });
            }
        }

        let added = block.height;
        if let Err(e) = self.cache.add(block) {
            return Err(self.fail(e.into()));
        }
        self.reorg_depth = 0;
        self.height += 1;
        self.publish(IngestState::Fetching);
        Ok(Step::Added(added))
    }

    async fn wait(&mut self, delay: Duration) {
        if let Err(e) = self.cache.sync() {
            tracing::warn!(error = %e, "cache sync failed");
        }
        if !self.caught_up {
            tracing::info!(height = self.height, "ingestor caught up with node, waiting");
        }
        self.caught_up = true;
        self.publish(IngestState::Waiting);
        self.sleeper.sleep(delay).await;
    }

    /// Drives `step` until a fatal error or until `cancel` fires.
    ///
    /// Cancellation lands only while a fetch or sleep is pending, so a
    /// cache mutation is never cut in half.
    pub async fn run(mut self, cancel: CancellationToken) -> IngestExit {
        tracing::info!(height = self.height, "ingestor starting");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(height = self.height, "ingestor stopping");
                    if let Err(e) = self.cache.sync() {
                        tracing::warn!(error = %e, "cache sync failed on shutdown");
                    }
                    return IngestExit::Stopped;
                }
                res = self.step() => {
                    if let Err(e) = res {
                        return IngestExit::Fatal(e);
                    }
                }
            }
        }
    }

    pub fn spawn(self) -> IngestorHandle {
        let status = self.subscribe();
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        IngestorHandle { status, cancel, join }
    }
}

/// Control surface for a spawned ingestor.
pub struct IngestorHandle {
    status: watch::Receiver<IngestStatus>,
    cancel: CancellationToken,
    join: JoinHandle<IngestExit>,
}

impl IngestorHandle {
    pub fn status(&self) -> watch::Receiver<IngestStatus> {
        self.status.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits for the loop to end.
    pub async fn wait(self) -> IngestExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => IngestExit::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::NodeError;
    use crate::core::hash::Sha256dHasher;
    use crate::runtime::block_cache::CacheConfig;
    use crate::test_utils::{ChainBuilder, MockNode, RecordingSleeper};

    struct Rig {
        cache: Arc<BlockCache>,
        node: Arc<MockNode>,
        sleeper: Arc<RecordingSleeper>,
        ingestor: Ingestor,
    }

    fn rig(start: u32, max_entries: usize, policy: IngestPolicy) -> Rig {
        let cache = Arc::new(BlockCache::new(CacheConfig { max_entries, start_height: start }));
        let node = Arc::new(MockNode::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let ingestor = Ingestor::new(
            cache.clone(),
            node.clone(),
            HeaderCodec::new(Arc::new(Sha256dHasher)),
            sleeper.clone(),
            policy,
        );
        Rig { cache, node, sleeper, ingestor }
    }

    #[tokio::test]
    async fn appends_until_caught_up() {
        let mut r = rig(10, 100, IngestPolicy::default());
        r.node.set_chain(ChainBuilder::starting_at(10).add_blocks(2).build());

        assert_eq!(r.ingestor.step().await.unwrap(), Step::Added(10));
        assert_eq!(r.ingestor.step().await.unwrap(), Step::Added(11));
        assert_eq!(r.ingestor.step().await.unwrap(), Step::Added(12));
        assert_eq!(r.ingestor.step().await.unwrap(), Step::Waited { error: None });
        assert_eq!(r.ingestor.height(), 13);
        assert_eq!(r.sleeper.sleeps(), vec![Duration::from_secs(10)]);
        assert_eq!(r.ingestor.status().state, IngestState::Waiting);
        assert_eq!(r.cache.latest_height(), Some(12));
    }

    #[tokio::test]
    async fn transient_errors_back_off_and_reset() {
        let mut r = rig(0, 100, IngestPolicy::default());
        r.node.set_chain(ChainBuilder::new().build());
        r.node.fail_all(true);

        for _ in 0..3 {
            assert!(matches!(r.ingestor.step().await.unwrap(), Step::Waited { error: Some(_) }));
        }
        assert_eq!(r.ingestor.status().retries, 3);
        assert_eq!(
            r.sleeper.sleeps(),
            vec![Duration::from_secs(15), Duration::from_secs(20), Duration::from_secs(25)]
        );

        r.node.clear_failures();
        assert_eq!(r.ingestor.step().await.unwrap(), Step::Added(0));
        assert_eq!(r.ingestor.status().retries, 0);
    }

    #[tokio::test]
    async fn fatal_is_sticky() {
        let policy = IngestPolicy { max_retries: 1, ..IngestPolicy::default() };
        let mut r = rig(0, 100, policy);
        r.node.fail_all(true);

        assert!(r.ingestor.step().await.is_ok());
        let err = r.ingestor.step().await.unwrap_err();
        assert_eq!(
            err,
            FatalError::UnreachableNode {
                retries: 2,
                last_error: FetchError::Node(NodeError::Transport(
                    "mock node refused height 0".to_string()
                )),
            }
        );
        assert_eq!(r.ingestor.step().await.unwrap_err(), err);
        assert_eq!(r.node.call_count(), 2);
        assert_eq!(r.ingestor.status().state, IngestState::Fatal);
    }

    #[tokio::test]
    async fn reorg_depth_ceiling_is_fatal() {
        let policy = IngestPolicy { max_reorg_depth: 3, ..IngestPolicy::default() };
        let mut r = rig(0, 100, policy);
        let main = ChainBuilder::new().add_blocks(9).build();
        r.node.set_chain(main);
        for _ in 0..10 {
            r.ingestor.step().await.unwrap();
        }

        // Replace everything from height 3 up; the node serves nothing we
        // can link until the ingestor has rolled back past the fork.
        let fork = ChainBuilder::new().add_blocks(9).fork(7).with_salt(9).add_blocks(8).build();
        r.node.apply_reorg(3, fork[3..].to_vec());

        assert_eq!(r.ingestor.step().await.unwrap(), Step::Reorged { resume: 8 });
        assert_eq!(
            r.ingestor.step().await.unwrap_err(),
            FatalError::ReorgDepthExceeded { depth: 4, max: 3 }
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let r = rig(0, 100, IngestPolicy::default());
        r.node.set_chain(ChainBuilder::new().add_blocks(4).build());
        let handle = r.ingestor.spawn();
        let mut status = handle.status();

        status.wait_for(|s| s.state == IngestState::Waiting).await.unwrap();
        handle.stop();
        assert_eq!(handle.wait().await, IngestExit::Stopped);
        assert_eq!(r.cache.latest_height(), Some(4));
    }
}
