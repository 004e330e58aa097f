use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::core::block::CompactBlock;
use crate::core::errors::ConsistencyError;
use crate::core::hash::BlockHash;
use crate::runtime::cache_store::{CacheSnapshot, CacheStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on cached blocks; the lowest entry is evicted beyond it.
    pub max_entries: usize,
    /// Height the first `add` must carry when the cache starts empty.
    pub start_height: u32,
}

/// Range, size and top hash of the cache, all taken under one read lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CacheView {
    pub first_height: u32,
    pub next_height: u32,
    pub len: usize,
    pub max_entries: usize,
    pub latest_hash: Option<BlockHash>,
}

/// Contiguous run of blocks ending just below `next_height`.
struct CacheWindow {
    next_height: u32,
    blocks: VecDeque<CompactBlock>,
    /// Bumped on every mutation, so `sync` can skip unchanged windows.
    generation: u64,
}

impl CacheWindow {
    fn first_height(&self) -> u32 {
        self.next_height - self.blocks.len() as u32
    }

    fn get(&self, height: u32) -> Option<&CompactBlock> {
        let first = self.first_height();
        if height < first || height >= self.next_height {
            return None;
        }
        self.blocks.get((height - first) as usize)
    }
}

/// Bounded, height-indexed window of recently ingested compact blocks.
///
/// One writer (the ingestor) and any number of readers. The top hash is
/// read from the window itself, so a reader never sees it disagree with the
/// cached range.
pub struct BlockCache {
    inner: RwLock<CacheWindow>,
    max_entries: usize,
    store: Option<CacheStore>,
    synced_generation: AtomicU64,
}

impl BlockCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(CacheWindow {
                next_height: config.start_height,
                blocks: VecDeque::new(),
                generation: 0,
            }),
            max_entries: config.max_entries.max(1),
            store: None,
            synced_generation: AtomicU64::new(0),
        }
    }

    /// Builds a cache backed by `store`, restoring its snapshot when the
    /// snapshot is internally consistent.
    pub fn open(config: CacheConfig, store: CacheStore) -> Result<Self, StoreError> {
        let snapshot = store.load()?;
        let mut cache = Self::new(config);

        if let Some(snapshot) = snapshot {
            match validate_snapshot(snapshot) {
                Ok(mut snapshot) => {
                    let excess = snapshot.blocks.len().saturating_sub(cache.max_entries);
                    snapshot.blocks.drain(..excess);
                    tracing::info!(
                        first = snapshot.next_height - snapshot.blocks.len() as u32,
                        next = snapshot.next_height,
                        "restored block cache snapshot"
                    );
                    cache.inner = RwLock::new(CacheWindow {
                        next_height: snapshot.next_height,
                        blocks: snapshot.blocks.into(),
                        generation: 0,
                    });
                }
                Err(reason) => {
                    tracing::warn!(%reason, "discarding block cache snapshot");
                }
            }
        }

        cache.store = Some(store);
        Ok(cache)
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheWindow> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheWindow> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, height: u32) -> Option<CompactBlock> {
        self.read().get(height).cloned()
    }

    /// Appends the block at the next height, evicting the lowest entry when
    /// the window is full.
    pub fn add(&self, block: CompactBlock) -> Result<(), ConsistencyError> {
        let mut window = self.write();
        if block.height != window.next_height {
            return Err(ConsistencyError { expected: window.next_height, actual: block.height });
        }
        window.blocks.push_back(block);
        window.next_height += 1;
        if window.blocks.len() > self.max_entries {
            window.blocks.pop_front();
        }
        window.generation += 1;
        Ok(())
    }

    /// Drops every block at or above `height` and returns the height to
    /// fetch next.
    pub fn reorg(&self, height: u32) -> u32 {
        let mut window = self.write();
        let resume = height.min(window.next_height);
        let first = window.first_height();
        if resume <= first {
            window.blocks.clear();
        } else {
            let keep = (resume - first) as usize;
            window.blocks.truncate(keep);
        }
        window.next_height = resume;
        window.generation += 1;
        resume
    }

    /// Makes the current window durable when a store is configured.
    pub fn sync(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            tracing::debug!(next = self.next_height(), len = self.len(), "cache synced");
            return Ok(());
        };

        let (generation, snapshot) = {
            let window = self.read();
            if window.generation == self.synced_generation.load(Ordering::Acquire) {
                return Ok(());
            }
            let snapshot = CacheSnapshot {
                first_height: window.first_height(),
                next_height: window.next_height,
                blocks: window.blocks.iter().cloned().collect(),
            };
            (window.generation, snapshot)
        };

        store.persist(&snapshot)?;
        self.synced_generation.store(generation, Ordering::Release);
        tracing::debug!(
            first = snapshot.first_height,
            next = snapshot.next_height,
            "cache snapshot persisted"
        );
        Ok(())
    }

    /// Hash of the highest cached block.
    pub fn latest_hash(&self) -> Option<BlockHash> {
        self.read().blocks.back().map(|b| b.hash)
    }

    /// Height and hash of the highest cached block, read together.
    pub fn tip(&self) -> Option<(u32, BlockHash)> {
        self.read().blocks.back().map(|b| (b.height, b.hash))
    }

    pub fn next_height(&self) -> u32 {
        self.read().next_height
    }

    pub fn first_height(&self) -> u32 {
        self.read().first_height()
    }

    pub fn latest_height(&self) -> Option<u32> {
        self.read().blocks.back().map(|b| b.height)
    }

    pub fn len(&self) -> usize {
        self.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().blocks.is_empty()
    }

    /// Consistent snapshot of the window bounds and top hash.
    pub fn view(&self) -> CacheView {
        let window = self.read();
        CacheView {
            first_height: window.first_height(),
            next_height: window.next_height,
            len: window.blocks.len(),
            max_entries: self.max_entries,
            latest_hash: window.blocks.back().map(|b| b.hash),
        }
    }
}

fn validate_snapshot(snapshot: CacheSnapshot) -> Result<CacheSnapshot, String> {
    let len = snapshot.blocks.len() as u32;
    if snapshot.next_height.checked_sub(snapshot.first_height) != Some(len) {
        return Err(format!(
            "window [{}, {}) does not hold {} blocks",
            snapshot.first_height, snapshot.next_height, len
        ));
    }
    for (i, pair) in snapshot.blocks.windows(2).enumerate() {
        if pair[1].height != pair[0].height + 1 {
            return Err(format!("gap after height {}", pair[0].height));
        }
        if pair[1].prev_hash != pair[0].hash {
            return Err(format!("block {} does not link to its parent (index {})", pair[1].height, i + 1));
        }
    }
    if let Some(first) = snapshot.blocks.first() {
        if first.height != snapshot.first_height {
            return Err(format!("first block is {}, window starts at {}", first.height, snapshot.first_height));
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn block(height: u32, salt: u8) -> CompactBlock {
        CompactBlock {
            height,
            hash: BlockHash([height as u8 ^ salt; 32]),
            prev_hash: BlockHash([(height as u8).wrapping_sub(1) ^ salt; 32]),
            time: 0,
            header: Vec::new(),
            vtx: Vec::new(),
        }
    }

    fn filled(start: u32, end: u32, max: usize) -> BlockCache {
        let cache = BlockCache::new(CacheConfig { max_entries: max, start_height: start });
        for h in start..=end {
            cache.add(block(h, 0)).unwrap();
        }
        cache
    }

    #[test]
    fn get_is_absent_outside_window() {
        let cache = filled(10, 12, 10);
        assert!(cache.get(9).is_none());
        assert_eq!(cache.get(11).unwrap().height, 11);
        assert!(cache.get(13).is_none());
    }

    #[test]
    fn add_evicts_lowest_and_tracks_latest_hash() {
        let cache = filled(10, 12, 3);
        cache.add(block(13, 0)).unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.first_height(), 11);
        assert!(cache.get(10).is_none());
        assert_eq!(cache.latest_hash(), Some(block(13, 0).hash));
        assert_eq!(cache.tip(), Some((13, block(13, 0).hash)));
    }

    #[test]
    fn add_rejects_gaps_and_repeats() {
        let cache = filled(10, 12, 10);
        assert_eq!(
            cache.add(block(14, 0)).unwrap_err(),
            ConsistencyError { expected: 13, actual: 14 }
        );
        assert_eq!(
            cache.add(block(12, 0)).unwrap_err(),
            ConsistencyError { expected: 13, actual: 12 }
        );
        assert_eq!(cache.latest_height(), Some(12));
    }

    #[test]
    fn empty_cache_takes_start_height_only() {
        let cache = BlockCache::new(CacheConfig { max_entries: 5, start_height: 100 });
        assert!(cache.latest_hash().is_none());
        assert!(cache.add(block(99, 0)).is_err());
        cache.add(block(100, 0)).unwrap();
        assert_eq!(cache.next_height(), 101);
    }

    #[test]
    fn reorg_truncates_top() {
        let cache = filled(5, 12, 20);
        assert_eq!(cache.reorg(11), 11);
        assert_eq!(cache.latest_height(), Some(10));
        assert_eq!(cache.latest_hash(), Some(block(10, 0).hash));
        assert!(cache.get(11).is_none());

        // Resume with a different branch.
        cache.add(block(11, 0x55)).unwrap();
        assert_eq!(cache.latest_hash(), Some(block(11, 0x55).hash));
    }

    #[test]
    fn reorg_above_top_is_noop() {
        let cache = filled(5, 8, 20);
        assert_eq!(cache.reorg(20), 9);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn reorg_below_window_clears() {
        let cache = filled(5, 8, 20);
        assert_eq!(cache.reorg(3), 3);
        assert!(cache.is_empty());
        assert!(cache.latest_hash().is_none());
        cache.add(block(3, 0)).unwrap();
        assert_eq!(cache.first_height(), 3);
    }

    #[test]
    fn view_matches_window() {
        let cache = filled(10, 14, 3);
        assert_eq!(
            cache.view(),
            CacheView {
                first_height: 12,
                next_height: 15,
                len: 3,
                max_entries: 3,
                latest_hash: Some(block(14, 0).hash),
            }
        );
        cache.reorg(0);
        let view = cache.view();
        assert_eq!((view.first_height, view.next_height, view.len), (0, 0, 0));
        assert!(view.latest_hash.is_none());
    }

    /// Hash whose first four bytes carry the height, so readers can check
    /// that a top hash belongs to the top height.
    fn tagged(height: u32, salt: u8) -> CompactBlock {
        let mut hash = [salt; 32];
        hash[..4].copy_from_slice(&height.to_le_bytes());
        CompactBlock { hash: BlockHash(hash), ..block(height, salt) }
    }

    #[test]
    fn readers_never_see_a_torn_window() {
        let cache = BlockCache::new(CacheConfig { max_entries: 3, start_height: 0 });
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for round in 0..20_000u32 {
                    let next = cache.next_height();
                    cache.add(tagged(next, round as u8)).unwrap();
                    if round % 3 == 2 {
                        cache.reorg(next.saturating_sub(1));
                    }
                }
                done.store(true, Ordering::Release);
            });

            for _ in 0..2 {
                s.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let view = cache.view();
                        assert_eq!(view.next_height - view.first_height, view.len as u32);
                        assert!(view.len <= view.max_entries);
                        match view.latest_hash {
                            Some(hash) => {
                                assert_eq!(hash.0[..4], (view.next_height - 1).to_le_bytes())
                            }
                            None => assert_eq!(view.len, 0),
                        }

                        if let Some((height, hash)) = cache.tip() {
                            assert_eq!(hash.0[..4], height.to_le_bytes());
                            if let Some(found) = cache.get(height) {
                                assert_eq!(found.height, height);
                            }
                        }
                    }
                });
            }
        });

        let view = cache.view();
        assert_eq!(view.len, 3);
        assert_eq!(view.latest_hash.unwrap().0[..4], (view.next_height - 1).to_le_bytes());
    }

    #[test]
    fn sync_then_open_restores_window() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig { max_entries: 10, start_height: 0 };
        {
            let cache = BlockCache::open(config, CacheStore::open(dir.path()).unwrap()).unwrap();
            for h in 0..5 {
                cache.add(block(h, 0)).unwrap();
            }
            cache.sync().unwrap();
        }

        let cache = BlockCache::open(config, CacheStore::open(dir.path()).unwrap()).unwrap();
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.next_height(), 5);
        assert_eq!(cache.latest_hash(), Some(block(4, 0).hash));
    }

    #[test]
    fn open_keeps_only_highest_entries() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store
            .persist(&CacheSnapshot {
                first_height: 0,
                next_height: 6,
                blocks: (0..6).map(|h| block(h, 0)).collect(),
            })
            .unwrap();

        let config = CacheConfig { max_entries: 2, start_height: 0 };
        let cache = BlockCache::open(config, store).unwrap();
        assert_eq!(cache.first_height(), 4);
        assert_eq!(cache.next_height(), 6);
    }

    #[test]
    fn open_discards_unlinked_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store
            .persist(&CacheSnapshot {
                first_height: 0,
                next_height: 3,
                blocks: vec![block(0, 0), block(1, 0), block(2, 0x77)],
            })
            .unwrap();

        let config = CacheConfig { max_entries: 10, start_height: 42 };
        let cache = BlockCache::open(config, store).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.next_height(), 42);
    }
}
