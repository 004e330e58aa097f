use borsh::BorshDeserialize;
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::block::CompactBlock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] std::io::Error),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// A cache window as written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub first_height: u32,
    pub next_height: u32,
    pub blocks: Vec<CompactBlock>,
}

/// Durable copy of the block cache window.
///
/// Storage keys:
/// - `block/{height_be4}` → borsh `CompactBlock`
/// - `meta/window` → borsh `(first_height, next_height)`
pub struct CacheStore {
    db: DB,
}

impl CacheStore {
    const BLOCK_PREFIX: &'static [u8] = b"block/";
    // First key past every `block/` key.
    const BLOCK_END: &'static [u8] = b"block0";
    const WINDOW_KEY: &'static [u8] = b"meta/window";

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        Ok(Self { db: DB::open(&opts, path)? })
    }

    fn block_key(height: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(Self::BLOCK_PREFIX.len() + 4);
        key.extend_from_slice(Self::BLOCK_PREFIX);
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    /// Replaces whatever was stored with `snapshot` in one atomic batch.
    pub fn persist(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        batch.delete_range(Self::BLOCK_PREFIX, Self::BLOCK_END);
        for block in &snapshot.blocks {
            batch.put(Self::block_key(block.height), borsh::to_vec(block)?);
        }
        batch.put(Self::WINDOW_KEY, borsh::to_vec(&(snapshot.first_height, snapshot.next_height))?);
        self.db.write(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Reads the stored window, if one was ever persisted.
    pub fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        let Some(meta) = self.db.get(Self::WINDOW_KEY)? else {
            return Ok(None);
        };
        let (first_height, next_height) = <(u32, u32)>::try_from_slice(&meta)?;

        let mut blocks = Vec::new();
        for res in self.db.iterator(IteratorMode::From(Self::BLOCK_PREFIX, Direction::Forward)) {
            let (key, value) = res?;
            if !key.starts_with(Self::BLOCK_PREFIX) {
                break;
            }
            let height_bytes: [u8; 4] = key[Self::BLOCK_PREFIX.len()..]
                .try_into()
                .map_err(|_| StoreError::Corrupt(format!("bad block key {}", hex::encode(&key))))?;
            let height = u32::from_be_bytes(height_bytes);
            let block = CompactBlock::try_from_slice(&value)?;
            if block.height != height {
                return Err(StoreError::Corrupt(format!(
                    "block stored under height {height} claims height {}",
                    block.height
                )));
            }
            blocks.push(block);
        }

        Ok(Some(CacheSnapshot { first_height, next_height, blocks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::BlockHash;
    use tempfile::TempDir;

    fn block(height: u32) -> CompactBlock {
        CompactBlock {
            height,
            hash: BlockHash([height as u8; 32]),
            prev_hash: BlockHash([height.wrapping_sub(1) as u8; 32]),
            time: 1_600_000_000 + height,
            header: vec![0xaa; 8],
            vtx: Vec::new(),
        }
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn persist_replaces_previous_window() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        let first = CacheSnapshot {
            first_height: 10,
            next_height: 14,
            blocks: (10..14).map(block).collect(),
        };
        store.persist(&first).unwrap();
        assert_eq!(store.load().unwrap(), Some(first));

        let second = CacheSnapshot {
            first_height: 10,
            next_height: 12,
            blocks: (10..12).map(block).collect(),
        };
        store.persist(&second).unwrap();
        assert_eq!(store.load().unwrap(), Some(second));
    }

    #[test]
    fn reopen_sees_flushed_window() {
        let dir = TempDir::new().unwrap();
        let snapshot = CacheSnapshot {
            first_height: 300,
            next_height: 302,
            blocks: vec![block(300), block(301)],
        };
        {
            let store = CacheStore::open(dir.path()).unwrap();
            store.persist(&snapshot).unwrap();
        }
        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }
}
