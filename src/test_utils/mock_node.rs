use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::core::blockfetcher::{ChainInfo, NodeAdapter};
use crate::core::errors::NodeError;
use crate::test_utils::chain_builder::BuiltBlock;

#[derive(Default)]
struct MockState {
    blocks: BTreeMap<u32, BuiltBlock>,
    fail_heights: HashSet<u32>,
    fail_all: bool,
    chain_info_failures: u32,
    calls: Vec<u32>,
}

/// Scriptable in-memory node.
///
/// Serves whatever blocks it was given by height, reports missing heights as
/// not yet available, and fails on demand.
pub struct MockNode {
    state: Mutex<MockState>,
    chain_info: ChainInfo,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            chain_info: ChainInfo {
                chain: "regtest".to_string(),
                activation_height: 0,
                headers: 0,
                branch_id: "c2d6d0b4".to_string(),
            },
        }
    }

    pub fn with_chain(blocks: Vec<BuiltBlock>) -> Self {
        let node = Self::new();
        node.set_chain(blocks);
        node
    }

    /// Replace everything the node serves
    pub fn set_chain(&self, blocks: Vec<BuiltBlock>) {
        let mut state = self.state.lock().unwrap();
        state.blocks = blocks.into_iter().map(|b| (b.height, b)).collect();
    }

    pub fn add_block(&self, block: BuiltBlock) {
        self.state.lock().unwrap().blocks.insert(block.height, block);
    }

    /// Serve arbitrary bytes at `height`
    pub fn insert_raw(&self, height: u32, bytes: Vec<u8>) {
        let block = BuiltBlock {
            height,
            hash: Default::default(),
            prev_hash: Default::default(),
            bytes,
        };
        self.state.lock().unwrap().blocks.insert(height, block);
    }

    /// Simulate a reorg: drop every block from `fork_height` up, then serve `new_blocks`
    pub fn apply_reorg(&self, fork_height: u32, new_blocks: Vec<BuiltBlock>) {
        let mut state = self.state.lock().unwrap();
        state.blocks.retain(|height, _| *height < fork_height);
        for block in new_blocks {
            state.blocks.insert(block.height, block);
        }
    }

    pub fn block_at(&self, height: u32) -> Option<BuiltBlock> {
        self.state.lock().unwrap().blocks.get(&height).cloned()
    }

    pub fn tip_height(&self) -> Option<u32> {
        self.state.lock().unwrap().blocks.keys().next_back().copied()
    }

    pub fn fail_at(&self, height: u32) {
        self.state.lock().unwrap().fail_heights.insert(height);
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_heights.clear();
        state.fail_all = false;
    }

    /// Fail the next `times` chain info requests
    pub fn fail_chain_info(&self, times: u32) {
        self.state.lock().unwrap().chain_info_failures = times;
    }

    pub fn chain_info_value(&self) -> ChainInfo {
        self.chain_info.clone()
    }

    /// Heights requested through `fetch_block`, in order
    pub fn calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeAdapter for MockNode {
    async fn fetch_block(&self, height: u32) -> Result<Option<Vec<u8>>, NodeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(height);
        if state.fail_all || state.fail_heights.contains(&height) {
            return Err(NodeError::Transport(format!("mock node refused height {height}")));
        }
        Ok(state.blocks.get(&height).map(|b| b.bytes.clone()))
    }

    async fn chain_info(&self) -> Result<ChainInfo, NodeError> {
        let mut state = self.state.lock().unwrap();
        if state.chain_info_failures > 0 {
            state.chain_info_failures -= 1;
            return Err(NodeError::Transport("mock node unavailable".to_string()));
        }
        let mut info = self.chain_info.clone();
        if let Some(tip) = state.blocks.keys().next_back() {
            info.headers = *tip;
        }
        Ok(info)
    }
}
