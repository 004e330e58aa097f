use crate::core::compact_size::write_compact_size;
use crate::core::hash::{BlockHash, BlockHasher, Sha256dHasher};
use crate::core::header::{EQUIHASH_SOLUTION_SIZE, RawBlockHeader};

use super::tx_builder::TxBuilder;

/// A block as served by a node, plus the identity fields tests assert on.
#[derive(Clone, Debug)]
pub struct BuiltBlock {
    pub height: u32,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub bytes: Vec<u8>,
}

/// Builder for linked sequences of raw blocks
pub struct ChainBuilder {
    blocks: Vec<BuiltBlock>,
    salt: u64,
    solution_len: usize,
}

impl ChainBuilder {
    /// Chain whose first block sits at height 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Chain whose first block sits at `height`, with an all-zero parent
    pub fn starting_at(height: u32) -> Self {
        let mut builder = Self { blocks: Vec::new(), salt: 0, solution_len: EQUIHASH_SOLUTION_SIZE };
        let first = builder.create_block(height, BlockHash::ZERO, 1_600_000_000);
        builder.blocks.push(first);
        builder
    }

    /// Continue an existing chain
    pub fn from_chain(blocks: Vec<BuiltBlock>) -> Self {
        assert!(!blocks.is_empty(), "chain should not be empty");
        Self { blocks, salt: 0, solution_len: EQUIHASH_SOLUTION_SIZE }
    }

    /// Add a specified number of blocks to the chain
    pub fn add_blocks(mut self, count: u32) -> Self {
        for _ in 0..count {
            let next_block = self.create_next_block();
            self.blocks.push(next_block);
        }
        self
    }

    /// Drop the top `back` blocks so the next `add_blocks` forks from there
    pub fn fork(mut self, back: u32) -> Self {
        let keep = self.blocks.len().saturating_sub(back as usize).max(1);
        self.blocks.truncate(keep);
        self
    }

    /// Change the salt to generate different block hashes (useful for reorg testing)
    pub fn with_salt(mut self, salt: u64) -> Self {
        self.salt = salt;
        self
    }

    /// Solution size for blocks added from here on (regtest uses 36)
    pub fn with_solution_len(mut self, len: usize) -> Self {
        self.solution_len = len;
        self
    }

    pub fn build(self) -> Vec<BuiltBlock> {
        self.blocks
    }

    /// Height of the current tip
    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn tip(&self) -> &BuiltBlock {
        // `starting_at` always seeds one block and `fork` never removes it.
        &self.blocks[self.blocks.len() - 1]
    }

    fn create_next_block(&self) -> BuiltBlock {
        let prev = self.tip();
        let time = 1_600_000_000 + (prev.height + 1) * 150;
        self.create_block(prev.height + 1, prev.hash, time)
    }

    fn create_block(&self, height: u32, prev_hash: BlockHash, time: u32) -> BuiltBlock {
        // Coinbase committing to `height`, salted so forks get distinct txids.
        let coinbase = TxBuilder::coinbase(height, &self.salt.to_le_bytes()).build();

        let mut nonce = [0u8; 32];
        nonce[..4].copy_from_slice(&height.to_le_bytes());
        nonce[4..12].copy_from_slice(&self.salt.to_le_bytes());

        let raw = RawBlockHeader {
            version: 4,
            prev_block: prev_hash.0,
            // Single transaction, so the merkle root is its txid.
            merkle_root: Sha256dHasher.digest(&coinbase),
            commitment_root: [0u8; 32],
            time,
            nbits: 0x207f_ffffu32.to_le_bytes(),
            nonce,
            solution: (0..self.solution_len).map(|i| (i as u8) ^ (height as u8)).collect(),
        };

        let mut bytes = raw.encode();
        let hash = BlockHash(Sha256dHasher.digest(&bytes));
        write_compact_size(&mut bytes, 1);
        bytes.extend_from_slice(&coinbase);

        BuiltBlock { height, hash, prev_hash, bytes }
    }
}

/// Minimal script-number push of `height`.
pub fn bip34_height_push(height: u32) -> Vec<u8> {
    match height {
        0 => vec![0x00],
        1..=16 => vec![0x50 + height as u8],
        _ => {
            let mut le: Vec<u8> = height.to_le_bytes().to_vec();
            while le.last() == Some(&0) {
                le.pop();
            }
            if le.last().is_some_and(|b| b & 0x80 != 0) {
                le.push(0);
            }
            let mut push = vec![le.len() as u8];
            push.extend_from_slice(&le);
            push
        }
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder_basic() {
        let chain = ChainBuilder::new().add_blocks(10).build();

        assert_eq!(chain.len(), 11);

        for i in 1..chain.len() {
            assert_eq!(chain[i].prev_hash, chain[i - 1].hash);
            assert_eq!(chain[i].height, i as u32);
        }
    }

    #[test]
    fn test_chain_fork() {
        let main_chain = ChainBuilder::new().add_blocks(10).build();

        let fork_chain = ChainBuilder::new()
            .add_blocks(10)
            .fork(5) // heights 0..=5 remain
            .with_salt(1)
            .add_blocks(7)
            .build();

        for i in 0..=5 {
            assert_eq!(main_chain[i].hash, fork_chain[i].hash);
        }
        assert_ne!(main_chain[6].hash, fork_chain[6].hash);
        assert_eq!(fork_chain[6].prev_hash, main_chain[5].hash);
        assert_eq!(fork_chain.last().unwrap().height, 12);
    }

    #[test]
    fn test_solution_len_applies_to_new_blocks() {
        let chain = ChainBuilder::new().with_solution_len(36).add_blocks(2).build();
        let solution_prefix = crate::core::header::HEADER_SIZE_MINUS_SOLUTION;
        // First block keeps the mainnet size, later ones use the override.
        assert_eq!(&chain[0].bytes[solution_prefix..solution_prefix + 3], &[0xfd, 0x40, 0x05]);
        assert_eq!(chain[1].bytes[solution_prefix], 36);
        assert_eq!(chain[2].bytes[solution_prefix], 36);
        assert_eq!(chain[2].prev_hash, chain[1].hash);
    }

    #[test]
    fn test_height_push_is_minimal() {
        assert_eq!(bip34_height_push(0), vec![0x00]);
        assert_eq!(bip34_height_push(16), vec![0x60]);
        assert_eq!(bip34_height_push(17), vec![0x01, 0x11]);
        assert_eq!(bip34_height_push(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(bip34_height_push(1_000_000), vec![0x03, 0x40, 0x42, 0x0f]);
    }
}
