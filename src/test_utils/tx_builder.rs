use crate::core::compact_size::{write_compact_length_prefixed, write_compact_size};
use crate::core::transaction::{
    OVERWINTER_TX_VERSION, OVERWINTER_VERSION_GROUP_ID, OVERWINTERED_FLAG, SAPLING_TX_VERSION,
    SAPLING_VERSION_GROUP_ID,
};

use super::chain_builder::bip34_height_push;

const COIN: u64 = 100_000_000;

/// Serializes transactions in the Zcash-family wire format.
///
/// Proofs, signatures and the Sprout JoinSplit bodies are filled with
/// deterministic junk of the right length.
#[derive(Clone, Debug)]
pub struct TxBuilder {
    overwintered: bool,
    version: u32,
    version_group_id: u32,
    inputs: Vec<([u8; 32], u32, Vec<u8>)>,
    outputs: Vec<(u64, Vec<u8>)>,
    spends: Vec<[u8; 32]>,
    shielded_outputs: Vec<([u8; 32], [u8; 32], Vec<u8>)>,
    join_splits: u64,
}

impl TxBuilder {
    pub fn sapling() -> Self {
        Self::overwintered(SAPLING_TX_VERSION, SAPLING_VERSION_GROUP_ID)
    }

    pub fn overwinter() -> Self {
        Self::overwintered(OVERWINTER_TX_VERSION, OVERWINTER_VERSION_GROUP_ID)
    }

    /// Pre-Overwinter transaction, version 1 or 2.
    pub fn legacy(version: u32) -> Self {
        Self { overwintered: false, version, version_group_id: 0, ..Self::sapling() }
    }

    /// Sapling coinbase committing to `height`, with `extra` appended to the scriptSig
    pub fn coinbase(height: u32, extra: &[u8]) -> Self {
        let mut script = bip34_height_push(height);
        script.push(extra.len() as u8);
        script.extend_from_slice(extra);
        Self::sapling().input([0u8; 32], u32::MAX, script).output(50 * COIN, Vec::new())
    }

    fn overwintered(version: u32, version_group_id: u32) -> Self {
        Self {
            overwintered: true,
            version,
            version_group_id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            spends: Vec::new(),
            shielded_outputs: Vec::new(),
            join_splits: 0,
        }
    }

    pub fn input(mut self, prevout_hash: [u8; 32], prevout_index: u32, script_sig: Vec<u8>) -> Self {
        self.inputs.push((prevout_hash, prevout_index, script_sig));
        self
    }

    pub fn output(mut self, value: u64, script_pubkey: Vec<u8>) -> Self {
        self.outputs.push((value, script_pubkey));
        self
    }

    pub fn spend(mut self, nullifier: [u8; 32]) -> Self {
        self.spends.push(nullifier);
        self
    }

    pub fn shielded_output(mut self, cmu: [u8; 32], ephemeral_key: [u8; 32], enc_ciphertext: Vec<u8>) -> Self {
        assert_eq!(enc_ciphertext.len(), 580, "note ciphertext is 580 bytes");
        self.shielded_outputs.push((cmu, ephemeral_key, enc_ciphertext));
        self
    }

    pub fn join_splits(mut self, count: u64) -> Self {
        self.join_splits = count;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let sapling = self.overwintered && self.version >= SAPLING_TX_VERSION;
        let mut buf = Vec::new();

        let header = if self.overwintered { self.version | OVERWINTERED_FLAG } else { self.version };
        buf.extend_from_slice(&header.to_le_bytes());
        if self.overwintered {
            buf.extend_from_slice(&self.version_group_id.to_le_bytes());
        }

        write_compact_size(&mut buf, self.inputs.len() as u64);
        for (hash, index, script) in &self.inputs {
            buf.extend_from_slice(hash);
            buf.extend_from_slice(&index.to_le_bytes());
            write_compact_length_prefixed(&mut buf, script);
            buf.extend_from_slice(&u32::MAX.to_le_bytes());
        }
        write_compact_size(&mut buf, self.outputs.len() as u64);
        for (value, script) in &self.outputs {
            buf.extend_from_slice(&value.to_le_bytes());
            write_compact_length_prefixed(&mut buf, script);
        }

        buf.extend_from_slice(&0u32.to_le_bytes()); // lock time
        if self.overwintered {
            buf.extend_from_slice(&0u32.to_le_bytes()); // expiry height
        }

        if sapling {
            buf.extend_from_slice(&0i64.to_le_bytes());
            write_compact_size(&mut buf, self.spends.len() as u64);
            for nullifier in &self.spends {
                buf.extend_from_slice(&[0x01; 64]); // cv, anchor
                buf.extend_from_slice(nullifier);
                buf.extend_from_slice(&[0x02; 32 + 192 + 64]); // rk, proof, auth sig
            }
            write_compact_size(&mut buf, self.shielded_outputs.len() as u64);
            for (cmu, epk, enc) in &self.shielded_outputs {
                buf.extend_from_slice(&[0x03; 32]); // cv
                buf.extend_from_slice(cmu);
                buf.extend_from_slice(epk);
                buf.extend_from_slice(enc);
                buf.extend_from_slice(&[0x04; 80 + 192]); // out ciphertext, proof
            }
        }

        if self.version >= 2 {
            write_compact_size(&mut buf, self.join_splits);
            let proof = if sapling { 192 } else { 296 };
            for _ in 0..self.join_splits {
                buf.extend(std::iter::repeat_n(0x05, 8 + 8 + 32 + 64 + 64 + 32 + 32 + 64 + proof + 2 * 601));
            }
            if self.join_splits > 0 {
                buf.extend_from_slice(&[0x06; 32 + 64]);
            }
        }

        if sapling && !(self.spends.is_empty() && self.shielded_outputs.is_empty()) {
            buf.extend_from_slice(&[0x07; 64]);
        }
        buf
    }
}
