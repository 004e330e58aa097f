//! Full block decoding and the compact projection served to wallets.
//!
//! A raw block is `header ‖ CompactSize(tx count) ‖ tx*`, transactions in the
//! Zcash-family envelope (see [`crate::core::transaction`]).

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::core::errors::DecodeError;
use crate::core::hash::BlockHash;
use crate::core::header::{BlockHeader, ByteReader, HeaderCodec};
use crate::core::transaction::{MIN_TX_SIZE, Transaction, bounded_capacity};

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// A decoded block: header plus its transactions.
#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Decodes one block off the front of `input`, returning the unread tail.
    pub fn decode<'a>(codec: &HeaderCodec, input: &'a [u8]) -> Result<(Self, &'a [u8]), DecodeError> {
        let (header, rest) = codec.decode(input)?;
        let mut r = ByteReader::new(rest);
        let count = r.read_compact_size("transaction count")?;

        let mut rest = r.rest();
        let mut transactions = Vec::with_capacity(bounded_capacity(count, rest.len(), MIN_TX_SIZE));
        for index in 0..count {
            let index = index as usize;
            let (tx, tail) = Transaction::decode(rest)
                .map_err(|e| DecodeError::InvalidTransaction { index, reason: e.to_string() })?;
            transactions.push(tx);
            rest = tail;
        }

        Ok((Self { header, transactions }, rest))
    }

    /// Height committed to by the coinbase (BIP34 push at the start of its scriptSig).
    pub fn height(&self) -> Result<u32, DecodeError> {
        let coinbase = self.transactions.first().ok_or(DecodeError::MissingCoinbaseHeight)?;
        let input = coinbase.inputs.first().ok_or(DecodeError::MissingCoinbaseHeight)?;
        coinbase_height(&input.script_sig).ok_or(DecodeError::MissingCoinbaseHeight)
    }

    pub fn to_compact(&self) -> Result<CompactBlock, DecodeError> {
        let vtx = self
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| CompactTx {
                index: index as u64,
                txid: tx.txid(),
                outputs: tx
                    .outputs
                    .iter()
                    .map(|out| CompactOutput { value: out.value, script_pubkey: out.script_pubkey.clone() })
                    .collect(),
                spends: tx
                    .shielded_spends
                    .iter()
                    .map(|spend| CompactSaplingSpend { nf: spend.nullifier })
                    .collect(),
                shielded_outputs: tx
                    .shielded_outputs
                    .iter()
                    .map(|out| CompactSaplingOutput {
                        cmu: out.cmu,
                        ephemeral_key: out.ephemeral_key,
                        ciphertext: out.compact_ciphertext().to_vec(),
                    })
                    .collect(),
            })
            .collect();

        Ok(CompactBlock {
            height: self.height()?,
            hash: self.header.encodable_hash(),
            prev_hash: self.header.prev_hash(),
            time: self.header.raw().time,
            header: self.header.encode(),
            vtx,
        })
    }
}

fn coinbase_height(script_sig: &[u8]) -> Option<u32> {
    let (&op, rest) = script_sig.split_first()?;
    match op {
        OP_0 => Some(0),
        OP_1..=OP_16 => Some(u32::from(op - OP_1) + 1),
        n @ 1..=8 => {
            let push = rest.get(..n as usize)?;
            let mut le = [0u8; 8];
            le[..push.len()].copy_from_slice(push);
            u32::try_from(u64::from_le_bytes(le)).ok()
        }
        _ => None,
    }
}

/// Per-transaction scan summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompactTx {
    pub index: u64,
    /// Wire order.
    #[serde(with = "hex::serde")]
    pub txid: [u8; 32],
    pub outputs: Vec<CompactOutput>,
    pub spends: Vec<CompactSaplingSpend>,
    pub shielded_outputs: Vec<CompactSaplingOutput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompactOutput {
    pub value: u64,
    #[serde(with = "hex::serde")]
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompactSaplingSpend {
    #[serde(with = "hex::serde")]
    pub nf: [u8; 32],
}

/// Enough of a Sapling output for trial decryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompactSaplingOutput {
    #[serde(with = "hex::serde")]
    pub cmu: [u8; 32],
    #[serde(with = "hex::serde")]
    pub ephemeral_key: [u8; 32],
    /// First 52 bytes of the note ciphertext.
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// The reduced per-block record held in the cache and served to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompactBlock {
    pub height: u32,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub time: u32,
    /// Encoded header, as received.
    #[serde(with = "hex::serde")]
    pub header: Vec<u8>,
    pub vtx: Vec<CompactTx>,
}

/// Decodes a whole block fetched for `expected_height` and projects it.
///
/// Leftover bytes and a coinbase height other than the requested one are
/// both rejected.
pub fn parse_compact_block(
    codec: &HeaderCodec,
    bytes: &[u8],
    expected_height: u32,
) -> Result<CompactBlock, DecodeError> {
    let (block, rest) = Block::decode(codec, bytes)?;
    if !rest.is_empty() {
        return Err(DecodeError::OverlongMessage { extra: rest.len() });
    }
    let compact = block.to_compact()?;
    if compact.height != expected_height {
        return Err(DecodeError::UnexpectedHeight {
            expected: expected_height,
            actual: compact.height,
        });
    }
    Ok(compact)
}
