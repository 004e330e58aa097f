//! Transaction envelope for Zcash-family chains (Sprout through Sapling).
//!
//! Only what a compact block needs is kept: transparent inputs and outputs,
//! Sapling nullifiers and note commitments. Sprout JoinSplits, proofs and
//! signatures are skipped by size. The txid is the double SHA-256 of the exact
//! bytes consumed.

use bitcoin::hashes::{Hash, sha256d};

use crate::core::errors::DecodeError;
use crate::core::header::ByteReader;

/// Set in the version field of every Overwinter-or-later transaction.
pub const OVERWINTERED_FLAG: u32 = 1 << 31;
pub const OVERWINTER_VERSION_GROUP_ID: u32 = 0x03C4_8270;
pub const SAPLING_VERSION_GROUP_ID: u32 = 0x892F_2085;
pub const OVERWINTER_TX_VERSION: u32 = 3;
pub const SAPLING_TX_VERSION: u32 = 4;

/// Smallest possible transaction: v1 with empty input and output lists.
pub const MIN_TX_SIZE: usize = 10;

/// Bytes of note ciphertext a light client needs for trial decryption.
pub const COMPACT_NOTE_SIZE: usize = 52;

const OUTPOINT_SIZE: usize = 36;
const MIN_TXIN_SIZE: usize = OUTPOINT_SIZE + 1 + 4;
const MIN_TXOUT_SIZE: usize = 8 + 1;

const ZKPROOF_GROTH_SIZE: usize = 192;
const ZKPROOF_PHGR_SIZE: usize = 296;
const SPEND_AUTH_SIG_SIZE: usize = 64;
const ENC_CIPHERTEXT_SIZE: usize = 580;
const OUT_CIPHERTEXT_SIZE: usize = 80;
const BINDING_SIG_SIZE: usize = 64;
const SPEND_SIZE: usize = 32 * 4 + ZKPROOF_GROTH_SIZE + SPEND_AUTH_SIG_SIZE;
const OUTPUT_SIZE: usize = 32 * 3 + ENC_CIPHERTEXT_SIZE + OUT_CIPHERTEXT_SIZE + ZKPROOF_GROTH_SIZE;
// vpub_old, vpub_new, anchor, 2 nullifiers, 2 commitments, ephemeral key,
// random seed, 2 MACs, then the proof and 2 note ciphertexts of 601 bytes.
const JOINSPLIT_SIZE_WITHOUT_PROOF: usize = 8 + 8 + 32 + 64 + 64 + 32 + 32 + 64 + 2 * 601;
const JOINSPLIT_PUBKEY_SIZE: usize = 32;
const JOINSPLIT_SIG_SIZE: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout_hash: [u8; 32],
    pub prevout_index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn is_null_prevout(&self) -> bool {
        self.prevout_hash == [0u8; 32] && self.prevout_index == u32::MAX
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaplingSpend {
    pub nullifier: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaplingOutput {
    pub cmu: [u8; 32],
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: Vec<u8>,
}

impl SaplingOutput {
    /// Leading part of the note ciphertext, without the memo.
    pub fn compact_ciphertext(&self) -> &[u8] {
        &self.enc_ciphertext[..COMPACT_NOTE_SIZE]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub overwintered: bool,
    pub version: u32,
    pub version_group_id: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub value_balance: i64,
    pub shielded_spends: Vec<SaplingSpend>,
    pub shielded_outputs: Vec<SaplingOutput>,
    pub join_splits: u64,
    txid: [u8; 32],
}

impl Transaction {
    /// Parses one transaction off the front of `input`, returning the unread tail.
    pub fn decode(input: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = ByteReader::new(input);

        let header = u32::from_le_bytes(r.read_array("transaction version")?);
        let overwintered = header & OVERWINTERED_FLAG != 0;
        let version = header & !OVERWINTERED_FLAG;
        let version_group_id = if overwintered {
            u32::from_le_bytes(r.read_array("version group id")?)
        } else {
            0
        };
        check_version(overwintered, version, version_group_id)?;
        let is_sapling = overwintered && version >= SAPLING_TX_VERSION;

        let inputs = read_list(&mut r, "transaction inputs", MIN_TXIN_SIZE, read_txin)?;
        let outputs = read_list(&mut r, "transaction outputs", MIN_TXOUT_SIZE, read_txout)?;
        let lock_time = u32::from_le_bytes(r.read_array("lock time")?);
        let expiry_height = if overwintered {
            u32::from_le_bytes(r.read_array("expiry height")?)
        } else {
            0
        };

        let (value_balance, shielded_spends, shielded_outputs) = if is_sapling {
            let value_balance = i64::from_le_bytes(r.read_array("value balance")?);
            let spends = read_list(&mut r, "shielded spends", SPEND_SIZE, read_spend)?;
            let outputs = read_list(&mut r, "shielded outputs", OUTPUT_SIZE, read_output)?;
            (value_balance, spends, outputs)
        } else {
            (0, Vec::new(), Vec::new())
        };

        let mut join_splits = 0;
        if version >= 2 {
            join_splits = r.read_compact_size("joinsplits")?;
            let proof = if is_sapling { ZKPROOF_GROTH_SIZE } else { ZKPROOF_PHGR_SIZE };
            for _ in 0..join_splits {
                r.read_bytes(JOINSPLIT_SIZE_WITHOUT_PROOF + proof, "joinsplit")?;
            }
            if join_splits > 0 {
                r.read_bytes(JOINSPLIT_PUBKEY_SIZE + JOINSPLIT_SIG_SIZE, "joinsplit signature")?;
            }
        }

        if is_sapling && !(shielded_spends.is_empty() && shielded_outputs.is_empty()) {
            r.read_bytes(BINDING_SIG_SIZE, "binding signature")?;
        }

        let rest = r.rest();
        let raw = &input[..input.len() - rest.len()];
        let tx = Self {
            overwintered,
            version,
            version_group_id,
            inputs,
            outputs,
            lock_time,
            expiry_height,
            value_balance,
            shielded_spends,
            shielded_outputs,
            join_splits,
            txid: sha256d::Hash::hash(raw).to_byte_array(),
        };
        Ok((tx, rest))
    }

    /// Transaction id in wire order.
    pub fn txid(&self) -> [u8; 32] {
        self.txid
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_null_prevout()
    }
}

fn check_version(overwintered: bool, version: u32, version_group_id: u32) -> Result<(), DecodeError> {
    let supported = match (overwintered, version) {
        (false, 1 | 2) => true,
        (true, OVERWINTER_TX_VERSION) => version_group_id == OVERWINTER_VERSION_GROUP_ID,
        (true, SAPLING_TX_VERSION) => version_group_id == SAPLING_VERSION_GROUP_ID,
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedTransactionVersion { version, version_group_id })
    }
}

/// Reads a CompactSize count followed by that many items. The preallocation is
/// capped by how many items the remaining input could hold.
fn read_list<'a, T>(
    r: &mut ByteReader<'a>,
    field: &'static str,
    min_item_size: usize,
    mut read_item: impl FnMut(&mut ByteReader<'a>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = r.read_compact_size(field)?;
    let mut items = Vec::with_capacity(bounded_capacity(count, r.rest().len(), min_item_size));
    for _ in 0..count {
        items.push(read_item(r)?);
    }
    Ok(items)
}

/// Capacity to reserve for `count` items of at least `min_item_size` bytes
/// each, given `available` input bytes.
pub(crate) fn bounded_capacity(count: u64, available: usize, min_item_size: usize) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX).min(available / min_item_size.max(1))
}

fn read_txin(r: &mut ByteReader<'_>) -> Result<TxIn, DecodeError> {
    Ok(TxIn {
        prevout_hash: r.read_array("prevout hash")?,
        prevout_index: u32::from_le_bytes(r.read_array("prevout index")?),
        script_sig: r.read_compact_length_prefixed("script sig")?.to_vec(),
        sequence: u32::from_le_bytes(r.read_array("sequence")?),
    })
}

fn read_txout(r: &mut ByteReader<'_>) -> Result<TxOut, DecodeError> {
    Ok(TxOut {
        value: u64::from_le_bytes(r.read_array("output value")?),
        script_pubkey: r.read_compact_length_prefixed("script pubkey")?.to_vec(),
    })
}

fn read_spend(r: &mut ByteReader<'_>) -> Result<SaplingSpend, DecodeError> {
    r.read_bytes(64, "spend cv and anchor")?;
    let nullifier = r.read_array("spend nullifier")?;
    r.read_bytes(32 + ZKPROOF_GROTH_SIZE + SPEND_AUTH_SIG_SIZE, "spend proof")?;
    Ok(SaplingSpend { nullifier })
}

fn read_output(r: &mut ByteReader<'_>) -> Result<SaplingOutput, DecodeError> {
    r.read_bytes(32, "output cv")?;
    let cmu = r.read_array("output cmu")?;
    let ephemeral_key = r.read_array("output ephemeral key")?;
    let enc_ciphertext = r.read_bytes(ENC_CIPHERTEXT_SIZE, "output ciphertext")?.to_vec();
    r.read_bytes(OUT_CIPHERTEXT_SIZE + ZKPROOF_GROTH_SIZE, "output proof")?;
    Ok(SaplingOutput { cmu, ephemeral_key, enc_ciphertext })
}
