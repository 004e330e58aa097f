//! Block header codec.
//!
//! Wire layout (all integers little-endian):
//!
//! | field                  | bytes            |
//! |------------------------|------------------|
//! | version                | 4 (i32)          |
//! | previous block hash    | 32               |
//! | merkle root            | 32               |
//! | commitment root        | 32               |
//! | time                   | 4 (u32)          |
//! | nbits                  | 4                |
//! | nonce                  | 32               |
//! | solution               | CompactSize + n  |

use bitcoin::{CompactTarget, Target};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::core::compact_size::{
    CompactSizeRead, compact_length_prefixed_len, read_compact_size,
    write_compact_length_prefixed,
};
use crate::core::errors::DecodeError;
use crate::core::hash::{BlockHash, BlockHasher};

/// Size of a serialized header minus the solution and its length prefix.
pub const HEADER_SIZE_MINUS_SOLUTION: usize = 140;

/// Size of an Equihash (200, 9) solution as found on mainnet and testnet.
pub const EQUIHASH_SOLUTION_SIZE: usize = 1344;

/// The consensus header fields, exactly as carried on the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawBlockHeader {
    pub version: i32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    /// Reserved before the shielded upgrade, the final note commitment tree
    /// root from it onwards. Always 32 bytes.
    pub commitment_root: [u8; 32],
    pub time: u32,
    pub nbits: [u8; 4],
    pub nonce: [u8; 32],
    pub solution: Vec<u8>,
}

impl RawBlockHeader {
    /// Encoded size: fixed prefix plus the length-prefixed solution.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE_MINUS_SOLUTION + compact_length_prefixed_len(self.solution.len())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block);
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&self.commitment_root);
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.nbits);
        buf.extend_from_slice(&self.nonce);
        write_compact_length_prefixed(&mut buf, &self.solution);
        buf
    }

    /// Parses a header off the front of `input`, returning the unread tail.
    pub fn decode(input: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = ByteReader::new(input);

        let version = i32::from_le_bytes(r.read_array("header version")?);
        let prev_block = r.read_array("previous block hash")?;
        let merkle_root = r.read_array("merkle root")?;
        let commitment_root = r.read_array("commitment root")?;
        let time = u32::from_le_bytes(r.read_array("timestamp")?);
        let nbits = r.read_array("nbits")?;
        let nonce = r.read_array("nonce")?;
        let solution = r.read_compact_length_prefixed("solution")?.to_vec();

        let header =
            Self { version, prev_block, merkle_root, commitment_root, time, nbits, nonce, solution };
        Ok((header, r.rest()))
    }

    /// The proof-of-work target encoded in `nbits`.
    pub fn target(&self) -> Target {
        Target::from_compact(CompactTarget::from_consensus(u32::from_le_bytes(self.nbits)))
    }
}

/// An immutable header with its identity hash computed on first use.
#[derive(Clone)]
pub struct BlockHeader {
    raw: RawBlockHeader,
    hasher: Arc<dyn BlockHasher>,
    hash: OnceLock<BlockHash>,
}

impl BlockHeader {
    pub fn new(raw: RawBlockHeader, hasher: Arc<dyn BlockHasher>) -> Self {
        Self { raw, hasher, hash: OnceLock::new() }
    }

    pub fn raw(&self) -> &RawBlockHeader {
        &self.raw
    }

    pub fn encode(&self) -> Vec<u8> {
        self.raw.encode()
    }

    /// Hash in little-endian wire order, for embedding in other structures.
    pub fn encodable_hash(&self) -> BlockHash {
        *self.hash.get_or_init(|| BlockHash(self.hasher.digest(&self.raw.encode())))
    }

    /// Hash bytes in big-endian order.
    pub fn display_hash(&self) -> [u8; 32] {
        self.encodable_hash().bytes_in_display_order()
    }

    pub fn prev_hash(&self) -> BlockHash {
        BlockHash(self.raw.prev_block)
    }

    pub fn display_prev_hash(&self) -> [u8; 32] {
        self.prev_hash().bytes_in_display_order()
    }

    pub fn is_hash_cached(&self) -> bool {
        self.hash.get().is_some()
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for BlockHeader {}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHeader")
            .field("raw", &self.raw)
            .field("hash", &self.hash.get())
            .finish()
    }
}

/// Decodes and hashes headers with one injected digest capability.
#[derive(Clone)]
pub struct HeaderCodec {
    hasher: Arc<dyn BlockHasher>,
}

impl HeaderCodec {
    pub fn new(hasher: Arc<dyn BlockHasher>) -> Self {
        Self { hasher }
    }

    pub fn decode<'a>(&self, input: &'a [u8]) -> Result<(BlockHeader, &'a [u8]), DecodeError> {
        let (raw, rest) = RawBlockHeader::decode(input)?;
        Ok((self.wrap(raw), rest))
    }

    pub fn wrap(&self, raw: RawBlockHeader) -> BlockHeader {
        BlockHeader::new(raw, self.hasher.clone())
    }
}

impl fmt::Debug for HeaderCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderCodec").finish_non_exhaustive()
    }
}

/// Forward-only cursor over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn read_bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::TruncatedInput { field });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, field)?);
        Ok(out)
    }

    pub(crate) fn read_compact_size(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        match read_compact_size(self.buf) {
            CompactSizeRead::Value(value, used) => {
                self.buf = &self.buf[used..];
                Ok(value)
            }
            CompactSizeRead::Truncated => Err(DecodeError::TruncatedInput { field }),
            CompactSizeRead::NonCanonical => Err(DecodeError::NonCanonicalCompactSize { field }),
        }
    }

    pub(crate) fn read_compact_length_prefixed(
        &mut self,
        field: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        let len = self.read_compact_size(field)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::TruncatedInput { field })?;
        self.read_bytes(len, field)
    }
}
