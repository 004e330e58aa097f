use bitcoin::hashes::{Hash, sha256d};
use borsh::{BorshDeserialize, BorshSerialize};
use hex::{FromHex, ToHex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Block identity in internal (little-endian, wire) byte order.
///
/// `Display`, `FromStr` and serde all use display order (big-endian hex), the
/// form block explorers and node RPCs print.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Bytes in big-endian order, suitable for printing byte by byte.
    pub fn bytes_in_display_order(&self) -> [u8; 32] {
        let mut reversed = self.0;
        reversed.reverse();
        reversed
    }

    pub fn from_bytes_in_display_order(bytes: &[u8; 32]) -> Self {
        let mut internal = *bytes;
        internal.reverse();
        Self(internal)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bytes_in_display_order().encode_hex::<String>())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = <[u8; 32]>::from_hex(s)?;
        Ok(Self::from_bytes_in_display_order(&bytes))
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The digest capability used to derive block identity from encoded headers.
///
/// Implementations must be pure: the same bytes always give the same digest.
pub trait BlockHasher: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> [u8; 32];
}

/// Double SHA-256, the default for chains that don't plug in their own PoW hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256dHasher;

impl BlockHasher for Sha256dHasher {
    fn digest(&self, bytes: &[u8]) -> [u8; 32] {
        sha256d::Hash::hash(bytes).to_byte_array()
    }
}
