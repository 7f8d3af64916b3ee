use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash used throughout the system
pub type Hash256 = [u8; 32];

/// Null hash (all zeros) used for genesis block's prev_hash
pub const NULL_HASH: Hash256 = [0u8; 32];

/// Serialized header length (Bitcoin wire layout)
pub const HEADER_SIZE: usize = 80;

/// Version bit marking a merge-mined (AuxPoW) header
pub const AUXPOW_VERSION_FLAG: u32 = 0x0000_0100;

// ─── Block Types ─────────────────────────────────────────────────────

/// Block header
///
/// `bits` is the compact encoding of the 256-bit target the header hash must
/// not exceed (see [`crate::pow::compact`]). Height is not part of the header;
/// it is attached by the store once the header connects (see [`StoredBlock`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    #[serde(with = "hash_serde")]
    pub prev_hash: Hash256,
    #[serde(with = "hash_serde")]
    pub merkle_root: Hash256,
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// 80-byte little-endian serialization, the preimage of [`BlockHeader::hash`].
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block id: double SHA-256 of the serialized header.
    pub fn hash(&self) -> Hash256 {
        double_sha256(&self.serialize())
    }

    pub fn is_auxpow(&self) -> bool {
        self.version & AUXPOW_VERSION_FLAG != 0
    }
}

/// A header that has been connected to the chain, together with its height.
///
/// The predecessor is not owned; it is resolved through a
/// [`crate::storage::BlockStore`] by following `header.prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub header: BlockHeader,
    pub height: u64,
}

impl StoredBlock {
    pub fn new(header: BlockHeader, height: u64) -> Self {
        Self { header, height }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Wrap `next` as the successor of this block.
    pub fn build_next(&self, next: BlockHeader) -> StoredBlock {
        StoredBlock { header: next, height: self.height + 1 }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// Hex in display order (byte-reversed, as block explorers show it).
pub fn hash_to_hex(hash: &Hash256) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Inverse of [`hash_to_hex`].
pub fn hash_from_hex(s: &str) -> Option<Hash256> {
    let bytes = hex::decode(s.trim()).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    hash.reverse();
    Some(hash)
}

/// Hashes are hex strings in JSON and raw bytes in bincode.
mod hash_serde {
    use super::{hash_from_hex, hash_to_hex, Hash256};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash256, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&hash_to_hex(hash))
        } else {
            serde::Serialize::serialize(hash, s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash256, D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            hash_from_hex(&s).ok_or_else(|| D::Error::custom(format!("invalid hash: {}", s)))
        } else {
            Hash256::deserialize(d)
        }
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] bits={:#010x} ts={}",
            hash_to_hex(&self.hash()),
            self.bits,
            self.timestamp,
        )
    }
}

impl fmt::Display for StoredBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block #{} {}", self.height, self.header)
    }
}
