use sled::Db;
use std::path::Path;

use crate::core::types::*;

pub mod memory;

/// Key prefixes for different data types in sled
const PREFIX_HEADER: &[u8] = b"hdr:";
const PREFIX_HEIGHT: &[u8] = b"hgt:";
const META_TIP: &[u8] = b"meta:tip";
const META_HEIGHT: &[u8] = b"meta:height";
const META_NETWORK: &[u8] = b"meta:network";

/// Read access to connected headers, as the difficulty rules need it.
///
/// Implementations take `&self` so several validations can read concurrently
/// when the backend allows it.
pub trait BlockStore {
    /// Stored block with the given header hash, if known.
    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StorageError>;

    /// The block `stored` builds on.
    fn predecessor(&self, stored: &StoredBlock) -> Result<StoredBlock, LookupError> {
        let prev_hash = stored.header.prev_hash;
        match self.get(&prev_hash).map_err(LookupError::Storage)? {
            Some(prev) => Ok(prev),
            None => Err(LookupError::NotFound(prev_hash)),
        }
    }
}

/// Persistent storage backend using sled embedded database
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(Storage { db })
    }

    /// In-memory database removed on drop
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(Storage { db })
    }

    /// Check if the database has existing chain data
    pub fn has_chain_data(&self) -> bool {
        self.db.contains_key(META_TIP).unwrap_or(false)
    }

    // ─── Header Storage ──────────────────────────────────────────────

    /// Store a connected header with its height
    pub fn put_stored_block(&self, stored: &StoredBlock) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_HEADER, &stored.hash());
        let value = bincode::serialize(stored)
            .map_err(|e| StorageError::SerializeError(e.to_string()))?;
        self.db.insert(key, value)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Retrieve a stored header by hash
    pub fn get_stored_block(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StorageError> {
        let key = prefixed_key(PREFIX_HEADER, hash);
        match self.db.get(key).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => {
                let stored = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::SerializeError(e.to_string()))?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Load every stored header (for startup)
    pub fn load_all_blocks(&self) -> Result<Vec<StoredBlock>, StorageError> {
        let mut blocks = Vec::new();
        for item in self.db.scan_prefix(PREFIX_HEADER) {
            let (_, value) = item.map_err(|e| StorageError::DbError(e.to_string()))?;
            let stored: StoredBlock = bincode::deserialize(&value)
                .map_err(|e| StorageError::SerializeError(e.to_string()))?;
            blocks.push(stored);
        }
        Ok(blocks)
    }

    /// Map height -> block hash on the active chain
    pub fn put_height_index(&self, height: u64, hash: &Hash256) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_HEIGHT, &height.to_be_bytes());
        self.db.insert(key, hash.as_slice())
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Get block hash at a given height
    pub fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, StorageError> {
        let key = prefixed_key(PREFIX_HEIGHT, &height.to_be_bytes());
        match self.db.get(key).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => Ok(Some(hash_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ─── Chain Metadata ──────────────────────────────────────────────

    /// Store the chain tip hash
    pub fn put_tip(&self, hash: &Hash256) -> Result<(), StorageError> {
        self.db.insert(META_TIP, hash.as_slice())
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Get the chain tip hash
    pub fn get_tip(&self) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(META_TIP).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => Ok(Some(hash_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store the chain height
    pub fn put_height(&self, height: u64) -> Result<(), StorageError> {
        self.db.insert(META_HEIGHT, &height.to_le_bytes())
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Get the chain height
    pub fn get_height(&self) -> Result<Option<u64>, StorageError> {
        match self.db.get(META_HEIGHT).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_ref().try_into()
                    .map_err(|_| StorageError::SerializeError("invalid height length".into()))?;
                Ok(Some(u64::from_le_bytes(buf)))
            }
            None => Ok(None),
        }
    }

    /// Record which network this database belongs to
    pub fn put_network(&self, network_id: &str) -> Result<(), StorageError> {
        self.db.insert(META_NETWORK, network_id.as_bytes())
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    pub fn get_network(&self) -> Result<Option<String>, StorageError> {
        match self.db.get(META_NETWORK).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => {
                let id = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StorageError::SerializeError(e.to_string()))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Clear all data from the database
    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.db.clear().map_err(|e| StorageError::DbError(e.to_string()))?;
        self.db.flush().map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }
}

impl BlockStore for Storage {
    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StorageError> {
        self.get_stored_block(hash)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn prefixed_key(prefix: &[u8], data: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + data.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(data);
    key
}

fn hash_from_slice(bytes: &[u8]) -> Result<Hash256, StorageError> {
    bytes.try_into()
        .map_err(|_| StorageError::SerializeError(format!("invalid hash length {}", bytes.len())))
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StorageError {
    DbError(String),
    SerializeError(String),
    /// Stored data contradicts itself (e.g. a parent at the wrong height)
    Inconsistent(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::DbError(e) => write!(f, "database error: {}", e),
            StorageError::SerializeError(e) => write!(f, "serialization error: {}", e),
            StorageError::Inconsistent(e) => write!(f, "inconsistent store: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Why a predecessor could not be produced.
#[derive(Debug)]
pub enum LookupError {
    NotFound(Hash256),
    Storage(StorageError),
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::NotFound(hash) => write!(f, "block not found: {}", hash_to_hex(hash)),
            LookupError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LookupError {}
