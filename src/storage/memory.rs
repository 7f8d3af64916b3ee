use std::collections::HashMap;

use super::{BlockStore, StorageError};
use crate::core::types::*;

/// Headers kept in a hash map. Backs the header chain and most tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blocks: HashMap<Hash256, StoredBlock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the block hash.
    pub fn insert(&mut self, stored: StoredBlock) -> Hash256 {
        let hash = stored.hash();
        self.blocks.insert(hash, stored);
        hash
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<StoredBlock> {
        self.blocks.remove(hash)
    }

    pub fn block(&self, hash: &Hash256) -> Option<&StoredBlock> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryStore {
    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StorageError> {
        Ok(self.blocks.get(hash).cloned())
    }
}
