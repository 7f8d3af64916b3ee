use std::collections::HashMap;
use std::path::Path;

use crate::core::params::ChainParameters;
use crate::core::types::*;
use crate::pow::{self, ConsensusError};
use crate::storage::memory::MemoryStore;
use crate::storage::{BlockStore, LookupError, Storage, StorageError};

// ─── Header Chain ───────────────────────────────────────────────────

/// Accepts headers one at a time and keeps the highest chain as active.
///
/// Every known header lives in a [`MemoryStore`], which is also the block
/// store handed to the difficulty rules. With a sled backend attached each
/// accepted header is written through.
pub struct HeaderChain {
    params: ChainParameters,
    /// All known headers, active chain and side branches alike
    store: MemoryStore,
    /// Height index for the ACTIVE chain only
    height_index: HashMap<u64, Hash256>,
    /// Current best chain tip
    tip: StoredBlock,
    storage: Option<Storage>,
}

impl std::fmt::Debug for HeaderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderChain")
            .field("network", &self.params.network)
            .field("height", &self.tip.height)
            .field("tip", &hash_to_hex(&self.tip.hash()))
            .field("known_headers", &self.store.len())
            .finish()
    }
}

impl HeaderChain {
    /// In-memory chain holding only the network's genesis header
    pub fn new(params: ChainParameters) -> Self {
        let genesis = StoredBlock::new(params.genesis_header(), 0);
        let mut store = MemoryStore::new();
        let genesis_hash = store.insert(genesis.clone());

        let mut height_index = HashMap::new();
        height_index.insert(0, genesis_hash);

        HeaderChain { params, store, height_index, tip: genesis, storage: None }
    }

    /// Open with persistent storage, initialising a fresh database if needed
    pub fn open<P: AsRef<Path>>(path: P, params: ChainParameters) -> Result<Self, ChainError> {
        let storage = Storage::open(path)?;
        if storage.has_chain_data() {
            Self::load_from_storage(storage, params)
        } else {
            let mut chain = Self::new(params);
            chain.persist_genesis(&storage)?;
            chain.storage = Some(storage);
            Ok(chain)
        }
    }

    fn load_from_storage(storage: Storage, params: ChainParameters) -> Result<Self, ChainError> {
        let found = storage.get_network()?.unwrap_or_default();
        if found != params.network.id() {
            return Err(ChainError::NetworkMismatch {
                expected: params.network.id().to_string(),
                found,
            });
        }

        let tip_hash = storage
            .get_tip()?
            .ok_or_else(|| StorageError::Inconsistent("no tip".into()))?;

        let mut store = MemoryStore::new();
        for stored in storage.load_all_blocks()? {
            store.insert(stored);
        }
        let tip = store
            .block(&tip_hash)
            .cloned()
            .ok_or_else(|| StorageError::Inconsistent(format!("tip {} not stored", hash_to_hex(&tip_hash))))?;

        let mut chain = HeaderChain { params, store, height_index: HashMap::new(), tip, storage: None };
        let updates = chain.active_chain_updates(&chain.tip)?;
        chain.height_index.extend(updates);

        if chain.height_index.get(&0) != Some(&chain.params.genesis_header().hash()) {
            return Err(StorageError::Inconsistent("active chain does not start at genesis".into()).into());
        }
        // Tip and height are written last, so they agree unless a write was lost
        let stored_height = storage.get_height()?;
        if stored_height != Some(chain.tip.height)
            || storage.get_hash_at_height(chain.tip.height)? != Some(tip_hash)
        {
            return Err(StorageError::Inconsistent(format!(
                "tip {} is at height {}, metadata says {:?}",
                &hash_to_hex(&tip_hash)[..16],
                chain.tip.height,
                stored_height
            ))
            .into());
        }

        tracing::info!(
            "💾 Loaded header chain: network={} height={} tip={} headers={}",
            chain.params.network,
            chain.tip.height,
            &hash_to_hex(&chain.tip.hash())[..16],
            chain.store.len()
        );

        chain.storage = Some(storage);
        Ok(chain)
    }

    fn persist_genesis(&self, storage: &Storage) -> Result<(), StorageError> {
        let hash = self.tip.hash();
        storage.put_stored_block(&self.tip)?;
        storage.put_height_index(0, &hash)?;
        storage.put_tip(&hash)?;
        storage.put_height(0)?;
        storage.put_network(self.params.network.id())?;
        storage.flush()
    }

    // ─── Header Acceptance ──────────────────────────────────────────

    /// Validate `header` against its parent and connect it. Returns its hash.
    pub fn add_header(&mut self, header: BlockHeader) -> Result<Hash256, ChainError> {
        let hash = header.hash();

        // 1. Duplicate
        if self.store.contains(&hash) {
            return Err(ChainError::Duplicate);
        }

        // 2. Parent must exist
        let parent = match self.store.block(&header.prev_hash) {
            Some(parent) => parent.clone(),
            None => return Err(ChainError::Orphan),
        };

        // 3. Difficulty transition
        pow::check_difficulty_transitions(&parent, &header, &self.store, &self.params)?;

        // 4. Proof of work against the (now validated) target
        if !pow::is_valid_proof_of_work(&header, &self.params) {
            return Err(ChainError::InsufficientPoW);
        }

        let stored = parent.build_next(header);
        let becomes_tip = stored.height > self.tip.height;
        let updates = if becomes_tip { self.active_chain_updates(&stored)? } else { Vec::new() };

        // Disk first: memory only changes once every write went through
        if let Some(storage) = &self.storage {
            storage.put_stored_block(&stored)?;
            if becomes_tip {
                for (height, index_hash) in &updates {
                    storage.put_height_index(*height, index_hash)?;
                }
                storage.put_tip(&hash)?;
                storage.put_height(stored.height)?;
            }
        }

        self.store.insert(stored.clone());
        if becomes_tip {
            if updates.len() > 1 {
                tracing::info!("🔄 Switching to branch at height {}: {}", stored.height, &hash_to_hex(&hash)[..16]);
            }
            self.height_index.extend(updates);
            self.tip = stored;
            tracing::debug!("⛓️  New tip #{} bits={:08x}", self.tip.height, self.tip.header.bits);
        } else {
            tracing::debug!("📦 Stored side branch header at height {}", stored.height);
        }

        Ok(hash)
    }

    /// Height index entries that make `new_tip` the active tip. Walks back
    /// until it meets an entry that already agrees. `new_tip` itself need
    /// not be stored yet, but its ancestors must be.
    fn active_chain_updates(&self, new_tip: &StoredBlock) -> Result<Vec<(u64, Hash256)>, ChainError> {
        let mut updates = Vec::new();
        let mut cursor = new_tip.clone();
        loop {
            let hash = cursor.hash();
            if self.height_index.get(&cursor.height) == Some(&hash) {
                break;
            }
            updates.push((cursor.height, hash));
            if cursor.is_genesis() {
                break;
            }
            cursor = self.store.predecessor(&cursor).map_err(|e| match e {
                LookupError::NotFound(missing) => StorageError::Inconsistent(format!(
                    "active chain broken below height {}: {} missing",
                    cursor.height,
                    hash_to_hex(&missing)
                )),
                LookupError::Storage(e) => e,
            })?;
        }
        Ok(updates)
    }

    /// Blocks until the next header whose target is recomputed; 1 when the
    /// very next header is on a retarget boundary.
    pub fn blocks_to_retarget(&self) -> u64 {
        let interval = u64::from(self.params.interval);
        interval - self.tip.height % interval
    }

    /// Re-run the difficulty and proof-of-work checks over the active chain
    /// from height 1. Returns the number of headers checked.
    pub fn verify_active_chain(&self) -> Result<u64, ChainError> {
        let mut parent = self.block_at_height(0).ok_or(ChainError::MissingHeight(0))?;
        for height in 1..=self.tip.height {
            let block = self.block_at_height(height).ok_or(ChainError::MissingHeight(height))?;
            pow::check_difficulty_transitions(parent, &block.header, &self.store, &self.params)
                .map_err(|reason| ChainError::InvalidStored { height, reason })?;
            if !pow::is_valid_proof_of_work(&block.header, &self.params) {
                tracing::warn!("Stored header at height {} fails proof of work", height);
                return Err(ChainError::InsufficientPoW);
            }
            parent = block;
        }
        Ok(self.tip.height)
    }

    /// Bits a header on top of the current tip must carry at `timestamp`.
    pub fn next_required_bits(&self, timestamp: u32) -> Result<u32, ConsensusError> {
        pow::required_bits(&self.tip, timestamp, &self.store, &self.params)
    }

    /// Flush pending writes when persistent
    pub fn flush(&self) -> Result<(), StorageError> {
        match &self.storage {
            Some(storage) => storage.flush(),
            None => Ok(()),
        }
    }

    pub fn params(&self) -> &ChainParameters { &self.params }

    pub fn tip(&self) -> &StoredBlock { &self.tip }

    pub fn tip_hash(&self) -> Hash256 { self.tip.hash() }

    pub fn height(&self) -> u64 { self.tip.height }

    pub fn block_at_height(&self, height: u64) -> Option<&StoredBlock> {
        self.height_index.get(&height).and_then(|hash| self.store.block(hash))
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&StoredBlock> { self.store.block(hash) }

    pub fn total_known_headers(&self) -> usize { self.store.len() }

    pub fn is_persistent(&self) -> bool { self.storage.is_some() }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ChainError {
    Duplicate,
    Orphan,
    InsufficientPoW,
    Consensus(ConsensusError),
    Storage(StorageError),
    /// Database was created for another network
    NetworkMismatch { expected: String, found: String },
    /// A stored active-chain header no longer passes validation
    InvalidStored { height: u64, reason: ConsensusError },
    MissingHeight(u64),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Duplicate => write!(f, "duplicate header"),
            ChainError::Orphan => write!(f, "orphan header (unknown parent)"),
            ChainError::InsufficientPoW => write!(f, "insufficient PoW"),
            ChainError::Consensus(e) => write!(f, "{}", e),
            ChainError::Storage(e) => write!(f, "{}", e),
            ChainError::NetworkMismatch { expected, found } => {
                write!(f, "database belongs to network '{}', expected '{}'", found, expected)
            }
            ChainError::InvalidStored { height, reason } => {
                write!(f, "stored header at height {} is invalid: {}", height, reason)
            }
            ChainError::MissingHeight(height) => write!(f, "active chain has no header at height {}", height),
        }
    }
}
impl std::error::Error for ChainError {}

impl From<ConsensusError> for ChainError {
    fn from(e: ConsensusError) -> Self {
        ChainError::Consensus(e)
    }
}

impl From<StorageError> for ChainError {
    fn from(e: StorageError) -> Self {
        ChainError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::Network;

    /// Grind the nonce until the header meets its own target.
    fn mine_on(chain: &HeaderChain, prev: &StoredBlock, timestamp: u32) -> BlockHeader {
        let bits = pow::required_bits(prev, timestamp, &chain.store, chain.params()).unwrap();
        let mut header = BlockHeader {
            version: 1,
            prev_hash: prev.hash(),
            merkle_root: NULL_HASH,
            timestamp,
            bits,
            nonce: 0,
        };
        while !pow::is_valid_proof_of_work(&header, chain.params()) {
            header.nonce += 1;
        }
        header
    }

    fn extend(chain: &mut HeaderChain, count: u64) {
        for _ in 0..count {
            let tip = chain.tip().clone();
            let header = mine_on(chain, &tip, tip.header.timestamp + 60);
            chain.add_header(header).unwrap();
        }
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("altpow_test_{:016x}", rand::random::<u64>()))
    }

    #[test]
    fn test_chain_genesis() {
        let chain = HeaderChain::new(ChainParameters::regtest());
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_genesis());
        assert_eq!(chain.block_at_height(0).unwrap().header, chain.params().genesis_header());
        assert_eq!(chain.next_required_bits(chain.tip().header.timestamp + 60).unwrap(), 0x207fffff);
    }

    #[test]
    fn test_connects_headers() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        extend(&mut chain, 10);
        assert_eq!(chain.height(), 10);
        assert_eq!(chain.total_known_headers(), 11);
        assert_eq!(chain.block_at_height(10), Some(chain.tip()));
        assert_eq!(chain.verify_active_chain().unwrap(), 10);
    }

    #[test]
    fn test_rejects_duplicate_and_orphan() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        let genesis = chain.tip().clone();
        let header = mine_on(&chain, &genesis, genesis.header.timestamp + 60);
        chain.add_header(header.clone()).unwrap();
        assert!(matches!(chain.add_header(header.clone()), Err(ChainError::Duplicate)));

        let mut orphan = header;
        orphan.prev_hash = [7; 32];
        assert!(matches!(chain.add_header(orphan), Err(ChainError::Orphan)));
    }

    #[test]
    fn test_rejects_insufficient_pow() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        let genesis = chain.tip().clone();
        let mut header = mine_on(&chain, &genesis, genesis.header.timestamp + 60);
        while pow::is_valid_proof_of_work(&header, chain.params()) {
            header.nonce += 1;
        }
        assert!(matches!(chain.add_header(header), Err(ChainError::InsufficientPoW)));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_rejects_difficulty_change() {
        let mut chain = HeaderChain::new(ChainParameters::mainnet());
        let genesis = chain.tip().clone();
        let header = BlockHeader {
            version: 1,
            prev_hash: genesis.hash(),
            merkle_root: NULL_HASH,
            timestamp: genesis.header.timestamp + 60,
            bits: 0x1d0fffff,
            nonce: 0,
        };
        match chain.add_header(header) {
            Err(ChainError::Consensus(ConsensusError::UnexpectedDifficultyChange { height: 0, .. })) => {}
            other => panic!("expected a difficulty rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_retargets_at_interval() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        extend(&mut chain, 359);
        assert_eq!(chain.height(), 359);
        let limit = chain.params().max_target_bits;
        assert_eq!(chain.tip().header.bits, limit);

        // 359 spacings: the interval ran slightly fast, so the target drops
        let tip = chain.tip().clone();
        let mut wrong = mine_on(&chain, &tip, tip.header.timestamp + 60);
        assert_ne!(wrong.bits, limit);
        wrong.bits = limit;
        assert!(matches!(
            chain.add_header(wrong),
            Err(ChainError::Consensus(ConsensusError::DifficultyMismatch { .. }))
        ));

        extend(&mut chain, 5);
        assert_eq!(chain.height(), 364);
        let retargeted = chain.block_at_height(360).unwrap().header.bits;
        assert_ne!(retargeted, limit);
        assert_eq!(chain.tip().header.bits, retargeted);
        assert_eq!(chain.verify_active_chain().unwrap(), 364);
    }

    #[test]
    fn test_switches_to_higher_branch() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        extend(&mut chain, 3);
        let old_tip = chain.tip_hash();
        let fork_point = chain.block_at_height(1).unwrap().clone();

        // Side branch from height 1, offset timestamps so hashes differ
        let mut prev = fork_point;
        for i in 0..2 {
            let header = mine_on(&chain, &prev, prev.header.timestamp + 90 + i);
            let hash = chain.add_header(header).unwrap();
            prev = chain.block_by_hash(&hash).unwrap().clone();
        }
        // Height 3 on both branches: the first one stays active
        assert_eq!(chain.tip_hash(), old_tip);

        let header = mine_on(&chain, &prev, prev.header.timestamp + 90);
        let new_tip = chain.add_header(header).unwrap();
        assert_eq!(chain.tip_hash(), new_tip);
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.block_at_height(3).unwrap().hash(), prev.hash());
        assert_ne!(chain.block_at_height(2).unwrap().hash(), old_tip);
        assert_eq!(chain.verify_active_chain().unwrap(), 4);
    }

    #[test]
    fn test_blocks_to_retarget() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        assert_eq!(chain.blocks_to_retarget(), 360);

        extend(&mut chain, 358);
        assert_eq!(chain.blocks_to_retarget(), 2);

        extend(&mut chain, 1);
        assert_eq!(chain.height(), 359);
        assert_eq!(chain.blocks_to_retarget(), 1);
        assert!(pow::is_transition_point(chain.height(), chain.params()));

        extend(&mut chain, 1);
        assert_eq!(chain.blocks_to_retarget(), 360);
    }

    #[test]
    fn test_failed_branch_switch_leaves_chain_untouched() {
        let mut chain = HeaderChain::new(ChainParameters::regtest());
        extend(&mut chain, 3);
        let old_tip = chain.tip_hash();
        let a1 = chain.block_at_height(1).unwrap().clone();

        let b2_header = mine_on(&chain, &a1, a1.header.timestamp + 90);
        let b2_hash = chain.add_header(b2_header).unwrap();
        let b2 = chain.block_by_hash(&b2_hash).unwrap().clone();
        let b3_header = mine_on(&chain, &b2, b2.header.timestamp + 91);
        let b3_hash = chain.add_header(b3_header).unwrap();
        let b3 = chain.block_by_hash(&b3_hash).unwrap().clone();
        assert_eq!(chain.tip_hash(), old_tip);

        // Break the side branch, then extend it past the active tip
        chain.store.remove(&b2_hash);
        let b4 = mine_on(&chain, &b3, b3.header.timestamp + 1201);
        let b4_hash = b4.hash();
        let err = chain.add_header(b4.clone()).unwrap_err();
        assert!(matches!(err, ChainError::Storage(StorageError::Inconsistent(_))), "got {}", err);

        assert_eq!(chain.tip_hash(), old_tip);
        assert_eq!(chain.height(), 3);
        assert!(chain.block_by_hash(&b4_hash).is_none());
        assert_eq!(chain.block_at_height(2).unwrap().hash(), chain.block_at_height(3).unwrap().header.prev_hash);

        // Same header goes through once the branch is whole again
        chain.store.insert(b2);
        assert_eq!(chain.add_header(b4).unwrap(), b4_hash);
        assert_eq!(chain.tip_hash(), b4_hash);
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.block_at_height(2).unwrap().hash(), b2_hash);
    }

    #[test]
    fn test_reopen_rejects_stale_height() {
        let dir = temp_dir();
        {
            let mut chain = HeaderChain::open(&dir, ChainParameters::regtest()).unwrap();
            extend(&mut chain, 2);
            chain.flush().unwrap();
        }
        {
            let storage = Storage::open(&dir).unwrap();
            storage.put_height(99).unwrap();
            storage.flush().unwrap();
        }

        let err = HeaderChain::open(&dir, ChainParameters::regtest()).unwrap_err();
        assert!(matches!(err, ChainError::Storage(StorageError::Inconsistent(_))), "got {}", err);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_persistence_reopen() {
        let dir = temp_dir();
        let tip = {
            let mut chain = HeaderChain::open(&dir, ChainParameters::regtest()).unwrap();
            assert!(chain.is_persistent());
            extend(&mut chain, 5);
            chain.flush().unwrap();
            chain.tip_hash()
        };

        let chain = HeaderChain::open(&dir, ChainParameters::regtest()).unwrap();
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.tip_hash(), tip);
        assert_eq!(chain.verify_active_chain().unwrap(), 5);
        drop(chain);

        let err = HeaderChain::open(&dir, ChainParameters::for_network(Network::Testnet)).unwrap_err();
        assert!(matches!(err, ChainError::NetworkMismatch { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
