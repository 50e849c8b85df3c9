use crate::core::{Block, HashProvider};
use crate::error::{BlockchainError, Result};
use crate::storage::repository::{prepare_append, BlockRepository};
use std::sync::RwLock;

/// Ephemeral repository. Blocks live in a vector indexed by height.
pub struct MemoryBlockRepository {
    hasher: HashProvider,
    blocks: RwLock<Vec<Block>>,
}

impl MemoryBlockRepository {
    pub fn new(hasher: HashProvider) -> MemoryBlockRepository {
        MemoryBlockRepository {
            hasher,
            blocks: RwLock::new(vec![]),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&[Block]) -> T) -> Result<T> {
        let blocks = self.blocks.read().map_err(|_| {
            BlockchainError::Database("Failed to acquire read lock on blocks".to_string())
        })?;
        Ok(f(&blocks))
    }
}

impl BlockRepository for MemoryBlockRepository {
    fn hasher(&self) -> &HashProvider {
        &self.hasher
    }

    fn get_length(&self) -> Result<u64> {
        self.read(|blocks| blocks.len() as u64)
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Block>> {
        self.read(|blocks| {
            usize::try_from(index)
                .ok()
                .and_then(|i| blocks.get(i))
                .cloned()
        })
    }

    fn get_by_hash(&self, hash: &[u8]) -> Result<Option<Block>> {
        self.read(|blocks| blocks.iter().find(|b| b.get_hash() == hash).cloned())
    }

    fn get_by_transaction_id(&self, id: &str) -> Result<Option<Block>> {
        self.read(|blocks| {
            blocks
                .iter()
                .find(|b| b.find_transaction(id).is_some())
                .cloned()
        })
    }

    fn add(&self, mut block: Block) -> Result<Block> {
        let mut blocks = self.blocks.write().map_err(|_| {
            BlockchainError::Database("Failed to acquire write lock on blocks".to_string())
        })?;
        prepare_append(&mut block, blocks.len() as u64, &self.hasher)?;
        blocks.push(block.clone());
        Ok(block)
    }
}
