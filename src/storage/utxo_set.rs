// The spent-output index behind double-spend detection.
// Instead of scanning every input in the chain for each new transaction, I keep
// the set of spent (transaction_id, index) keys and the set of transaction ids
// in memory, rebuild them once from storage on startup and extend them after
// every append. Accept/reject outcomes are the same as a full scan.

use crate::core::{Block, OutputKey, Transaction};
use crate::error::Result;
use crate::storage::{BlockRepository, Direction};
use log::info;
use std::collections::HashSet;

/// What transaction checks need to know about the chain they run against.
pub trait LedgerView {
    fn contains_transaction(&self, id: &str) -> bool;
    fn is_spent(&self, key: &OutputKey) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct UnspentIndex {
    spent: HashSet<OutputKey>,
    transaction_ids: HashSet<String>,
}

impl UnspentIndex {
    pub fn new() -> UnspentIndex {
        UnspentIndex::default()
    }

    /// Streams every stored block once, oldest first.
    pub fn rebuild(repository: &dyn BlockRepository) -> Result<UnspentIndex> {
        let mut index = UnspentIndex::new();
        let mut blocks = 0u64;
        for block in repository.stream_all_blocks(Direction::Forward, None)? {
            index.apply_block(&block?);
            blocks += 1;
        }
        info!(
            "Spent-output index rebuilt from {blocks} blocks: {} transactions, {} spent outputs",
            index.transaction_ids.len(),
            index.spent.len()
        );
        Ok(index)
    }

    pub fn apply_block(&mut self, block: &Block) {
        for tx in block.get_transactions() {
            self.apply_transaction(tx);
        }
    }

    pub fn apply_transaction(&mut self, tx: &Transaction) {
        self.transaction_ids.insert(tx.get_id().to_string());
        for input in tx.get_inputs() {
            self.spent.insert(input.key());
        }
    }

    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transaction_ids.len()
    }
}

impl LedgerView for UnspentIndex {
    fn contains_transaction(&self, id: &str) -> bool {
        self.transaction_ids.contains(id)
    }

    fn is_spent(&self, key: &OutputKey) -> bool {
        self.spent.contains(key)
    }
}

/// A base view plus the transactions accepted so far in the block being
/// checked, so a block cannot spend the same output twice or repeat an id.
pub struct BlockScope<'a> {
    base: &'a dyn LedgerView,
    local: UnspentIndex,
}

impl<'a> BlockScope<'a> {
    pub fn new(base: &'a dyn LedgerView) -> BlockScope<'a> {
        BlockScope {
            base,
            local: UnspentIndex::new(),
        }
    }

    pub fn accept(&mut self, tx: &Transaction) {
        self.local.apply_transaction(tx);
    }
}

impl LedgerView for BlockScope<'_> {
    fn contains_transaction(&self, id: &str) -> bool {
        self.local.contains_transaction(id) || self.base.contains_transaction(id)
    }

    fn is_spent(&self, key: &OutputKey) -> bool {
        self.local.is_spent(key) || self.base.is_spent(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HashProvider, TransactionItem, TransactionType};
    use crate::storage::MemoryBlockRepository;
    use crate::testnet::{append_test_block, create_test_blockchain, create_test_transaction};

    fn spend(id: &str, from: &str, hasher: &HashProvider) -> Transaction {
        Transaction::with_id(
            id,
            TransactionType::Regular,
            vec![TransactionItem::input(from, 0, vec![1], 10)],
            vec![(vec![2], 5)],
            hasher,
        )
        .unwrap()
    }

    #[test]
    fn test_apply_transaction_marks_inputs_spent() {
        let hasher = HashProvider::default();
        let mut index = UnspentIndex::new();
        index.apply_transaction(&spend("T2", "T1", &hasher));

        assert!(index.contains_transaction("T2"));
        assert!(index.is_spent(&OutputKey::new("T1", 0)));
        assert!(!index.is_spent(&OutputKey::new("T1", 1)));
        assert!(!index.is_spent(&OutputKey::new("T2", 0)));
    }

    #[test]
    fn test_block_scope_layers_local_over_base() {
        let hasher = HashProvider::default();
        let mut base = UnspentIndex::new();
        base.apply_transaction(&spend("T2", "T1", &hasher));

        let mut scope = BlockScope::new(&base);
        assert!(scope.is_spent(&OutputKey::new("T1", 0)));
        assert!(!scope.is_spent(&OutputKey::new("T3", 0)));

        scope.accept(&spend("T4", "T3", &hasher));
        assert!(scope.is_spent(&OutputKey::new("T3", 0)));
        assert!(scope.contains_transaction("T4"));
        assert!(!base.contains_transaction("T4"));
    }

    #[test]
    fn test_rebuild_from_repository() {
        let hasher = HashProvider::default();
        let repository = MemoryBlockRepository::new(hasher);
        let genesis = Block::new(0, vec![], vec![], vec![spend("T2", "T1", &hasher)], &hasher).unwrap();
        let genesis = repository.add(genesis).unwrap();
        let next = Block::new(
            1,
            genesis.get_hash().to_vec(),
            vec![],
            vec![spend("T3", "T2", &hasher)],
            &hasher,
        )
        .unwrap();
        repository.add(next).unwrap();

        let index = UnspentIndex::rebuild(&repository).unwrap();
        assert_eq!(index.transaction_count(), 2);
        assert_eq!(index.spent_count(), 2);
        assert!(index.is_spent(&OutputKey::new("T2", 0)));
    }

    #[test]
    fn test_rebuild_matches_sled_chain() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        let first = create_test_transaction(&blockchain, "T2", "T1", 100, 90).unwrap();
        let second = create_test_transaction(&blockchain, "T3", "T2", 90, 80).unwrap();
        append_test_block(&blockchain, vec![first]).unwrap();
        append_test_block(&blockchain, vec![second]).unwrap();

        // Genesis reward plus the two spends
        let index = UnspentIndex::rebuild(blockchain.get_repository().as_ref()).unwrap();
        assert_eq!(index.transaction_count(), 3);
        assert!(index.is_spent(&OutputKey::new("T1", 0)));
        assert!(index.is_spent(&OutputKey::new("T2", 0)));
        assert!(!index.is_spent(&OutputKey::new("T3", 0)));
    }
}
