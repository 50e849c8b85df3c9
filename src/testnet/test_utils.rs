//! Test utilities for ledger testing

use crate::config::Config;
use crate::core::{Block, Blockchain, ProofOfWork, Transaction, TransactionItem, TransactionType};
use crate::error::{BlockchainError, Result};
use tempfile::TempDir;

/// Nonces tried before a test block gives up. The zero target is met by
/// roughly half of all hashes, so this is never reached in practice.
pub const TEST_MAX_ATTEMPTS: u64 = 100_000;

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Create an initialized sled-backed chain with temporary storage
pub fn create_test_blockchain() -> Result<(Blockchain, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let blockchain = Blockchain::open(&Config::with_data_dir(temp_dir.path()))?;
    blockchain.init()?;
    Ok((blockchain, temp_dir))
}

/// A block on top of `previous` whose hash meets `target`
pub fn mine_test_block(
    blockchain: &Blockchain,
    previous: &Block,
    transactions: Vec<Transaction>,
    target: f64,
) -> Result<Block> {
    let index = previous
        .get_index()
        .map(|i| i + 1)
        .ok_or_else(|| BlockchainError::BlockAssertion("Previous block has no index".to_string()))?;
    let hasher = blockchain.get_hasher();
    let mut block = Block::new(index, previous.get_hash().to_vec(), vec![], transactions, hasher)?;
    ProofOfWork::prove_work_for(&mut block, target, hasher, TEST_MAX_ATTEMPTS)?;
    Ok(block)
}

/// Mine and append `transactions` on top of the current tip
pub fn append_test_block(blockchain: &Blockchain, transactions: Vec<Transaction>) -> Result<Block> {
    let last = blockchain
        .get_last_block()?
        .ok_or_else(|| BlockchainError::BlockchainAssertion("Chain is empty".to_string()))?;
    let block = mine_test_block(blockchain, &last, transactions, 0.0)?;
    blockchain.add_block(block)
}

/// A regular transaction spending output 0 of `from` into a single output
pub fn create_test_transaction(
    blockchain: &Blockchain,
    id: &str,
    from: &str,
    amount_in: u64,
    amount_out: u64,
) -> Result<Transaction> {
    Transaction::with_id(
        id,
        TransactionType::Regular,
        vec![TransactionItem::input(from, 0, vec![1; 8], amount_in)],
        vec![(vec![2; 8], amount_out)],
        blockchain.get_hasher(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_blockchain() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_length().unwrap(), 1);
    }

    #[test]
    fn test_append_test_block() {
        let (blockchain, _temp_dir) = create_test_blockchain().unwrap();
        let tx = create_test_transaction(&blockchain, "t1", "genesis-reward", 50, 40).unwrap();
        let block = append_test_block(&blockchain, vec![tx]).unwrap();
        assert_eq!(block.get_index(), Some(1));
        assert_eq!(blockchain.get_length().unwrap(), 2);
        assert_eq!(blockchain.verify_stored_chain().unwrap(), 2);
    }
}
