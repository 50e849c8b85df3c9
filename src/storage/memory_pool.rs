use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use sled::Tree;
use std::collections::HashMap;
use std::sync::RwLock;

const PENDING_TREE: &str = "pending_transactions";

/// Pending transactions waiting to be mined, keyed by transaction id.
/// ( K -> tx id, V => Transaction )
///
/// When opened on a sled database every change is mirrored to a tree so the
/// pool survives restarts.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
    tree: Option<Tree>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
            tree: None,
        }
    }

    /// A pool backed by the `pending_transactions` tree of `db`, preloaded with
    /// whatever the tree already holds.
    pub fn open(db: &sled::Db) -> Result<MemoryPool> {
        let tree = db.open_tree(PENDING_TREE).map_err(|e| {
            BlockchainError::Database(format!("Failed to open pending transactions tree: {e}"))
        })?;

        let mut pool = HashMap::new();
        for entry in tree.iter() {
            let (_, value) = entry.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate pending transactions: {e}"))
            })?;
            let tx: Transaction = deserialize(&value)?;
            pool.insert(tx.get_id().to_string(), tx);
        }
        log::info!("Loaded {} pending transactions", pool.len());

        Ok(MemoryPool {
            inner: RwLock::new(pool),
            tree: Some(tree),
        })
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    /// Inserts `tx`, returning false if its id is already pending.
    pub fn add(&self, tx: Transaction) -> Result<bool> {
        let mut pool = self.inner.write().map_err(|_| {
            BlockchainError::Database("Failed to acquire write lock on memory pool".to_string())
        })?;
        if pool.contains_key(tx.get_id()) {
            return Ok(false);
        }
        if let Some(tree) = &self.tree {
            tree.insert(tx.get_id().as_bytes(), serialize(&tx)?)
                .map_err(|e| {
                    BlockchainError::Database(format!("Failed to persist pending transaction: {e}"))
                })?;
        }
        pool.insert(tx.get_id().to_string(), tx);
        Ok(true)
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    /// Removes every listed id. Returns how many were actually pending.
    pub fn remove_all<'a>(&self, txids: impl IntoIterator<Item = &'a str>) -> Result<usize> {
        let mut pool = self.inner.write().map_err(|_| {
            BlockchainError::Database("Failed to acquire write lock on memory pool".to_string())
        })?;
        let mut removed = 0;
        for txid in txids {
            if pool.remove(txid).is_some() {
                removed += 1;
            }
            if let Some(tree) = &self.tree {
                tree.remove(txid.as_bytes()).map_err(|e| {
                    BlockchainError::Database(format!("Failed to remove pending transaction: {e}"))
                })?;
            }
        }
        Ok(removed)
    }

    pub fn remove(&self, txid: &str) -> Result<bool> {
        Ok(self.remove_all([txid])? == 1)
    }

    pub fn ids(&self) -> Vec<String> {
        match self.inner.read() {
            Ok(pool) => pool.keys().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    /// Pending transactions ordered by id.
    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => {
                let mut txs: Vec<Transaction> = pool.values().cloned().collect();
                txs.sort_by(|a, b| a.get_id().cmp(b.get_id()));
                txs
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        let mut pool = self.inner.write().map_err(|_| {
            BlockchainError::Database("Failed to acquire write lock on memory pool".to_string())
        })?;
        if let Some(tree) = &self.tree {
            tree.clear().map_err(|e| {
                BlockchainError::Database(format!("Failed to clear pending transactions: {e}"))
            })?;
        }
        pool.clear();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                true // Conservative default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HashProvider, TransactionType};

    fn fee(id: &str) -> Transaction {
        Transaction::with_id(id, TransactionType::Fee, vec![], vec![(vec![1], 1)], &HashProvider::default())
            .unwrap()
    }

    #[test]
    fn test_add_is_idempotent_per_id() {
        let pool = MemoryPool::new();
        assert!(pool.add(fee("A")).unwrap());
        assert!(!pool.add(fee("A")).unwrap());
        assert_eq!(pool.len(), 1);
        assert!(pool.contains("A"));
    }

    #[test]
    fn test_remove_all_counts_pending_only() {
        let pool = MemoryPool::new();
        pool.add(fee("A")).unwrap();
        pool.add(fee("B")).unwrap();
        assert_eq!(pool.remove_all(["A", "C"]).unwrap(), 1);
        assert_eq!(pool.ids(), vec!["B".to_string()]);
        assert!(pool.remove("B").unwrap());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_persisted_pool_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let pool = MemoryPool::open(&db).unwrap();
            pool.add(fee("B")).unwrap();
            pool.add(fee("A")).unwrap();
            pool.add(fee("C")).unwrap();
            pool.remove("C").unwrap();
            db.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let pool = MemoryPool::open(&db).unwrap();
        let ids: Vec<String> = pool.get_all().iter().map(|tx| tx.get_id().to_string()).collect();
        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(pool.get("A").unwrap(), fee("A"));
    }
}
