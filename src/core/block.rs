use crate::core::registry::PayloadKind;
use crate::core::{BlockObjectTypeProvider, HashProvider, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use crate::utils::serialization::hex_bytes;
use serde::Serialize;

pub const BLOCK_VERSION: i32 = 1;

/// Payload carried by a block object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockObjectPayload {
    Transaction(Transaction),
    Memo(String),
}

impl BlockObjectPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            BlockObjectPayload::Transaction(_) => PayloadKind::Transaction,
            BlockObjectPayload::Memo(_) => PayloadKind::Memo,
        }
    }
}

/// A generic, type-tagged ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockObject {
    type_code: Option<i64>,
    index: i64,
    version: i64,
    timestamp: i64,
    data: Option<BlockObjectPayload>,
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
}

impl BlockObject {
    /// Resolves the type code from the registry and computes the hash.
    pub fn new(
        registry: &BlockObjectTypeProvider,
        hasher: &HashProvider,
        index: i64,
        version: i64,
        timestamp: i64,
        data: Option<BlockObjectPayload>,
    ) -> Result<BlockObject> {
        let type_code = match &data {
            Some(payload) => Some(registry.get_code(payload.kind()).ok_or_else(|| {
                BlockchainError::Serialization(format!(
                    "Payload kind {} is not registered",
                    payload.kind()
                ))
            })?),
            None => None,
        };

        let mut object = BlockObject {
            type_code,
            index,
            version,
            timestamp,
            data,
            hash: vec![],
        };
        object.hash = object.compute_hash(hasher)?;
        Ok(object)
    }

    pub fn from_parts(
        type_code: Option<i64>,
        index: i64,
        version: i64,
        timestamp: i64,
        data: Option<BlockObjectPayload>,
        hash: Vec<u8>,
    ) -> BlockObject {
        BlockObject {
            type_code,
            index,
            version,
            timestamp,
            data,
            hash,
        }
    }

    pub fn compute_hash(&self, hasher: &HashProvider) -> Result<Vec<u8>> {
        hasher.compute_hash(self)
    }

    pub fn get_type_code(&self) -> Option<i64> {
        self.type_code
    }

    pub fn get_index(&self) -> i64 {
        self.index
    }

    pub fn get_version(&self) -> i64 {
        self.version
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_data(&self) -> Option<&BlockObjectPayload> {
        self.data.as_ref()
    }

    pub fn get_hash(&self) -> &[u8] {
        &self.hash
    }
}

/// Lightweight projection of a block for header streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub version: i32,
    #[serde(with = "hex_bytes")]
    pub previous_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub merkle_root_hash: Vec<u8>,
    pub timestamp: u32,
    pub difficulty: u32,
    pub nonce: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    index: Option<u64>,
    version: i32,
    #[serde(with = "hex_bytes")]
    previous_hash: Vec<u8>,
    timestamp: i64,
    nonce: i64,
    objects: Vec<BlockObject>,
    transactions: Vec<Transaction>,
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
}

impl Block {
    /// A candidate block stamped with the current time and nonce 0.
    pub fn new(
        index: u64,
        previous_hash: Vec<u8>,
        objects: Vec<BlockObject>,
        transactions: Vec<Transaction>,
        hasher: &HashProvider,
    ) -> Result<Block> {
        let mut block = Block {
            index: Some(index),
            version: BLOCK_VERSION,
            previous_hash,
            timestamp: current_timestamp()?,
            nonce: 0,
            objects,
            transactions,
            hash: vec![],
        };
        block.refresh_hash(hasher)?;
        Ok(block)
    }

    /// Reassembles a block from its parts without touching the hash.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        index: Option<u64>,
        version: i32,
        previous_hash: Vec<u8>,
        timestamp: i64,
        nonce: i64,
        objects: Vec<BlockObject>,
        transactions: Vec<Transaction>,
        hash: Vec<u8>,
    ) -> Block {
        Block {
            index,
            version,
            previous_hash,
            timestamp,
            nonce,
            objects,
            transactions,
            hash,
        }
    }

    pub fn compute_hash(&self, hasher: &HashProvider) -> Result<Vec<u8>> {
        hasher.compute_hash(self)
    }

    pub fn refresh_hash(&mut self, hasher: &HashProvider) -> Result<()> {
        self.hash = self.compute_hash(hasher)?;
        Ok(())
    }

    pub fn set_nonce(&mut self, nonce: i64, hasher: &HashProvider) -> Result<()> {
        self.nonce = nonce;
        self.refresh_hash(hasher)
    }

    /// Used by repositories when a block arrives without an index.
    pub(crate) fn assign_index(&mut self, index: u64, hasher: &HashProvider) -> Result<()> {
        self.index = Some(index);
        self.refresh_hash(hasher)
    }

    pub fn get_index(&self) -> Option<u64> {
        self.index
    }

    pub fn get_version(&self) -> i32 {
        self.version
    }

    pub fn get_previous_hash(&self) -> &[u8] {
        &self.previous_hash
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn get_objects(&self) -> &[BlockObject] {
        &self.objects
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get_hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn find_transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.get_id() == id)
    }

    pub fn achieved_difficulty(&self) -> f64 {
        ProofOfWork::achieved_difficulty(&self.hash)
    }

    pub fn merkle_root(&self, hasher: &HashProvider) -> Vec<u8> {
        let leaves: Vec<Vec<u8>> = self
            .transactions
            .iter()
            .map(|tx| tx.get_hash().to_vec())
            .collect();
        MerkleTree::calculate_merkle_root(&leaves, hasher)
    }

    pub fn header(&self, hasher: &HashProvider) -> BlockHeader {
        let seconds = self.timestamp.div_euclid(1000).clamp(0, u32::MAX as i64);
        BlockHeader {
            version: self.version,
            previous_hash: self.previous_hash.clone(),
            merkle_root_hash: self.merkle_root(hasher),
            timestamp: seconds as u32,
            // Saturating cast; NaN becomes 0.
            difficulty: self.achieved_difficulty() as u32,
            nonce: self.nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransactionType;

    fn memo_object(registry: &BlockObjectTypeProvider, hasher: &HashProvider) -> BlockObject {
        BlockObject::new(
            registry,
            hasher,
            0,
            1,
            1_700_000_000_000,
            Some(BlockObjectPayload::Memo("hello".to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_block_object_type_code_is_resolved() {
        let registry = BlockObjectTypeProvider::default();
        let hasher = HashProvider::default();
        let object = memo_object(&registry, &hasher);
        assert_eq!(object.get_type_code(), registry.get_code(PayloadKind::Memo));

        let empty = BlockObject::new(&registry, &hasher, 1, 1, 0, None).unwrap();
        assert_eq!(empty.get_type_code(), None);
        assert!(empty.get_data().is_none());
    }

    #[test]
    fn test_unregistered_payload_is_rejected() {
        let registry = BlockObjectTypeProvider::empty();
        let hasher = HashProvider::default();
        let result = BlockObject::new(
            &registry,
            &hasher,
            0,
            1,
            0,
            Some(BlockObjectPayload::Memo("x".to_string())),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_block_hash_matches_recomputation() {
        let hasher = HashProvider::default();
        let block = Block::new(1, vec![7; 32], vec![], vec![], &hasher).unwrap();
        assert_eq!(block.get_hash(), block.compute_hash(&hasher).unwrap().as_slice());
    }

    #[test]
    fn test_nonce_changes_hash() {
        let hasher = HashProvider::default();
        let mut block = Block::new(1, vec![7; 32], vec![], vec![], &hasher).unwrap();
        let before = block.get_hash().to_vec();
        block.set_nonce(1, &hasher).unwrap();
        assert_ne!(block.get_hash(), before.as_slice());
    }

    #[test]
    fn test_empty_collections_do_not_affect_hash() {
        let hasher = HashProvider::default();
        let block = Block::from_parts(Some(3), 1, vec![1], 10, 0, vec![], vec![], vec![]);

        #[derive(Serialize)]
        struct Sparse {
            index: u64,
            version: i32,
            previous_hash: &'static str,
            timestamp: i64,
            nonce: i64,
        }
        let sparse = Sparse {
            index: 3,
            version: 1,
            previous_hash: "01",
            timestamp: 10,
            nonce: 0,
        };
        assert_eq!(
            block.compute_hash(&hasher).unwrap(),
            hasher.compute_hash(&sparse).unwrap()
        );
    }

    #[test]
    fn test_header_projection() {
        let hasher = HashProvider::default();
        let tx = Transaction::with_id(
            "R1",
            TransactionType::Reward,
            vec![],
            vec![(vec![1; 4], 50)],
            &hasher,
        )
        .unwrap();
        let block = Block::from_parts(
            Some(1),
            1,
            vec![9; 32],
            5_000,
            42,
            vec![],
            vec![tx.clone()],
            vec![0xFF; 32],
        );

        let header = block.header(&hasher);
        assert_eq!(header.timestamp, 5);
        assert_eq!(header.nonce, 42);
        assert_eq!(header.previous_hash, vec![9; 32]);
        assert_eq!(
            header.merkle_root_hash,
            hasher.double_hash_pair(tx.get_hash(), tx.get_hash())
        );
        // 0xFF.. decodes to NaN
        assert_eq!(header.difficulty, 0);
    }
}
