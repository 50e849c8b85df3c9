//! Data storage and persistence
//!
//! The block repository contract and its sled and in-memory implementations,
//! the spent-output index used for double-spend checks, and the pool of
//! pending transactions.

pub mod memory_pool;
pub mod memory_repository;
pub mod repository;
pub mod sled_repository;
pub mod utxo_set;

pub use memory_pool::MemoryPool;
pub use memory_repository::MemoryBlockRepository;
pub use repository::{
    BlockHeaderStream, BlockObjectStream, BlockRepository, BlockStream, Direction,
    TransactionIdStream,
};
pub use sled_repository::SledBlockRepository;
pub use utxo_set::{BlockScope, LedgerView, UnspentIndex};
