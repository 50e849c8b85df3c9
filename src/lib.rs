//! # Architect Ledger
//!
//! A single-node proof-of-work ledger engine. Blocks carry transactions and
//! generic type-tagged objects, are hashed over a canonical serialized form,
//! and are only appended after the ordered consensus checks pass.
//!
//! ## Layout
//! - `core/`: canonical hashing, the block object registry, the binary codec,
//!   blocks and transactions, proof-of-work and the consensus engine
//! - `storage/`: the block repository contract with sled and in-memory
//!   implementations, the spent-output index and the pending pool
//! - `config/`: TOML and environment configuration
//! - `utils/`: signatures, timestamps and the binary reader/writer
//! - `cli/`: command-line arguments for the `architect-ledger` binary
//!
//! ## Where to start
//! 1. `core/blockchain.rs` for `init`, `add_block`, `check_chain` and `replace_chain`
//! 2. `core/hash.rs` for how a hash is computed
//! 3. `core/codec.rs` for the byte layout of blocks and objects

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use crate::cli::{AddressArg, BlockRef, Command, Opt};
pub use crate::config::{Config, DifficultySettings, GenesisSettings};
pub use crate::core::{
    genesis_block, Block, BlockCodec, BlockHeader, BlockObject, BlockObjectPayload,
    BlockObjectTypeProvider, Blockchain, DifficultyPolicy, FixedDifficulty, HashAlgorithm,
    HashProvider, MerkleTree, OutputKey, PayloadKind, ProofOfWork, SignatureVerifier,
    StructuralVerifier, Transaction, TransactionItem, TransactionItemType, TransactionType,
    TransactionVerifier, ZeroDifficulty,
};
pub use crate::error::{BlockchainError, Result};
pub use crate::storage::{
    BlockRepository, Direction, LedgerView, MemoryBlockRepository, MemoryPool,
    SledBlockRepository, UnspentIndex,
};
pub use crate::utils::{
    current_timestamp, ecdsa_p256_sha256_sign, ecdsa_p256_sha256_verify, new_key_pair,
    public_key_from_pkcs8,
};
