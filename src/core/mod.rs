//! Core ledger functionality
//!
//! Canonical hashing, the block object type registry, the binary codec, the
//! block and transaction data model, the proof-of-work difficulty contract and
//! the consensus engine that ties them together.

pub mod block;
pub mod blockchain;
pub mod codec;
pub mod genesis;
pub mod hash;
pub mod merkle;
pub mod proof_of_work;
pub mod registry;
pub mod transaction;
pub mod verifier;

pub use block::{Block, BlockHeader, BlockObject, BlockObjectPayload};
pub use blockchain::Blockchain;
pub use codec::BlockCodec;
pub use genesis::genesis_block;
pub use hash::{HashAlgorithm, HashProvider};
pub use merkle::MerkleTree;
pub use proof_of_work::{DifficultyPolicy, FixedDifficulty, ProofOfWork, ZeroDifficulty};
pub use registry::{BlockObjectTypeProvider, PayloadKind};
pub use transaction::{
    OutputKey, Transaction, TransactionData, TransactionItem, TransactionItemType,
    TransactionType,
};
pub use verifier::{SignatureVerifier, StructuralVerifier, TransactionVerifier};
