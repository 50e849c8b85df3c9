use crate::config::GenesisSettings;
use crate::core::block::BLOCK_VERSION;
use crate::core::{Block, HashProvider, Transaction, TransactionType};
use crate::error::Result;

pub const GENESIS_REWARD_ID: &str = "genesis-reward";

/// Builds the fixed first block: index 0, no previous hash, nonce 0 and a single
/// reward transaction. Same settings and hash algorithm give the same hash.
pub fn genesis_block(settings: &GenesisSettings, hasher: &HashProvider) -> Result<Block> {
    let reward = Transaction::with_id(
        GENESIS_REWARD_ID,
        TransactionType::Reward,
        vec![],
        vec![(settings.reward_address_bytes()?, settings.reward_amount)],
        hasher,
    )?;

    let mut block = Block::from_parts(
        Some(0),
        BLOCK_VERSION,
        vec![],
        settings.timestamp,
        0,
        vec![],
        vec![reward],
        vec![],
    );
    block.refresh_hash(hasher)?;
    Ok(block)
}
