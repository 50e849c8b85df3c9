//! The block repository contract.
//!
//! The consensus engine only talks to storage through [`BlockRepository`].
//! Appends are totally ordered: the index given to a new block is always the
//! current length, and a read issued after a successful `add` observes it.
//! Streams are lazy and hold at most one block at a time.

use crate::core::{Block, BlockHeader, BlockObject, HashProvider, TransactionItem, TransactionItemType};
use crate::error::{BlockchainError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

pub type BlockStream<'a> = Box<dyn Iterator<Item = Result<Block>> + 'a>;
pub type BlockObjectStream<'a> = Box<dyn Iterator<Item = Result<BlockObject>> + 'a>;
pub type BlockHeaderStream<'a> = Box<dyn Iterator<Item = Result<BlockHeader>> + 'a>;
pub type TransactionIdStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

pub trait BlockRepository: Send + Sync {
    /// Hash provider the stored blocks were hashed with.
    fn hasher(&self) -> &HashProvider;

    fn get_length(&self) -> Result<u64>;

    fn get_by_index(&self, index: u64) -> Result<Option<Block>>;

    fn get_by_hash(&self, hash: &[u8]) -> Result<Option<Block>>;

    fn get_by_transaction_id(&self, id: &str) -> Result<Option<Block>>;

    /// Appends `block` at index `get_length()`. A block without an index gets
    /// one assigned (and its hash recomputed); a block with any other index is
    /// refused. Returns the block as stored.
    fn add(&self, block: Block) -> Result<Block>;

    fn get_genesis_block(&self) -> Result<Option<Block>> {
        self.get_by_index(0)
    }

    fn get_last_block(&self) -> Result<Option<Block>> {
        match self.get_length()? {
            0 => Ok(None),
            length => self.get_by_index(length - 1),
        }
    }

    /// Blocks from `start` (inclusive) in `direction`. `None` starts at the
    /// first block going forward and at the last block going backward.
    fn stream_all_blocks(&self, direction: Direction, start: Option<u64>) -> Result<BlockStream<'_>> {
        let length = self.get_length()?;
        let indices: Box<dyn Iterator<Item = u64>> = match direction {
            Direction::Forward => Box::new(start.unwrap_or(0)..length),
            Direction::Backward => {
                let end = match start {
                    Some(start) => start.saturating_add(1).min(length),
                    None => length,
                };
                Box::new((0..end).rev())
            }
        };
        Ok(Box::new(indices.map(move |index| {
            self.get_by_index(index)?.ok_or_else(|| {
                BlockchainError::Database(format!("Block {index} vanished during streaming"))
            })
        })))
    }

    fn stream_all_block_objects(
        &self,
        direction: Direction,
        start: Option<u64>,
    ) -> Result<BlockObjectStream<'_>> {
        let blocks = self.stream_all_blocks(direction, start)?;
        Ok(Box::new(blocks.flat_map(|block| match block {
            Ok(block) => block
                .get_objects()
                .iter()
                .cloned()
                .map(Ok)
                .collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        })))
    }

    fn stream_all_block_headers(
        &self,
        direction: Direction,
        start: Option<u64>,
    ) -> Result<BlockHeaderStream<'_>> {
        let hasher = *self.hasher();
        let blocks = self.stream_all_blocks(direction, start)?;
        Ok(Box::new(
            blocks.map(move |block| block.map(|block| block.header(&hasher))),
        ))
    }

    /// Ids of the transactions carried in `Block.transactions`, block by block.
    fn stream_all_transaction_ids(
        &self,
        direction: Direction,
        start: Option<u64>,
    ) -> Result<TransactionIdStream<'_>> {
        let blocks = self.stream_all_blocks(direction, start)?;
        Ok(Box::new(blocks.flat_map(|block| match block {
            Ok(block) => block
                .get_transactions()
                .iter()
                .map(|tx| Ok(tx.get_id().to_string()))
                .collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        })))
    }

    /// Every item of `kind` whose address is `address`, in chain order.
    fn get_transaction_items_for_address(
        &self,
        kind: TransactionItemType,
        address: &[u8],
    ) -> Result<Vec<TransactionItem>> {
        let mut items = vec![];
        for block in self.stream_all_blocks(Direction::Forward, None)? {
            let block = block?;
            for tx in block.get_transactions() {
                let list = match kind {
                    TransactionItemType::Input => tx.get_inputs(),
                    TransactionItemType::Output => tx.get_outputs(),
                };
                items.extend(list.iter().filter(|item| item.get_address() == address).cloned());
            }
        }
        Ok(items)
    }
}

/// Checks the index a block is about to be stored at and assigns it if unset.
pub(crate) fn prepare_append(block: &mut Block, length: u64, hasher: &HashProvider) -> Result<()> {
    match block.get_index() {
        None => block.assign_index(length, hasher),
        Some(index) if index == length => Ok(()),
        Some(index) => Err(BlockchainError::BlockAssertion(format!(
            "Block index conflict: expected {length}, got {index}"
        ))),
    }
}
