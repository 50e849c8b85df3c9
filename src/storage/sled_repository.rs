// Durable block storage on top of Sled.
// Blocks are stored in their canonical binary form keyed by big-endian index,
// so sled's key order is chain order and range scans double as lazy streams.
// Three secondary trees map block hash, transaction id and address to the
// block index; all four are written in one sled transaction per append.

use crate::core::codec::{decode_item, encode_item};
use crate::core::{Block, BlockCodec, HashProvider, TransactionItem, TransactionItemType};
use crate::error::{BlockchainError, Result};
use crate::storage::repository::{prepare_append, BlockRepository, BlockStream, Direction};
use log::debug;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
const BLOCK_HASHES_TREE: &str = "block_hashes";
const TRANSACTIONS_TREE: &str = "transaction_index";
const ADDRESSES_TREE: &str = "address_index";

pub struct SledBlockRepository {
    db: Db,
    blocks: Tree,
    hashes: Tree,
    transactions: Tree,
    addresses: Tree,
    codec: BlockCodec,
}

fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn key_index(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| BlockchainError::Database(format!("Invalid block key length {}", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

// I prefix address keys with the item kind and the address length so one
// address can never be a prefix of another.
fn address_prefix(kind: TransactionItemType, address: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(5 + address.len());
    prefix.push(kind.code() as u8);
    prefix.extend_from_slice(&(address.len() as u32).to_be_bytes());
    prefix.extend_from_slice(address);
    prefix
}

fn address_key(item: &TransactionItem, block_index: u64, position: u32) -> Vec<u8> {
    let mut key = address_prefix(item.get_type(), item.get_address());
    key.extend_from_slice(&block_index.to_be_bytes());
    key.extend_from_slice(&position.to_be_bytes());
    key
}

impl SledBlockRepository {
    pub fn open(path: impl AsRef<Path>, codec: BlockCodec) -> Result<SledBlockRepository> {
        let db = sled::open(path.as_ref())
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        Self::from_db(db, codec)
    }

    pub fn from_db(db: Db, codec: BlockCodec) -> Result<SledBlockRepository> {
        let open = |name: &str| {
            db.open_tree(name).map_err(|e| {
                BlockchainError::Database(format!("Failed to open {name} tree: {e}"))
            })
        };
        Ok(SledBlockRepository {
            blocks: open(BLOCKS_TREE)?,
            hashes: open(BLOCK_HASHES_TREE)?,
            transactions: open(TRANSACTIONS_TREE)?,
            addresses: open(ADDRESSES_TREE)?,
            db,
            codec,
        })
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn codec(&self) -> &BlockCodec {
        &self.codec
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }

    fn decode(&self, bytes: &IVec) -> Result<Block> {
        self.codec.decode_block(bytes)
    }

    fn block_at(&self, index_bytes: Option<IVec>) -> Result<Option<Block>> {
        match index_bytes {
            Some(bytes) => self.get_by_index(key_index(&bytes)?),
            None => Ok(None),
        }
    }
}

impl BlockRepository for SledBlockRepository {
    fn hasher(&self) -> &HashProvider {
        self.codec.hasher()
    }

    fn get_length(&self) -> Result<u64> {
        let last = self
            .blocks
            .last()
            .map_err(|e| BlockchainError::Database(format!("Failed to read last block: {e}")))?;
        match last {
            Some((key, _)) => Ok(key_index(&key)? + 1),
            None => Ok(0),
        }
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Block>> {
        let bytes = self
            .blocks
            .get(index_key(index))
            .map_err(|e| BlockchainError::Database(format!("Failed to get block {index}: {e}")))?;
        bytes.map(|bytes| self.decode(&bytes)).transpose()
    }

    fn get_by_hash(&self, hash: &[u8]) -> Result<Option<Block>> {
        let index = self
            .hashes
            .get(hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to look up block hash: {e}")))?;
        self.block_at(index)
    }

    fn get_by_transaction_id(&self, id: &str) -> Result<Option<Block>> {
        let index = self.transactions.get(id.as_bytes()).map_err(|e| {
            BlockchainError::Database(format!("Failed to look up transaction {id}: {e}"))
        })?;
        self.block_at(index)
    }

    fn get_last_block(&self) -> Result<Option<Block>> {
        let last = self
            .blocks
            .last()
            .map_err(|e| BlockchainError::Database(format!("Failed to read last block: {e}")))?;
        last.map(|(_, bytes)| self.decode(&bytes)).transpose()
    }

    fn add(&self, mut block: Block) -> Result<Block> {
        let length = self.get_length()?;
        prepare_append(&mut block, length, self.codec.hasher())?;
        let index = length;
        let block_data = self.codec.encode_block(&block)?;

        let mut address_entries = vec![];
        let mut position = 0u32;
        for tx in block.get_transactions() {
            for item in tx.items() {
                address_entries.push((address_key(item, index, position), encode_item(item)?));
                position = position.checked_add(1).ok_or_else(|| {
                    BlockchainError::Database("Too many transaction items in block".to_string())
                })?;
            }
        }

        let key = index_key(index);
        (&self.blocks, &self.hashes, &self.transactions, &self.addresses)
            .transaction(|(blocks, hashes, transactions, addresses)| {
                // Another writer may have appended since the length was read.
                if blocks.get(key)?.is_some()
                    || (index > 0 && blocks.get(index_key(index - 1))?.is_none())
                {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::BlockAssertion(format!(
                            "Block index conflict: {index} is not the next index"
                        )),
                    ));
                }
                blocks.insert(&key[..], block_data.as_slice())?;
                hashes.insert(block.get_hash(), &key[..])?;
                for tx in block.get_transactions() {
                    transactions.insert(tx.get_id().as_bytes(), &key[..])?;
                }
                for (address_key, item) in &address_entries {
                    addresses.insert(address_key.as_slice(), item.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<BlockchainError>| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => {
                    BlockchainError::Database(format!("Failed to append block {index}: {err}"))
                }
            })?;

        debug!("Stored block {index} ({} bytes)", block_data.len());
        Ok(block)
    }

    fn stream_all_blocks(&self, direction: Direction, start: Option<u64>) -> Result<BlockStream<'_>> {
        let range = match (direction, start) {
            (Direction::Forward, Some(start)) => self.blocks.range(index_key(start)..),
            (Direction::Backward, Some(start)) => self.blocks.range(..=index_key(start)),
            (_, None) => self.blocks.iter(),
        };
        let decode = move |entry: sled::Result<(IVec, IVec)>| {
            let (_, bytes) = entry
                .map_err(|e| BlockchainError::Database(format!("Failed to iterate blocks: {e}")))?;
            self.decode(&bytes)
        };
        Ok(match direction {
            Direction::Forward => Box::new(range.map(decode)),
            Direction::Backward => Box::new(range.rev().map(decode)),
        })
    }

    fn get_transaction_items_for_address(
        &self,
        kind: TransactionItemType,
        address: &[u8],
    ) -> Result<Vec<TransactionItem>> {
        self.addresses
            .scan_prefix(address_prefix(kind, address))
            .map(|entry| {
                let (_, bytes) = entry.map_err(|e| {
                    BlockchainError::Database(format!("Failed to iterate address index: {e}"))
                })?;
                decode_item(&bytes)
            })
            .collect()
    }
}
