// This is the consensus engine - the heart of the ledger.
// It owns no chain data itself: blocks live in the repository, and the only
// in-memory state is the spent-output index, which is always rebuildable from
// the repository. Every chain mutation goes through one writer lock so two
// callers can never both validate against the same last block and append.

use crate::config::Config;
use crate::core::genesis::genesis_block;
use crate::core::transaction::sum_amounts;
use crate::core::{
    Block, BlockCodec, BlockHeader, BlockObject, BlockObjectPayload, BlockObjectTypeProvider,
    DifficultyPolicy,
    HashProvider, ProofOfWork, SignatureVerifier, StructuralVerifier, Transaction,
    TransactionItem, TransactionItemType, TransactionType, TransactionVerifier,
};
use crate::error::{BlockchainError, Result};
use crate::storage::{
    BlockHeaderStream, BlockRepository, BlockScope, BlockStream, Direction, LedgerView,
    MemoryPool, SledBlockRepository, UnspentIndex,
};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct Blockchain {
    repository: Arc<dyn BlockRepository>,
    hasher: HashProvider,
    verifier: Box<dyn TransactionVerifier>,
    difficulty: Box<dyn DifficultyPolicy>,
    registry: Arc<BlockObjectTypeProvider>,
    genesis: Block,
    pending: Arc<MemoryPool>,
    // Spent keys and transaction ids of the persisted chain
    index: RwLock<UnspentIndex>,
    // Single-writer guard around every append
    writer: Mutex<()>,
}

impl Blockchain {
    pub fn new(
        repository: Arc<dyn BlockRepository>,
        pending: Arc<MemoryPool>,
        registry: Arc<BlockObjectTypeProvider>,
        config: &Config,
    ) -> Result<Blockchain> {
        let hasher = HashProvider::new(config.hash_algorithm);
        if *repository.hasher() != hasher {
            return Err(BlockchainError::Config(format!(
                "Repository hashes with {} but the node is configured for {}",
                repository.hasher().algorithm(),
                hasher.algorithm()
            )));
        }

        let verifier: Box<dyn TransactionVerifier> = if config.verify_signatures {
            Box::new(SignatureVerifier)
        } else {
            Box::new(StructuralVerifier)
        };

        Ok(Blockchain {
            genesis: genesis_block(&config.genesis, &hasher)?,
            difficulty: config.difficulty.policy(),
            repository,
            hasher,
            verifier,
            registry,
            pending,
            index: RwLock::new(UnspentIndex::new()),
            writer: Mutex::new(()),
        })
    }

    // When I want a node backed by sled under `config.data_dir`. The block
    // trees and the pending pool share one database.
    pub fn open(config: &Config) -> Result<Blockchain> {
        let path = config.blocks_path();
        let db = sled::open(&path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;
        let registry = Arc::new(BlockObjectTypeProvider::default());
        let codec = BlockCodec::new(HashProvider::new(config.hash_algorithm), registry.clone());
        let pending = Arc::new(MemoryPool::open(&db)?);
        let repository = Arc::new(SledBlockRepository::from_db(db, codec)?);
        Self::new(repository, pending, registry, config)
    }

    pub fn with_verifier(mut self, verifier: Box<dyn TransactionVerifier>) -> Blockchain {
        self.verifier = verifier;
        self
    }

    pub fn with_difficulty_policy(mut self, difficulty: Box<dyn DifficultyPolicy>) -> Blockchain {
        self.difficulty = difficulty;
        self
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| BlockchainError::Database("Chain writer lock poisoned".to_string()))
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, UnspentIndex>> {
        self.index.read().map_err(|_| {
            BlockchainError::Database("Failed to acquire read lock on spent-output index".to_string())
        })
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, UnspentIndex>> {
        self.index.write().map_err(|_| {
            BlockchainError::Database("Failed to acquire write lock on spent-output index".to_string())
        })
    }

    /// Stores the genesis block on an empty repository, or checks that the
    /// stored one is ours. Then rebuilds the spent-output index and drops
    /// pending transactions that already made it into a block.
    pub fn init(&self) -> Result<()> {
        let _guard = self.lock_writer()?;

        if self.repository.get_length()? == 0 {
            info!(
                "Creating genesis block {}",
                HEXLOWER.encode(self.genesis.get_hash())
            );
            self.repository.add(self.genesis.clone())?;
        } else {
            let stored = self.repository.get_genesis_block()?.ok_or_else(|| {
                BlockchainError::Database("Chain has blocks but no genesis block".to_string())
            })?;
            if stored.get_hash() != self.genesis.get_hash() {
                return Err(BlockchainError::BlockchainAssertion(format!(
                    "Invalid genesis block: expected hash {}, got {}",
                    HEXLOWER.encode(self.genesis.get_hash()),
                    HEXLOWER.encode(stored.get_hash())
                )));
            }
        }

        self.reindex_locked()?;

        let stale: Vec<String> = {
            let index = self.read_index()?;
            self.pending
                .ids()
                .into_iter()
                .filter(|id| index.contains_transaction(id))
                .collect()
        };
        if !stale.is_empty() {
            match self.pending.remove_all(stale.iter().map(String::as_str)) {
                Ok(removed) => info!("Removed {removed} already mined transactions from the pending pool"),
                Err(e) => warn!("Failed to reconcile pending pool: {e}"),
            }
        }

        info!(
            "Chain ready with {} blocks",
            self.repository.get_length()?
        );
        Ok(())
    }

    /// Rebuilds the spent-output index from storage.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.reindex_locked()
    }

    fn reindex_locked(&self) -> Result<()> {
        let rebuilt = UnspentIndex::rebuild(self.repository.as_ref())?;
        *self.write_index()? = rebuilt;
        Ok(())
    }

    /// Validates `candidate` against the last stored block and appends it.
    /// Nothing is changed when a check fails.
    pub fn add_block(&self, candidate: Block) -> Result<Block> {
        let _guard = self.lock_writer()?;
        self.append_locked(candidate)
    }

    fn append_locked(&self, candidate: Block) -> Result<Block> {
        let last = self.repository.get_last_block()?.ok_or_else(|| {
            BlockchainError::BlockchainAssertion("Chain has not been initialized".to_string())
        })?;

        {
            let index = self.read_index()?;
            if let Err(e) = self.check_block_against(&candidate, &last, &*index) {
                warn!("Rejected block {:?}: {e}", candidate.get_index());
                return Err(e);
            }
        }

        let stored = {
            let mut index = self.write_index()?;
            let stored = self.repository.add(candidate)?;
            index.apply_block(&stored);
            stored
        };

        info!(
            "Appended block {:?} {} with {} transactions",
            stored.get_index(),
            HEXLOWER.encode(stored.get_hash()),
            stored.get_transactions().len()
        );

        // The append is durable at this point; a failed prune only leaves
        // stale entries behind for the next init to clean up.
        let ids = stored.get_transactions().iter().map(|tx| tx.get_id());
        match self.pending.remove_all(ids) {
            Ok(0) => {}
            Ok(removed) => debug!("Pruned {removed} transactions from the pending pool"),
            Err(e) => warn!("Failed to prune pending pool after block {:?}: {e}", stored.get_index()),
        }

        Ok(stored)
    }

    /// Validates a whole candidate chain on its own: it must start with our
    /// genesis block and every following block must pass `check_block` against
    /// its predecessor, with double spends tracked across the candidate only.
    /// The first violation is returned unchanged.
    pub fn check_chain(&self, candidate: &[Block]) -> Result<()> {
        let first = candidate.first().ok_or_else(|| {
            BlockchainError::BlockchainAssertion("Candidate chain is empty".to_string())
        })?;
        self.check_genesis(first)?;

        let mut overlay = UnspentIndex::new();
        overlay.apply_block(first);
        for pair in candidate.windows(2) {
            self.check_block_against(&pair[1], &pair[0], &overlay)?;
            overlay.apply_block(&pair[1]);
        }
        Ok(())
    }

    // Stored and recomputed hash must both equal the configured genesis hash.
    fn check_genesis(&self, block: &Block) -> Result<()> {
        if block.get_hash() != self.genesis.get_hash()
            || block.compute_hash(&self.hasher)? != self.genesis.get_hash()
        {
            return Err(BlockchainError::BlockchainAssertion(format!(
                "Invalid genesis block: expected hash {}, got {}",
                HEXLOWER.encode(self.genesis.get_hash()),
                HEXLOWER.encode(block.get_hash())
            )));
        }
        Ok(())
    }

    /// Re-runs `check_chain` over the stored chain, streaming one block at a
    /// time. Returns the number of blocks checked.
    pub fn verify_stored_chain(&self) -> Result<u64> {
        let mut blocks = self.repository.stream_all_blocks(Direction::Forward, None)?;
        let mut previous = match blocks.next() {
            Some(block) => block?,
            None => return Ok(0),
        };
        self.check_genesis(&previous)?;

        let mut overlay = UnspentIndex::new();
        overlay.apply_block(&previous);
        let mut checked = 1;
        for block in blocks {
            let block = block?;
            self.check_block_against(&block, &previous, &overlay)?;
            overlay.apply_block(&block);
            previous = block;
            checked += 1;
        }
        Ok(checked)
    }

    /// Fork choice: only a strictly longer, fully valid chain replaces ours.
    /// The blocks beyond our length are appended one by one through the
    /// normal append path; the appended blocks are returned.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> Result<Vec<Block>> {
        let _guard = self.lock_writer()?;

        let current = self.repository.get_length()?;
        let offered = candidate.len() as u64;
        if offered <= current {
            return Err(BlockchainError::BlockchainAssertion(format!(
                "Invalid chain length: expected more than {current} blocks, got {offered}"
            )));
        }

        self.check_chain(&candidate)?;

        let start = usize::try_from(current).map_err(|_| {
            BlockchainError::BlockchainAssertion(format!("Chain length {current} is too large"))
        })?;
        let mut appended = Vec::with_capacity(candidate.len() - start);
        for block in candidate.into_iter().skip(start) {
            appended.push(self.append_locked(block)?);
        }
        info!(
            "Replaced chain: {} blocks appended, length now {offered}",
            appended.len()
        );
        Ok(appended)
    }

    /// Runs the block checks against the persisted chain.
    pub fn check_block(&self, new_block: &Block, previous_block: &Block) -> Result<()> {
        let index = self.read_index()?;
        self.check_block_against(new_block, previous_block, &*index)
    }

    // The checks run in a fixed order; the first violated rule is reported.
    fn check_block_against(
        &self,
        new_block: &Block,
        previous_block: &Block,
        view: &dyn LedgerView,
    ) -> Result<()> {
        let expected_index = previous_block.get_index().and_then(|i| i.checked_add(1));
        let new_index = match (expected_index, new_block.get_index()) {
            (Some(expected), Some(actual)) if expected == actual => actual,
            (expected, actual) => {
                return Err(BlockchainError::BlockAssertion(format!(
                    "Invalid index: expected {expected:?}, got {actual:?}"
                )));
            }
        };

        if new_block.get_previous_hash() != previous_block.get_hash() {
            return Err(BlockchainError::BlockAssertion(format!(
                "Invalid previoushash: expected {}, got {}",
                HEXLOWER.encode(previous_block.get_hash()),
                HEXLOWER.encode(new_block.get_previous_hash())
            )));
        }

        let recomputed = new_block.compute_hash(&self.hasher)?;
        if recomputed != new_block.get_hash() {
            return Err(BlockchainError::BlockAssertion(format!(
                "Invalid hash: expected {}, got {}",
                HEXLOWER.encode(&recomputed),
                HEXLOWER.encode(new_block.get_hash())
            )));
        }

        let required = self.difficulty.get_difficulty(new_index);
        let achieved = new_block.achieved_difficulty();
        if !ProofOfWork::meets_target(new_block.get_hash(), required) {
            return Err(BlockchainError::BlockAssertion(format!(
                "Invalid proof-of-work difficulty: expected at least {required}, got {achieved}"
            )));
        }

        self.check_objects(new_block)?;

        let mut scope = BlockScope::new(view);
        for tx in new_block.get_transactions() {
            self.check_transaction_against(tx, &scope)?;
            scope.accept(tx);
        }

        let mut inputs = 0u64;
        let mut outputs = 0u64;
        for tx in new_block.get_transactions() {
            inputs = sum_amounts(tx.get_inputs())
                .ok()
                .and_then(|sum| inputs.checked_add(sum))
                .ok_or_else(|| BlockchainError::BlockAssertion("Input total overflows".to_string()))?;
            outputs = sum_amounts(tx.get_outputs())
                .ok()
                .and_then(|sum| outputs.checked_add(sum))
                .ok_or_else(|| BlockchainError::BlockAssertion("Output total overflows".to_string()))?;
        }
        if outputs > inputs {
            return Err(BlockchainError::BlockAssertion(format!(
                "Invalid block balance: outputs {outputs} exceed inputs {inputs}"
            )));
        }

        for kind in [TransactionType::Fee, TransactionType::Reward] {
            let count = new_block
                .get_transactions()
                .iter()
                .filter(|tx| tx.get_type() == kind)
                .count();
            if count > 1 {
                return Err(BlockchainError::BlockAssertion(format!(
                    "Invalid {kind:?} transaction count: expected at most 1, got {count}"
                )));
            }
        }

        Ok(())
    }

    // Object hashes do not feed the block hash, so each object is checked on
    // its own: stored hash, and a type code registered for its payload kind.
    fn check_objects(&self, block: &Block) -> Result<()> {
        for (position, object) in block.get_objects().iter().enumerate() {
            let recomputed = object.compute_hash(&self.hasher)?;
            if recomputed != object.get_hash() {
                return Err(BlockchainError::BlockAssertion(format!(
                    "Invalid block object {position} hash: expected {}, got {}",
                    HEXLOWER.encode(&recomputed),
                    HEXLOWER.encode(object.get_hash())
                )));
            }

            let expected = object
                .get_data()
                .and_then(|payload| self.registry.get_code(payload.kind()));
            let consistent = match (object.get_type_code(), object.get_data()) {
                (None, None) => true,
                (Some(code), Some(_)) => expected == Some(code),
                _ => false,
            };
            if !consistent {
                return Err(BlockchainError::BlockAssertion(format!(
                    "Invalid block object {position} type code: expected {expected:?}, got {:?}",
                    object.get_type_code()
                )));
            }

            if let Some(BlockObjectPayload::Transaction(tx)) = object.get_data() {
                if tx.compute_hash(&self.hasher)? != tx.get_hash() {
                    return Err(BlockchainError::BlockAssertion(format!(
                        "Invalid block object {position} transaction {} hash",
                        tx.get_id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Structure/signature check, then id uniqueness and unspent inputs
    /// against the persisted chain.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        let index = self.read_index()?;
        self.check_transaction_against(tx, &*index)
    }

    fn check_transaction_against(&self, tx: &Transaction, view: &dyn LedgerView) -> Result<()> {
        self.verifier.verify(tx, &self.hasher)?;

        if view.contains_transaction(tx.get_id()) {
            return Err(BlockchainError::TransactionAssertion(format!(
                "Transaction {} already exists in the chain",
                tx.get_id()
            )));
        }

        for input in tx.get_inputs() {
            let key = input.key();
            if view.is_spent(&key) {
                return Err(BlockchainError::TransactionAssertion(format!(
                    "Input {key} of transaction {} is already spent",
                    tx.get_id()
                )));
            }
        }
        Ok(())
    }

    /// Outputs paid to `address` that no input on the chain has spent.
    pub fn get_unspent_transaction_items_for_address(
        &self,
        address: &[u8],
    ) -> Result<Vec<TransactionItem>> {
        let outputs = self
            .repository
            .get_transaction_items_for_address(TransactionItemType::Output, address)?;
        let spent: HashSet<_> = self
            .repository
            .get_transaction_items_for_address(TransactionItemType::Input, address)?
            .iter()
            .map(TransactionItem::key)
            .collect();
        Ok(outputs
            .into_iter()
            .filter(|output| !spent.contains(&output.key()))
            .collect())
    }

    /// Checks `tx` against the chain and queues it for mining. Runs under the
    /// writer lock so no block lands between the check and the insert.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        let _guard = self.lock_writer()?;
        if self.pending.contains(tx.get_id()) {
            return Err(BlockchainError::TransactionAssertion(format!(
                "Transaction {} is already pending",
                tx.get_id()
            )));
        }
        self.check_transaction(&tx)?;

        let id = tx.get_id().to_string();
        if !self.pending.add(tx)? {
            return Err(BlockchainError::TransactionAssertion(format!(
                "Transaction {id} is already pending"
            )));
        }
        info!("Accepted pending transaction {id}");
        Ok(())
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.get_all()
    }

    /// Next block on top of the current tip, not yet mined.
    pub fn candidate_block(
        &self,
        objects: Vec<BlockObject>,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let last = self.repository.get_last_block()?.ok_or_else(|| {
            BlockchainError::BlockchainAssertion("Chain has not been initialized".to_string())
        })?;
        let index = last
            .get_index()
            .and_then(|i| i.checked_add(1))
            .ok_or_else(|| BlockchainError::BlockAssertion("Last block has no index".to_string()))?;
        Block::new(index, last.get_hash().to_vec(), objects, transactions, &self.hasher)
    }

    // When I want to mine the pending pool: every pending transaction that
    // still checks out goes in, plus a reward paying the collected fees to
    // `reward_address`. The block is then searched for a valid nonce and
    // appended.
    pub fn mine_pending(&self, reward_address: &[u8], max_attempts: u64) -> Result<Block> {
        let mut selected = vec![];
        let mut fees = 0u64;
        {
            let index = self.read_index()?;
            let mut scope = BlockScope::new(&*index);
            for tx in self.pending.get_all() {
                if tx.get_type() != TransactionType::Regular {
                    continue;
                }
                if let Err(e) = self.check_transaction_against(&tx, &scope) {
                    warn!("Skipping pending transaction {}: {e}", tx.get_id());
                    continue;
                }
                let fee = tx.input_total()?.saturating_sub(tx.output_total()?);
                fees = fees.checked_add(fee).ok_or_else(|| {
                    BlockchainError::TransactionAssertion("Fee total overflows".to_string())
                })?;
                scope.accept(&tx);
                selected.push(tx);
            }
        }

        if fees > 0 {
            let reward = Transaction::new(
                TransactionType::Reward,
                vec![],
                vec![(reward_address.to_vec(), fees)],
                &self.hasher,
            )?;
            selected.insert(0, reward);
        }

        let mut block = self.candidate_block(vec![], selected)?;
        let index = block.get_index().unwrap_or_default();
        let target = self.difficulty.get_difficulty(index);
        info!(
            "Mining block {index} with {} transactions ({fees} in fees, target {target})",
            block.get_transactions().len()
        );
        ProofOfWork::prove_work_for(&mut block, target, &self.hasher, max_attempts)?;
        self.add_block(block)
    }

    pub fn get_length(&self) -> Result<u64> {
        self.repository.get_length()
    }

    pub fn get_genesis_block(&self) -> Result<Option<Block>> {
        self.repository.get_genesis_block()
    }

    pub fn get_last_block(&self) -> Result<Option<Block>> {
        self.repository.get_last_block()
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Option<Block>> {
        self.repository.get_by_index(index)
    }

    pub fn get_block_by_hash(&self, hash: &[u8]) -> Result<Option<Block>> {
        self.repository.get_by_hash(hash)
    }

    pub fn get_block_by_transaction_id(&self, id: &str) -> Result<Option<Block>> {
        self.repository.get_by_transaction_id(id)
    }

    pub fn blocks(&self, direction: Direction, start: Option<u64>) -> Result<BlockStream<'_>> {
        self.repository.stream_all_blocks(direction, start)
    }

    pub fn headers(&self, direction: Direction, start: Option<u64>) -> Result<BlockHeaderStream<'_>> {
        self.repository.stream_all_block_headers(direction, start)
    }

    pub fn header(&self, block: &Block) -> BlockHeader {
        block.header(&self.hasher)
    }

    /// The configured genesis block, whether or not it is stored yet.
    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn get_hasher(&self) -> &HashProvider {
        &self.hasher
    }

    pub fn get_registry(&self) -> &Arc<BlockObjectTypeProvider> {
        &self.registry
    }

    pub fn get_repository(&self) -> &Arc<dyn BlockRepository> {
        &self.repository
    }

    pub fn get_pending_pool(&self) -> &Arc<MemoryPool> {
        &self.pending
    }
}
