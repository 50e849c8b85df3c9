// This is my main entry point for the ledger CLI
// Every command loads the config, opens the sled-backed chain and runs init
// first, so a fresh data directory always starts from the genesis block.
use architect_ledger::{
    BlockCodec, BlockRef, Blockchain, Command, Config, Direction, Opt, Transaction,
};
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use std::fs;
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;
    let blockchain = Blockchain::open(&config)?;
    blockchain.init()?;

    match opt.command {
        Command::Init => {
            println!(
                "Chain ready at {} with genesis {}",
                config.data_dir.display(),
                HEXLOWER.encode(blockchain.genesis().get_hash())
            );
        }
        Command::Length => {
            println!("{}", blockchain.get_length()?);
        }
        Command::Printchain { json } => {
            // Newest block first, down to genesis
            for block in blockchain.blocks(Direction::Backward, None)? {
                let block = block?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&block)?);
                } else {
                    print_block(&blockchain, &block);
                }
            }
        }
        Command::Show { block } => {
            let found = match &block {
                BlockRef::Index(index) => blockchain.get_block_by_index(*index)?,
                BlockRef::Hash(hash) => blockchain.get_block_by_hash(hash)?,
            };
            match found {
                Some(found) => println!("{}", serde_json::to_string_pretty(&found)?),
                None => return Err(format!("Block not found: {block:?}").into()),
            }
        }
        Command::Unspent { address } => {
            let outputs = blockchain.get_unspent_transaction_items_for_address(&address.0)?;
            let mut balance = 0u64;
            for output in &outputs {
                println!("{} = {}", output.key(), output.get_amount());
                balance = balance.saturating_add(output.get_amount());
            }
            println!("Balance of {}: {balance}", HEXLOWER.encode(&address.0));
        }
        Command::Verify => {
            let checked = blockchain.verify_stored_chain()?;
            println!("Chain is valid: {checked} blocks checked");
        }
        Command::Export { file } => {
            let blocks = blockchain
                .blocks(Direction::Forward, None)?
                .collect::<architect_ledger::Result<Vec<_>>>()?;
            let codec = chain_codec(&blockchain);
            let bytes = codec.encode_chain(&blocks)?;
            fs::write(&file, bytes)?;
            println!("Exported {} blocks to {}", blocks.len(), file.display());
        }
        Command::Import { file } => {
            let bytes = fs::read(&file)?;
            let candidate = chain_codec(&blockchain).decode_chain(&bytes)?;
            info!("Read {} blocks from {}", candidate.len(), file.display());
            let appended = blockchain.replace_chain(candidate)?;
            println!(
                "Imported {} blocks, length now {}",
                appended.len(),
                blockchain.get_length()?
            );
        }
        Command::Pending => {
            let pending = blockchain.pending_transactions();
            if pending.is_empty() {
                println!("No pending transactions");
            }
            for tx in &pending {
                print_transaction(tx);
            }
        }
        Command::Mine {
            reward_address,
            max_attempts,
        } => {
            let block = blockchain.mine_pending(&reward_address.0, max_attempts)?;
            println!(
                "Mined block {:?} {} with {} transactions",
                block.get_index(),
                HEXLOWER.encode(block.get_hash()),
                block.get_transactions().len()
            );
        }
    }
    Ok(())
}

fn chain_codec(blockchain: &Blockchain) -> BlockCodec {
    BlockCodec::new(
        *blockchain.get_hasher(),
        Arc::clone(blockchain.get_registry()),
    )
}

fn print_block(blockchain: &Blockchain, block: &architect_ledger::Block) {
    let header = blockchain.header(block);
    println!("Block index: {:?}", block.get_index());
    println!("Pre block hash: {}", HEXLOWER.encode(block.get_previous_hash()));
    println!("Cur block hash: {}", HEXLOWER.encode(block.get_hash()));
    println!("Merkle root: {}", HEXLOWER.encode(&header.merkle_root_hash));
    println!("Timestamp: {}", block.get_timestamp());
    println!("Nonce: {}", block.get_nonce());
    println!("Difficulty: {}", block.achieved_difficulty());
    for object in block.get_objects() {
        println!(
            "- Object {} code = {:?}, hash = {}",
            object.get_index(),
            object.get_type_code(),
            HEXLOWER.encode(object.get_hash())
        );
    }
    for tx in block.get_transactions() {
        print_transaction(tx);
    }
    println!()
}

fn print_transaction(tx: &Transaction) {
    println!("- Transaction {} ({:?})", tx.get_id(), tx.get_type());
    for input in tx.get_inputs() {
        println!(
            "-- Input {} value = {}, from = {}",
            input.key(),
            input.get_amount(),
            HEXLOWER.encode(input.get_address())
        );
    }
    for output in tx.get_outputs() {
        println!(
            "-- Output {} value = {}, to = {}",
            output.get_index(),
            output.get_amount(),
            HEXLOWER.encode(output.get_address())
        );
    }
}
