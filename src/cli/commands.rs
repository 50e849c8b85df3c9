use clap::{Parser, Subcommand};
use data_encoding::HEXLOWER_PERMISSIVE;
use std::path::PathBuf;
use std::str::FromStr;

/// A block named on the command line, by height or by hex hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Index(u64),
    Hash(Vec<u8>),
}

impl FromStr for BlockRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<u64>() {
            return Ok(BlockRef::Index(index));
        }
        HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map(BlockRef::Hash)
            .map_err(|_| format!("Invalid block reference: {s}. Use a height or a hex hash"))
    }
}

/// A hex-encoded address (the owner's public key bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressArg(pub Vec<u8>);

impl FromStr for AddressArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map_err(|_| format!("Invalid address: {s}. Addresses are hex encoded"))?;
        if bytes.is_empty() {
            return Err("Address must not be empty".to_string());
        }
        Ok(AddressArg(bytes))
    }
}

#[derive(Debug, Parser)]
#[command(name = "architect-ledger")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "init", about = "Create the chain with its genesis block, or check an existing one")]
    Init,
    #[command(name = "length", about = "Print the number of blocks in the chain")]
    Length,
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain {
        #[arg(long = "json", help = "Print blocks as JSON")]
        json: bool,
    },
    #[command(name = "show", about = "Show one block by height or hash")]
    Show {
        #[arg(help = "Block height or hex hash")]
        block: BlockRef,
    },
    #[command(name = "unspent", about = "List unspent outputs paid to an address")]
    Unspent {
        #[arg(help = "Hex encoded address")]
        address: AddressArg,
    },
    #[command(name = "verify", about = "Re-validate every stored block")]
    Verify,
    #[command(name = "export", about = "Write the whole chain to a file")]
    Export {
        #[arg(help = "Destination file")]
        file: PathBuf,
    },
    #[command(name = "import", about = "Replace the chain with a longer valid chain from a file")]
    Import {
        #[arg(help = "Chain file written by export")]
        file: PathBuf,
    },
    #[command(name = "pending", about = "List pending transactions")]
    Pending,
    #[command(name = "mine", about = "Mine the pending transactions into a new block")]
    Mine {
        #[arg(help = "Hex encoded address that receives the fees")]
        reward_address: AddressArg,
        #[arg(long = "max-attempts", default_value_t = 1_000_000, help = "Nonces to try before giving up")]
        max_attempts: u64,
    },
}
