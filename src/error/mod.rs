//! Error handling for the ledger
//!
//! Validation failures (rejected blocks, transactions and chains) are business
//! errors and are kept apart from infrastructure failures so callers can map
//! them to the right response.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// A block failed one of the ordered block checks
    BlockAssertion(String),
    /// A transaction is malformed, duplicated, double-spent or badly signed
    TransactionAssertion(String),
    /// A candidate chain was rejected as a whole
    BlockchainAssertion(String),
    /// Storage backend errors
    Database(String),
    /// Binary codec and canonical form errors
    Serialization(String),
    /// Key handling and signature errors
    Crypto(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl BlockchainError {
    /// True for rejected input, false for infrastructure failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BlockchainError::BlockAssertion(_)
                | BlockchainError::TransactionAssertion(_)
                | BlockchainError::BlockchainAssertion(_)
        )
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::BlockAssertion(msg) => write!(f, "Block assertion failed: {msg}"),
            BlockchainError::TransactionAssertion(msg) => {
                write!(f, "Transaction assertion failed: {msg}")
            }
            BlockchainError::BlockchainAssertion(msg) => {
                write!(f, "Blockchain assertion failed: {msg}")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_flagged() {
        assert!(BlockchainError::BlockAssertion("x".into()).is_validation());
        assert!(BlockchainError::TransactionAssertion("x".into()).is_validation());
        assert!(BlockchainError::BlockchainAssertion("x".into()).is_validation());
        assert!(!BlockchainError::Database("x".into()).is_validation());
    }

    #[test]
    fn test_display_carries_message() {
        let err = BlockchainError::BlockAssertion("Invalid previoushash".to_string());
        assert_eq!(err.to_string(), "Block assertion failed: Invalid previoushash");
    }
}
