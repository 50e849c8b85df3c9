//! Registry of block object payload kinds.
//!
//! Every payload kind gets a small integer code that is written next to the
//! payload bytes. Decoding looks the code up here and dispatches to the decoder
//! of that kind; unknown codes are rejected. The registry is built once at
//! startup and shared immutably afterwards.

use crate::core::codec::{read_transaction, write_transaction};
use crate::core::BlockObjectPayload;
use crate::error::{BlockchainError, Result};
use crate::utils::{BinaryReader, BinaryWriter};
use std::collections::HashMap;
use std::fmt;

pub const TRANSACTION_TYPE_CODE: i64 = 1;
pub const MEMO_TYPE_CODE: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Transaction,
    Memo,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Transaction => write!(f, "transaction"),
            PayloadKind::Memo => write!(f, "memo"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockObjectTypeProvider {
    by_code: HashMap<i64, PayloadKind>,
    by_kind: HashMap<PayloadKind, i64>,
}

impl Default for BlockObjectTypeProvider {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.by_code.insert(TRANSACTION_TYPE_CODE, PayloadKind::Transaction);
        registry.by_kind.insert(PayloadKind::Transaction, TRANSACTION_TYPE_CODE);
        registry.by_code.insert(MEMO_TYPE_CODE, PayloadKind::Memo);
        registry.by_kind.insert(PayloadKind::Memo, MEMO_TYPE_CODE);
        registry
    }
}

impl BlockObjectTypeProvider {
    /// A registry with no kinds; every payload is rejected until added.
    pub fn empty() -> BlockObjectTypeProvider {
        BlockObjectTypeProvider {
            by_code: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    /// Codes and kinds are both one-to-one; re-registering either is an error.
    pub fn add(&mut self, code: i64, kind: PayloadKind) -> Result<()> {
        if let Some(existing) = self.by_code.get(&code) {
            return Err(BlockchainError::Config(format!(
                "Type code {code} is already registered for {existing}"
            )));
        }
        if let Some(existing) = self.by_kind.get(&kind) {
            return Err(BlockchainError::Config(format!(
                "Payload kind {kind} is already registered with code {existing}"
            )));
        }
        self.by_code.insert(code, kind);
        self.by_kind.insert(kind, code);
        Ok(())
    }

    pub fn get_code(&self, kind: PayloadKind) -> Option<i64> {
        self.by_kind.get(&kind).copied()
    }

    pub fn get_kind(&self, code: i64) -> Option<PayloadKind> {
        self.by_code.get(&code).copied()
    }

    pub fn serialize(&self, payload: &BlockObjectPayload, writer: &mut BinaryWriter) -> Result<()> {
        match payload {
            BlockObjectPayload::Transaction(tx) => write_transaction(writer, tx),
            BlockObjectPayload::Memo(text) => writer.write_string(text),
        }
    }

    pub fn deserialize(
        &self,
        kind: PayloadKind,
        reader: &mut BinaryReader<'_>,
    ) -> Result<BlockObjectPayload> {
        match kind {
            PayloadKind::Transaction => Ok(BlockObjectPayload::Transaction(read_transaction(
                reader,
            )?)),
            PayloadKind::Memo => Ok(BlockObjectPayload::Memo(reader.read_string()?)),
        }
    }

    /// Resolves the code for `code` and decodes the payload, failing closed on
    /// unknown codes.
    pub fn deserialize_code(
        &self,
        code: i64,
        reader: &mut BinaryReader<'_>,
    ) -> Result<BlockObjectPayload> {
        let kind = self.get_kind(code).ok_or_else(|| {
            BlockchainError::Serialization(format!("Unknown block object type code {code}"))
        })?;
        self.deserialize(kind, reader)
    }
}
