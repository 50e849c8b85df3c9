// Transactions move value between addresses using the UTXO model.
// An output is identified by (producing transaction id, output index); an input
// spends exactly one such output by naming the same key.

use crate::core::HashProvider;
use crate::error::{BlockchainError, Result};
use crate::utils::serialization::{hex_bytes, hex_bytes_opt};
use crate::utils::{ecdsa_p256_sha256_sign, public_key_from_pkcs8};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Governs how many transactions of a kind a block may hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, bincode::Encode, bincode::Decode,
)]
pub enum TransactionType {
    Regular,
    Fee,
    Reward,
}

impl TransactionType {
    pub fn code(&self) -> i32 {
        match self {
            TransactionType::Regular => 0,
            TransactionType::Fee => 1,
            TransactionType::Reward => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<TransactionType> {
        match code {
            0 => Ok(TransactionType::Regular),
            1 => Ok(TransactionType::Fee),
            2 => Ok(TransactionType::Reward),
            other => Err(BlockchainError::Serialization(format!(
                "Unknown transaction type code {other}"
            ))),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, bincode::Encode, bincode::Decode,
)]
pub enum TransactionItemType {
    Input,
    Output,
}

impl TransactionItemType {
    pub fn code(&self) -> i32 {
        match self {
            TransactionItemType::Input => 0,
            TransactionItemType::Output => 1,
        }
    }

    pub fn from_code(code: i32) -> Result<TransactionItemType> {
        match code {
            0 => Ok(TransactionItemType::Input),
            1 => Ok(TransactionItemType::Output),
            other => Err(BlockchainError::Serialization(format!(
                "Unknown transaction item type code {other}"
            ))),
        }
    }
}

/// The UTXO key: (transaction_id, index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputKey {
    pub transaction_id: String,
    pub index: u32,
}

impl OutputKey {
    pub fn new(transaction_id: impl Into<String>, index: u32) -> OutputKey {
        OutputKey {
            transaction_id: transaction_id.into(),
            index,
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, bincode::Encode, bincode::Decode)]
pub struct TransactionItem {
    transaction_id: String,
    #[serde(rename = "type")]
    item_type: TransactionItemType,
    index: u32,
    #[serde(with = "hex_bytes")]
    address: Vec<u8>,
    amount: u64,
    #[serde(with = "hex_bytes_opt")]
    signature: Option<Vec<u8>>,
}

impl TransactionItem {
    pub fn new(
        transaction_id: impl Into<String>,
        item_type: TransactionItemType,
        index: u32,
        address: Vec<u8>,
        amount: u64,
        signature: Option<Vec<u8>>,
    ) -> TransactionItem {
        TransactionItem {
            transaction_id: transaction_id.into(),
            item_type,
            index,
            address,
            amount,
            signature,
        }
    }

    /// An unsigned input spending output `index` of `transaction_id`.
    pub fn input(
        transaction_id: impl Into<String>,
        index: u32,
        address: Vec<u8>,
        amount: u64,
    ) -> TransactionItem {
        Self::new(
            transaction_id,
            TransactionItemType::Input,
            index,
            address,
            amount,
            None,
        )
    }

    pub fn output(
        transaction_id: impl Into<String>,
        index: u32,
        address: Vec<u8>,
        amount: u64,
    ) -> TransactionItem {
        Self::new(
            transaction_id,
            TransactionItemType::Output,
            index,
            address,
            amount,
            None,
        )
    }

    pub fn get_transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn get_type(&self) -> TransactionItemType {
        self.item_type
    }

    pub fn get_index(&self) -> u32 {
        self.index
    }

    pub fn get_address(&self) -> &[u8] {
        &self.address
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn set_signature(&mut self, signature: Option<Vec<u8>>) {
        self.signature = signature;
    }

    pub fn key(&self) -> OutputKey {
        OutputKey::new(self.transaction_id.clone(), self.index)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode,
)]
pub struct TransactionData {
    pub inputs: Vec<TransactionItem>,
    pub outputs: Vec<TransactionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: String,
    #[serde(rename = "type")]
    transaction_type: TransactionType,
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
    data: TransactionData,
}

impl Transaction {
    /// Builds a transaction with a fresh random id. Outputs are given as
    /// (address, amount) and numbered in order.
    pub fn new(
        transaction_type: TransactionType,
        inputs: Vec<TransactionItem>,
        outputs: Vec<(Vec<u8>, u64)>,
        hasher: &HashProvider,
    ) -> Result<Transaction> {
        Self::with_id(
            Uuid::new_v4().to_string(),
            transaction_type,
            inputs,
            outputs,
            hasher,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        transaction_type: TransactionType,
        inputs: Vec<TransactionItem>,
        outputs: Vec<(Vec<u8>, u64)>,
        hasher: &HashProvider,
    ) -> Result<Transaction> {
        let id = id.into();
        let mut items = Vec::with_capacity(outputs.len());
        for (position, (address, amount)) in outputs.into_iter().enumerate() {
            let index = u32::try_from(position).map_err(|_| {
                BlockchainError::TransactionAssertion("Too many outputs".to_string())
            })?;
            items.push(TransactionItem::output(id.clone(), index, address, amount));
        }

        let mut tx = Transaction {
            id,
            transaction_type,
            hash: vec![],
            data: TransactionData {
                inputs,
                outputs: items,
            },
        };
        tx.refresh_hash(hasher)?;
        Ok(tx)
    }

    /// Reassembles a transaction from its parts without touching the hash.
    pub fn from_parts(
        id: String,
        transaction_type: TransactionType,
        hash: Vec<u8>,
        data: TransactionData,
    ) -> Transaction {
        Transaction {
            id,
            transaction_type,
            hash,
            data,
        }
    }

    pub fn compute_hash(&self, hasher: &HashProvider) -> Result<Vec<u8>> {
        hasher.compute_hash(self)
    }

    pub fn refresh_hash(&mut self, hasher: &HashProvider) -> Result<()> {
        self.hash = self.compute_hash(hasher)?;
        Ok(())
    }

    /// The message every input signs: the canonical hash of this transaction
    /// with all input signatures cleared.
    pub fn signing_hash(&self, hasher: &HashProvider) -> Result<Vec<u8>> {
        let mut trimmed = self.clone();
        for input in trimmed.data.inputs.iter_mut() {
            input.signature = None;
        }
        hasher.compute_hash(&trimmed)
    }

    /// Signs every input owned by the key and refreshes the hash. Returns the
    /// number of inputs signed.
    pub fn sign_inputs(&mut self, pkcs8: &[u8], hasher: &HashProvider) -> Result<usize> {
        let public_key = public_key_from_pkcs8(pkcs8)?;
        let message = self.signing_hash(hasher)?;
        let mut signed = 0;
        for input in self.data.inputs.iter_mut() {
            if input.address == public_key {
                input.signature = Some(ecdsa_p256_sha256_sign(pkcs8, &message)?);
                signed += 1;
            }
        }
        self.refresh_hash(hasher)?;
        Ok(signed)
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn get_hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn get_data(&self) -> &TransactionData {
        &self.data
    }

    pub fn get_inputs(&self) -> &[TransactionItem] {
        &self.data.inputs
    }

    pub fn get_outputs(&self) -> &[TransactionItem] {
        &self.data.outputs
    }

    /// Inputs followed by outputs.
    pub fn items(&self) -> impl Iterator<Item = &TransactionItem> {
        self.data.inputs.iter().chain(self.data.outputs.iter())
    }

    pub fn input_total(&self) -> Result<u64> {
        sum_amounts(&self.data.inputs)
    }

    pub fn output_total(&self) -> Result<u64> {
        sum_amounts(&self.data.outputs)
    }
}

pub(crate) fn sum_amounts(items: &[TransactionItem]) -> Result<u64> {
    items.iter().try_fold(0u64, |total, item| {
        total.checked_add(item.amount).ok_or_else(|| {
            BlockchainError::TransactionAssertion("Amount overflow".to_string())
        })
    })
}
