//! Canonical binary layout for blocks, headers, block objects and transactions.
//!
//! All integers are fixed-width little-endian; byte fields and strings carry an
//! int32 length prefix; collections carry an int32 count. Field order is part
//! of the storage format.
//!
//! Block:
//! `version:i32, previous_hash:bytes, timestamp:i64, difficulty:u32, nonce:i64,
//! index:optional-i64, object_count:i32, objects.., transaction_count:i32,
//! transactions..`. The block hash is not stored; it is recomputed on read.
//! Every transaction, including one carried as an object payload, must store
//! the hash recomputed from its body.
//! `difficulty` is derived from the hash when writing and ignored when reading.
//!
//! Block object:
//! `type_code:optional-i64, index:i64, version:i64, timestamp:i64, hash:bytes,
//! has_data:bool, payload..`. The stored hash must match the recomputed one.
//!
//! Header:
//! `version:i32, previous_hash:bytes, merkle_root_hash:bytes, timestamp:u32,
//! difficulty:u32, nonce:i64`.

use crate::core::{
    Block, BlockHeader, BlockObject, BlockObjectPayload, BlockObjectTypeProvider, HashProvider,
    Transaction,
    TransactionData, TransactionItem, TransactionItemType, TransactionType,
};
use crate::error::{BlockchainError, Result};
use crate::utils::{BinaryReader, BinaryWriter};
use std::sync::Arc;

/// Block codec bound to one hash provider and one type registry.
#[derive(Debug, Clone)]
pub struct BlockCodec {
    hasher: HashProvider,
    registry: Arc<BlockObjectTypeProvider>,
}

impl BlockCodec {
    pub fn new(hasher: HashProvider, registry: Arc<BlockObjectTypeProvider>) -> BlockCodec {
        BlockCodec { hasher, registry }
    }

    pub fn hasher(&self) -> &HashProvider {
        &self.hasher
    }

    pub fn registry(&self) -> &BlockObjectTypeProvider {
        &self.registry
    }

    pub fn encode_block(&self, block: &Block) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::new();
        self.write_block(&mut writer, block)?;
        Ok(writer.into_bytes())
    }

    pub fn decode_block(&self, bytes: &[u8]) -> Result<Block> {
        let mut reader = BinaryReader::new(bytes);
        let block = self.read_block(&mut reader)?;
        expect_finished(&reader, "block")?;
        Ok(block)
    }

    pub fn write_block(&self, writer: &mut BinaryWriter, block: &Block) -> Result<()> {
        writer.write_i32(block.get_version());
        writer.write_bytes(block.get_previous_hash())?;
        writer.write_i64(block.get_timestamp());
        writer.write_u32(block.achieved_difficulty() as u32);
        writer.write_i64(block.get_nonce());
        let index = block
            .get_index()
            .map(|index| {
                i64::try_from(index).map_err(|_| {
                    BlockchainError::Serialization(format!("Block index {index} exceeds int64"))
                })
            })
            .transpose()?;
        writer.write_optional_i64(index);

        writer.write_len(block.get_objects().len())?;
        for object in block.get_objects() {
            self.write_object(writer, object)?;
        }

        writer.write_len(block.get_transactions().len())?;
        for tx in block.get_transactions() {
            write_transaction(writer, tx)?;
        }
        Ok(())
    }

    pub fn read_block(&self, reader: &mut BinaryReader<'_>) -> Result<Block> {
        let version = reader.read_i32()?;
        let previous_hash = reader.read_bytes()?;
        let timestamp = reader.read_i64()?;
        let _difficulty = reader.read_u32()?;
        let nonce = reader.read_i64()?;
        let index = reader
            .read_optional_i64()?
            .map(|index| {
                u64::try_from(index).map_err(|_| {
                    BlockchainError::Serialization(format!("Negative block index {index}"))
                })
            })
            .transpose()?;

        let object_count = reader.read_len()?;
        let mut objects = Vec::with_capacity(object_count.min(reader.remaining()));
        for _ in 0..object_count {
            objects.push(self.read_object(reader)?);
        }

        let transaction_count = reader.read_len()?;
        let mut transactions = Vec::with_capacity(transaction_count.min(reader.remaining()));
        for _ in 0..transaction_count {
            transactions.push(self.read_checked_transaction(reader)?);
        }

        let mut block = Block::from_parts(
            index,
            version,
            previous_hash,
            timestamp,
            nonce,
            objects,
            transactions,
            vec![],
        );
        block.refresh_hash(&self.hasher)?;
        Ok(block)
    }

    pub fn encode_object(&self, object: &BlockObject) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::new();
        self.write_object(&mut writer, object)?;
        Ok(writer.into_bytes())
    }

    pub fn decode_object(&self, bytes: &[u8]) -> Result<BlockObject> {
        let mut reader = BinaryReader::new(bytes);
        let object = self.read_object(&mut reader)?;
        expect_finished(&reader, "block object")?;
        Ok(object)
    }

    pub fn write_object(&self, writer: &mut BinaryWriter, object: &BlockObject) -> Result<()> {
        match (object.get_type_code(), object.get_data()) {
            (Some(code), Some(payload)) => {
                let registered = self.registry.get_kind(code);
                if registered != Some(payload.kind()) {
                    return Err(BlockchainError::Serialization(format!(
                        "Type code {code} does not match payload kind {}",
                        payload.kind()
                    )));
                }
            }
            (None, None) => {}
            (Some(code), None) => {
                return Err(BlockchainError::Serialization(format!(
                    "Block object declares type code {code} but carries no data"
                )));
            }
            (None, Some(_)) => {
                return Err(BlockchainError::Serialization(
                    "Block object carries data without a type code".to_string(),
                ));
            }
        }

        writer.write_optional_i64(object.get_type_code());
        writer.write_i64(object.get_index());
        writer.write_i64(object.get_version());
        writer.write_i64(object.get_timestamp());
        writer.write_bytes(object.get_hash())?;
        writer.write_bool(object.get_data().is_some());
        if let Some(payload) = object.get_data() {
            self.registry.serialize(payload, writer)?;
        }
        Ok(())
    }

    pub fn read_object(&self, reader: &mut BinaryReader<'_>) -> Result<BlockObject> {
        let type_code = reader.read_optional_i64()?;
        let index = reader.read_i64()?;
        let version = reader.read_i64()?;
        let timestamp = reader.read_i64()?;
        let stored_hash = reader.read_bytes()?;
        let has_data = reader.read_bool()?;

        let data = match (type_code, has_data) {
            (Some(code), true) => {
                let payload = self.registry.deserialize_code(code, reader)?;
                if let BlockObjectPayload::Transaction(tx) = &payload {
                    self.check_transaction_hash(tx)?;
                }
                Some(payload)
            }
            (None, false) => None,
            (Some(code), false) => {
                return Err(BlockchainError::Serialization(format!(
                    "Block object declares type code {code} but carries no data"
                )));
            }
            (None, true) => {
                return Err(BlockchainError::Serialization(
                    "Block object carries data without a type code".to_string(),
                ));
            }
        };

        let object =
            BlockObject::from_parts(type_code, index, version, timestamp, data, stored_hash);
        if object.compute_hash(&self.hasher)? != object.get_hash() {
            return Err(BlockchainError::Serialization(format!(
                "Block object {index} hash mismatch"
            )));
        }
        Ok(object)
    }

    fn read_checked_transaction(&self, reader: &mut BinaryReader<'_>) -> Result<Transaction> {
        let tx = read_transaction(reader)?;
        self.check_transaction_hash(&tx)?;
        Ok(tx)
    }

    // The stored transaction hash must match the one recomputed from its body.
    fn check_transaction_hash(&self, tx: &Transaction) -> Result<()> {
        if tx.compute_hash(&self.hasher)? != tx.get_hash() {
            return Err(BlockchainError::Serialization(format!(
                "Transaction {} hash mismatch",
                tx.get_id()
            )));
        }
        Ok(())
    }

    pub fn encode_header(&self, header: &BlockHeader) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::new();
        writer.write_i32(header.version);
        writer.write_bytes(&header.previous_hash)?;
        writer.write_bytes(&header.merkle_root_hash)?;
        writer.write_u32(header.timestamp);
        writer.write_u32(header.difficulty);
        writer.write_i64(header.nonce);
        Ok(writer.into_bytes())
    }

    pub fn decode_header(&self, bytes: &[u8]) -> Result<BlockHeader> {
        let mut reader = BinaryReader::new(bytes);
        let header = BlockHeader {
            version: reader.read_i32()?,
            previous_hash: reader.read_bytes()?,
            merkle_root_hash: reader.read_bytes()?,
            timestamp: reader.read_u32()?,
            difficulty: reader.read_u32()?,
            nonce: reader.read_i64()?,
        };
        expect_finished(&reader, "block header")?;
        Ok(header)
    }

    /// Encodes a whole chain as a block count followed by length-prefixed blocks.
    pub fn encode_chain(&self, blocks: &[Block]) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::new();
        writer.write_len(blocks.len())?;
        for block in blocks {
            writer.write_bytes(&self.encode_block(block)?)?;
        }
        Ok(writer.into_bytes())
    }

    pub fn decode_chain(&self, bytes: &[u8]) -> Result<Vec<Block>> {
        let mut reader = BinaryReader::new(bytes);
        let count = reader.read_len()?;
        let mut blocks = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let encoded = reader.read_bytes()?;
            blocks.push(self.decode_block(&encoded)?);
        }
        expect_finished(&reader, "chain")?;
        Ok(blocks)
    }
}

fn expect_finished(reader: &BinaryReader<'_>, what: &str) -> Result<()> {
    if reader.is_finished() {
        Ok(())
    } else {
        Err(BlockchainError::Serialization(format!(
            "{} trailing bytes after {what}",
            reader.remaining()
        )))
    }
}

pub fn encode_item(item: &TransactionItem) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    write_item(&mut writer, item)?;
    Ok(writer.into_bytes())
}

pub fn decode_item(bytes: &[u8]) -> Result<TransactionItem> {
    let mut reader = BinaryReader::new(bytes);
    let item = read_item(&mut reader)?;
    expect_finished(&reader, "transaction item")?;
    Ok(item)
}

pub(crate) fn write_transaction(writer: &mut BinaryWriter, tx: &Transaction) -> Result<()> {
    writer.write_string(tx.get_id())?;
    writer.write_i32(tx.get_type().code());
    writer.write_bytes(tx.get_hash())?;
    writer.write_len(tx.get_inputs().len())?;
    for input in tx.get_inputs() {
        write_item(writer, input)?;
    }
    writer.write_len(tx.get_outputs().len())?;
    for output in tx.get_outputs() {
        write_item(writer, output)?;
    }
    Ok(())
}

pub(crate) fn read_transaction(reader: &mut BinaryReader<'_>) -> Result<Transaction> {
    let id = reader.read_string()?;
    let transaction_type = TransactionType::from_code(reader.read_i32()?)?;
    let hash = reader.read_bytes()?;

    let input_count = reader.read_len()?;
    let mut inputs = Vec::with_capacity(input_count.min(reader.remaining()));
    for _ in 0..input_count {
        inputs.push(read_item(reader)?);
    }
    let output_count = reader.read_len()?;
    let mut outputs = Vec::with_capacity(output_count.min(reader.remaining()));
    for _ in 0..output_count {
        outputs.push(read_item(reader)?);
    }

    Ok(Transaction::from_parts(
        id,
        transaction_type,
        hash,
        TransactionData { inputs, outputs },
    ))
}

fn write_item(writer: &mut BinaryWriter, item: &TransactionItem) -> Result<()> {
    let amount = i64::try_from(item.get_amount()).map_err(|_| {
        BlockchainError::Serialization(format!("Amount {} exceeds int64", item.get_amount()))
    })?;
    writer.write_string(item.get_transaction_id())?;
    writer.write_i32(item.get_type().code());
    writer.write_u32(item.get_index());
    writer.write_bytes(item.get_address())?;
    writer.write_i64(amount);
    writer.write_bool(item.get_signature().is_some());
    if let Some(signature) = item.get_signature() {
        writer.write_bytes(signature)?;
    }
    Ok(())
}

fn read_item(reader: &mut BinaryReader<'_>) -> Result<TransactionItem> {
    let transaction_id = reader.read_string()?;
    let item_type = TransactionItemType::from_code(reader.read_i32()?)?;
    let index = reader.read_u32()?;
    let address = reader.read_bytes()?;
    let amount = reader.read_i64()?;
    let amount = u64::try_from(amount)
        .map_err(|_| BlockchainError::Serialization(format!("Negative amount {amount}")))?;
    let signature = if reader.read_bool()? {
        Some(reader.read_bytes()?)
    } else {
        None
    };
    Ok(TransactionItem::new(
        transaction_id,
        item_type,
        index,
        address,
        amount,
        signature,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{MEMO_TYPE_CODE, TRANSACTION_TYPE_CODE};

    fn codec() -> BlockCodec {
        BlockCodec::new(
            HashProvider::default(),
            Arc::new(BlockObjectTypeProvider::default()),
        )
    }

    fn sample_block(codec: &BlockCodec) -> Block {
        let hasher = codec.hasher();
        let tx = Transaction::with_id(
            "T2",
            TransactionType::Regular,
            vec![TransactionItem::input("T1", 0, vec![1; 65], 100)],
            vec![(vec![2; 65], 90)],
            hasher,
        )
        .unwrap();

        let objects = vec![
            BlockObject::new(
                codec.registry(),
                hasher,
                0,
                1,
                1_700_000_000_000,
                Some(BlockObjectPayload::Transaction(tx.clone())),
            )
            .unwrap(),
            BlockObject::new(
                codec.registry(),
                hasher,
                1,
                1,
                1_700_000_000_001,
                Some(BlockObjectPayload::Memo("note".to_string())),
            )
            .unwrap(),
            BlockObject::new(codec.registry(), hasher, 2, 1, 1_700_000_000_002, None).unwrap(),
        ];

        Block::new(1, vec![3; 32], objects, vec![tx], hasher).unwrap()
    }

    #[test]
    fn test_block_reencodes_identically() {
        let codec = codec();
        let block = sample_block(&codec);

        let first = codec.encode_block(&block).unwrap();
        let decoded = codec.decode_block(&first).unwrap();
        let second = codec.encode_block(&decoded).unwrap();

        assert_eq!(first, second);
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_block_hash_is_recomputed_on_read() {
        let codec = codec();
        let block = sample_block(&codec);
        let tampered = Block::from_parts(
            block.get_index(),
            block.get_version(),
            block.get_previous_hash().to_vec(),
            block.get_timestamp(),
            block.get_nonce(),
            block.get_objects().to_vec(),
            block.get_transactions().to_vec(),
            vec![0; 32],
        );

        let decoded = codec
            .decode_block(&codec.encode_block(&tampered).unwrap())
            .unwrap();
        assert_eq!(decoded.get_hash(), block.get_hash());
    }

    #[test]
    fn test_header_layout() {
        let codec = codec();
        let header = BlockHeader {
            version: 1,
            previous_hash: vec![1, 2],
            merkle_root_hash: vec![3],
            timestamp: 10,
            difficulty: 2,
            nonce: -1,
        };
        let bytes = codec.encode_header(&header).unwrap();
        assert_eq!(bytes.len(), 4 + (4 + 2) + (4 + 1) + 4 + 4 + 8);
        assert_eq!(codec.decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn test_unregistered_type_code_fails_closed() {
        let codec = codec();
        let mut writer = BinaryWriter::new();
        writer.write_optional_i64(Some(77));
        writer.write_i64(0);
        writer.write_i64(1);
        writer.write_i64(0);
        writer.write_bytes(&[0; 32]).unwrap();
        writer.write_bool(true);
        writer.write_string("payload").unwrap();

        let err = codec.decode_object(&writer.into_bytes()).unwrap_err();
        assert!(err.to_string().contains("Unknown block object type code 77"));
    }

    #[test]
    fn test_type_code_without_data_is_rejected() {
        let codec = codec();
        let mut writer = BinaryWriter::new();
        writer.write_optional_i64(Some(MEMO_TYPE_CODE));
        writer.write_i64(0);
        writer.write_i64(1);
        writer.write_i64(0);
        writer.write_bytes(&[]).unwrap();
        writer.write_bool(false);
        assert!(codec.decode_object(&writer.into_bytes()).is_err());
    }

    #[test]
    fn test_object_hash_mismatch_is_rejected() {
        let codec = codec();
        let object = BlockObject::new(
            codec.registry(),
            codec.hasher(),
            0,
            1,
            0,
            Some(BlockObjectPayload::Memo("a".to_string())),
        )
        .unwrap();
        let forged = BlockObject::from_parts(
            object.get_type_code(),
            0,
            1,
            0,
            object.get_data().cloned(),
            vec![1; 32],
        );
        let bytes = codec.encode_object(&forged).unwrap();
        assert!(codec.decode_object(&bytes).is_err());
    }

    #[test]
    fn test_mismatched_type_code_is_not_written() {
        let codec = codec();
        let forged = BlockObject::from_parts(
            Some(MEMO_TYPE_CODE),
            0,
            1,
            0,
            Some(BlockObjectPayload::Transaction(
                Transaction::with_id(
                    "T",
                    TransactionType::Fee,
                    vec![],
                    vec![(vec![1], 1)],
                    codec.hasher(),
                )
                .unwrap(),
            )),
            vec![],
        );
        assert!(codec.encode_object(&forged).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let codec = codec();
        let mut bytes = codec.encode_block(&sample_block(&codec)).unwrap();
        bytes.push(0);
        assert!(codec.decode_block(&bytes).is_err());
    }

    #[test]
    fn test_truncated_block_is_rejected() {
        let codec = codec();
        let bytes = codec.encode_block(&sample_block(&codec)).unwrap();
        assert!(codec.decode_block(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_item_codec_rejects_negative_amount() {
        let mut writer = BinaryWriter::new();
        writer.write_string("T").unwrap();
        writer.write_i32(TransactionItemType::Output.code());
        writer.write_u32(0);
        writer.write_bytes(&[1]).unwrap();
        writer.write_i64(-5);
        writer.write_bool(false);
        assert!(decode_item(&writer.into_bytes()).is_err());
    }

    #[test]
    fn test_chain_framing() {
        let codec = codec();
        let blocks = vec![sample_block(&codec), sample_block(&codec)];
        let bytes = codec.encode_chain(&blocks).unwrap();
        assert_eq!(codec.decode_chain(&bytes).unwrap(), blocks);
    }

    fn with_stored_hash(tx: &Transaction, hash: Vec<u8>) -> Transaction {
        Transaction::from_parts(
            tx.get_id().to_string(),
            tx.get_type(),
            hash,
            TransactionData {
                inputs: tx.get_inputs().to_vec(),
                outputs: tx.get_outputs().to_vec(),
            },
        )
    }

    #[test]
    fn test_transaction_hash_mismatch_is_rejected() {
        let codec = codec();
        let block = sample_block(&codec);
        let forged = with_stored_hash(&block.get_transactions()[0], vec![0xCD; 32]);
        let tampered = Block::new(1, vec![3; 32], vec![], vec![forged], codec.hasher()).unwrap();

        let bytes = codec.encode_block(&tampered).unwrap();
        let err = codec.decode_block(&bytes).unwrap_err();
        assert!(err.to_string().contains("Transaction T2 hash mismatch"));
    }

    #[test]
    fn test_object_transaction_hash_mismatch_is_rejected() {
        let codec = codec();
        let block = sample_block(&codec);
        let forged = with_stored_hash(&block.get_transactions()[0], vec![0xCD; 32]);
        let object = BlockObject::from_parts(
            Some(TRANSACTION_TYPE_CODE),
            0,
            1,
            0,
            Some(BlockObjectPayload::Transaction(forged)),
            vec![],
        );
        // Nested hashes do not feed the object hash, so this one still matches.
        let hash = object.compute_hash(codec.hasher()).unwrap();
        let object = BlockObject::from_parts(
            object.get_type_code(),
            0,
            1,
            0,
            object.get_data().cloned(),
            hash,
        );

        let bytes = codec.encode_object(&object).unwrap();
        let err = codec.decode_object(&bytes).unwrap_err();
        assert!(err.to_string().contains("hash mismatch"));
    }
}
