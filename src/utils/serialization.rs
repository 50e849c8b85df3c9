// Low-level helpers shared by the binary codec, the canonical hashing form and
// the persisted pending pool.
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use serde::Serializer;

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Little-endian, fixed-width writer. Variable-length fields carry an int32
/// length prefix.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> BinaryWriter {
        BinaryWriter { buf: Vec::new() }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_optional_i64(&mut self, value: Option<i64>) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            self.write_i64(value);
        }
    }

    /// Writes a collection length as int32.
    pub fn write_len(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| {
            BlockchainError::Serialization(format!("Length {len} does not fit in int32"))
        })?;
        self.write_i32(len);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded buffer. Every read fails on truncated input.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> BinaryReader<'a> {
        BinaryReader { data, position: 0 }
    }

    fn take(&mut self, count: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                BlockchainError::Serialization(format!(
                    "Unexpected end of input reading {what} at offset {}",
                    self.position
                ))
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.take(1, "bool")?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BlockchainError::Serialization(format!(
                "Invalid boolean byte {other}"
            ))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array("int32")?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array("uint32")?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array("int64")?))
    }

    pub fn read_optional_i64(&mut self) -> Result<Option<i64>> {
        if self.read_bool()? {
            Ok(Some(self.read_i64()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len)
            .map_err(|_| BlockchainError::Serialization(format!("Negative length {len}")))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.take(len, "byte field")?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| BlockchainError::Serialization(format!("Invalid UTF-8 string: {e}")))
    }

    pub fn is_finished(&self) -> bool {
        self.position == self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

/// Byte sequences render as lowercase hex. An empty sequence renders as absent
/// so that the canonical form drops it like any other empty collection.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if bytes.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&HEXLOWER.encode(bytes))
        }
    }
}

pub mod hex_bytes_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::hex_bytes::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_little_endian() {
        let mut writer = BinaryWriter::new();
        writer.write_i32(1);
        writer.write_i64(-2);
        writer.write_u32(3);
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_i32().unwrap(), 1);
        assert_eq!(reader.read_i64().unwrap(), -2);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert!(reader.is_finished());
    }

    #[test]
    fn test_length_prefixed_bytes() {
        let mut writer = BinaryWriter::new();
        writer.write_bytes(&[0xAA, 0xBB]).unwrap();
        writer.write_string("tx").unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[0..6], &[2, 0, 0, 0, 0xAA, 0xBB]);

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_bytes().unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(reader.read_string().unwrap(), "tx");
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let mut reader = BinaryReader::new(&[5, 0, 0, 0, 1]);
        assert!(reader.read_bytes().is_err());

        let mut reader = BinaryReader::new(&[1, 2]);
        assert!(reader.read_i32().is_err());
    }

    #[test]
    fn test_negative_length_is_rejected() {
        let mut writer = BinaryWriter::new();
        writer.write_i32(-1);
        let bytes = writer.into_bytes();
        assert!(BinaryReader::new(&bytes).read_bytes().is_err());
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        assert!(BinaryReader::new(&[2]).read_bool().is_err());
    }

    #[test]
    fn test_optional_i64() {
        let mut writer = BinaryWriter::new();
        writer.write_optional_i64(None);
        writer.write_optional_i64(Some(7));
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 1 + 1 + 8);

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_optional_i64().unwrap(), None);
        assert_eq!(reader.read_optional_i64().unwrap(), Some(7));
    }

    #[test]
    fn test_bincode_helpers() {
        let value: (u64, String) = (42, "pending".to_string());
        let bytes = serialize(&value).unwrap();
        let decoded: (u64, String) = deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert!(deserialize::<(u64, String)>(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }
}
