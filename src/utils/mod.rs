//! Utility functions and helpers
//!
//! Signature primitives, timestamps, and the low-level binary reader/writer
//! used by the codec.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign, ecdsa_p256_sha256_verify, new_key_pair,
    public_key_from_pkcs8,
};

pub use serialization::{deserialize, serialize, BinaryReader, BinaryWriter};
