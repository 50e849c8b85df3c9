use crate::core::HashProvider;

/// Merkle root over transaction hashes, used by the block header projection.
///
/// Pairs are combined with a double hash of their concatenation; an odd node
/// at any level is paired with itself (Bitcoin behavior), including a lone leaf.
pub struct MerkleTree;

impl MerkleTree {
    /// Returns an empty root for an empty list.
    pub fn calculate_merkle_root(leaves: &[Vec<u8>], hasher: &HashProvider) -> Vec<u8> {
        if leaves.is_empty() {
            return Vec::new();
        }

        let mut current_level = leaves.to_vec();
        loop {
            let next_level: Vec<Vec<u8>> = current_level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    hasher.double_hash_pair(left, right)
                })
                .collect();

            if next_level.len() == 1 {
                return next_level.into_iter().next().unwrap_or_default();
            }
            current_level = next_level;
        }
    }
}
