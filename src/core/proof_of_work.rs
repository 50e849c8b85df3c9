use crate::core::{Block, HashProvider};
use crate::error::{BlockchainError, Result};
use log::{debug, info};

/// Offset of the 8-byte window of the block hash that encodes achieved difficulty.
pub const DIFFICULTY_WINDOW_OFFSET: usize = 0;
const DIFFICULTY_WINDOW_LEN: usize = 8;

/// Required difficulty target per chain height.
pub trait DifficultyPolicy: Send + Sync {
    fn get_difficulty(&self, index: u64) -> f64;
}

/// Permissive policy: every height requires 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroDifficulty;

impl DifficultyPolicy for ZeroDifficulty {
    fn get_difficulty(&self, _index: u64) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDifficulty {
    target: f64,
}

impl FixedDifficulty {
    pub fn new(target: f64) -> FixedDifficulty {
        FixedDifficulty { target }
    }
}

impl DifficultyPolicy for FixedDifficulty {
    fn get_difficulty(&self, _index: u64) -> f64 {
        self.target
    }
}

pub struct ProofOfWork;

impl ProofOfWork {
    /// Reads the difficulty window of `hash` as a little-endian IEEE-754 double.
    /// Hashes too short to hold the window yield NaN, which meets no target.
    pub fn achieved_difficulty(hash: &[u8]) -> f64 {
        let end = DIFFICULTY_WINDOW_OFFSET + DIFFICULTY_WINDOW_LEN;
        match hash.get(DIFFICULTY_WINDOW_OFFSET..end) {
            Some(window) => {
                let mut bytes = [0u8; DIFFICULTY_WINDOW_LEN];
                bytes.copy_from_slice(window);
                f64::from_le_bytes(bytes)
            }
            None => f64::NAN,
        }
    }

    pub fn meets_target(hash: &[u8], target: f64) -> bool {
        Self::achieved_difficulty(hash) >= target
    }

    /// Searches nonces from 0 until the block hash meets `target`. This is the
    /// miner's side of the contract; consensus only verifies the result.
    pub fn prove_work_for(
        block: &mut Block,
        target: f64,
        hasher: &HashProvider,
        max_attempts: u64,
    ) -> Result<()> {
        for nonce in 0..max_attempts {
            let nonce = i64::try_from(nonce).map_err(|_| {
                BlockchainError::BlockAssertion("Nonce space exhausted".to_string())
            })?;
            block.set_nonce(nonce, hasher)?;
            if Self::meets_target(block.get_hash(), target) {
                debug!("Found nonce {nonce} after {} attempts", nonce + 1);
                info!(
                    "Proof-of-work completed for block {:?} (difficulty {})",
                    block.get_index(),
                    block.achieved_difficulty()
                );
                return Ok(());
            }
        }
        Err(BlockchainError::BlockAssertion(format!(
            "No nonce meeting difficulty {target} found in {max_attempts} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_achieved_difficulty_reads_little_endian_window() {
        let mut hash = 1.5f64.to_le_bytes().to_vec();
        hash.extend_from_slice(&[0xAB; 24]);
        assert_eq!(ProofOfWork::achieved_difficulty(&hash), 1.5);
    }

    #[test]
    fn test_meets_target_is_greater_or_equal() {
        let hash = 2.0f64.to_le_bytes();
        assert!(ProofOfWork::meets_target(&hash, 2.0));
        assert!(ProofOfWork::meets_target(&hash, 1.0));
        assert!(!ProofOfWork::meets_target(&hash, 2.5));
    }

    #[test]
    fn test_negative_and_nan_fail_zero_target() {
        let negative = (-1.0f64).to_le_bytes();
        assert!(!ProofOfWork::meets_target(&negative, 0.0));

        let nan = [0xFF; 8];
        assert!(ProofOfWork::achieved_difficulty(&nan).is_nan());
        assert!(!ProofOfWork::meets_target(&nan, 0.0));
    }

    #[test]
    fn test_short_hash_meets_nothing() {
        assert!(!ProofOfWork::meets_target(&[0; 4], f64::NEG_INFINITY));
    }

    #[test]
    fn test_policies() {
        assert_eq!(ZeroDifficulty.get_difficulty(10), 0.0);
        assert_eq!(FixedDifficulty::new(3.0).get_difficulty(10), 3.0);
    }

    #[test]
    fn test_prove_work_for_zero_target() {
        let hasher = HashProvider::default();
        let mut block = Block::new(1, vec![1; 32], vec![], vec![], &hasher).unwrap();
        ProofOfWork::prove_work_for(&mut block, 0.0, &hasher, 10_000).unwrap();

        assert!(block.achieved_difficulty() >= 0.0);
        assert_eq!(block.get_hash(), block.compute_hash(&hasher).unwrap().as_slice());
    }

    #[test]
    fn test_prove_work_for_gives_up() {
        let hasher = HashProvider::default();
        let mut block = Block::new(1, vec![1; 32], vec![], vec![], &hasher).unwrap();
        assert!(ProofOfWork::prove_work_for(&mut block, f64::INFINITY, &hasher, 5).is_err());
    }
}
