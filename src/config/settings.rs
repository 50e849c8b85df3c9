use crate::core::{DifficultyPolicy, FixedDifficulty, HashAlgorithm, ZeroDifficulty};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER_PERMISSIVE;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

static DEFAULT_DATA_DIR: &str = "data/ledger";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const HASH_ALGORITHM_KEY: &str = "LEDGER_HASH_ALGORITHM";
const VERIFY_SIGNATURES_KEY: &str = "LEDGER_VERIFY_SIGNATURES";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";

/// 2018-01-01T00:00:00Z in milliseconds.
pub const DEFAULT_GENESIS_TIMESTAMP: i64 = 1_514_764_800_000;
/// hex("architect-ledger-genesis")
pub const DEFAULT_GENESIS_ADDRESS: &str = "6172636869746563742d6c65646765722d67656e65736973";
pub const DEFAULT_GENESIS_REWARD: u64 = 50;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    pub difficulty: DifficultySettings,
    pub verify_signatures: bool,
    pub genesis: GenesisSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            hash_algorithm: HashAlgorithm::default(),
            difficulty: DifficultySettings::default(),
            verify_signatures: false,
            genesis: GenesisSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum DifficultySettings {
    #[default]
    Zero,
    Fixed {
        target: f64,
    },
}

impl DifficultySettings {
    pub fn policy(&self) -> Box<dyn DifficultyPolicy> {
        match *self {
            DifficultySettings::Zero => Box::new(ZeroDifficulty),
            DifficultySettings::Fixed { target } => Box::new(FixedDifficulty::new(target)),
        }
    }
}

/// The fixed first block. Every node of one network must agree on these values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenesisSettings {
    pub timestamp: i64,
    pub reward_address: String,
    pub reward_amount: u64,
}

impl Default for GenesisSettings {
    fn default() -> Self {
        GenesisSettings {
            timestamp: DEFAULT_GENESIS_TIMESTAMP,
            reward_address: DEFAULT_GENESIS_ADDRESS.to_string(),
            reward_amount: DEFAULT_GENESIS_REWARD,
        }
    }
}

impl GenesisSettings {
    pub fn reward_address_bytes(&self) -> Result<Vec<u8>> {
        HEXLOWER_PERMISSIVE
            .decode(self.reward_address.as_bytes())
            .map_err(|e| {
                BlockchainError::Config(format!(
                    "Genesis reward address is not valid hex: {e}"
                ))
            })
    }
}

impl Config {
    /// Defaults, then the TOML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    BlockchainError::Config(format!(
                        "Failed to read config file {}: {e}",
                        path.display()
                    ))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at `data_dir`, everything else default. Used by tests.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Config {
        Config {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(algorithm) = env::var(HASH_ALGORITHM_KEY) {
            self.hash_algorithm = algorithm.parse()?;
        }
        if let Ok(flag) = env::var(VERIFY_SIGNATURES_KEY) {
            self.verify_signatures = flag.parse().map_err(|_| {
                BlockchainError::Config(format!(
                    "{VERIFY_SIGNATURES_KEY} must be true or false, got {flag}"
                ))
            })?;
        }
        if let Ok(value) = env::var(DIFFICULTY_KEY) {
            let target: f64 = value.parse().map_err(|_| {
                BlockchainError::Config(format!("{DIFFICULTY_KEY} must be a number, got {value}"))
            })?;
            self.difficulty = if target == 0.0 {
                DifficultySettings::Zero
            } else {
                DifficultySettings::Fixed { target }
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if let DifficultySettings::Fixed { target } = self.difficulty {
            if target.is_nan() {
                return Err(BlockchainError::Config(
                    "Difficulty target must be a number".to_string(),
                ));
            }
        }
        self.genesis.reward_address_bytes()?;
        Ok(())
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.difficulty, DifficultySettings::Zero);
        assert!(!config.verify_signatures);
        assert_eq!(
            config.genesis.reward_address_bytes().unwrap(),
            b"architect-ledger-genesis".to_vec()
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            hash_algorithm = "sha512"

            [difficulty]
            policy = "fixed"
            target = 1.5

            [genesis]
            reward_amount = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.difficulty, DifficultySettings::Fixed { target: 1.5 });
        assert_eq!(config.genesis.reward_amount, 10);
        assert_eq!(config.genesis.timestamp, DEFAULT_GENESIS_TIMESTAMP);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn test_invalid_genesis_address_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            [genesis]
            reward_address = "not hex"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BlockchainError::Config(_)));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        assert!(Config::from_toml_str(r#"hash_algorithm = "md5""#).is_err());
    }

    #[test]
    fn test_difficulty_policy_selection() {
        assert_eq!(DifficultySettings::Zero.policy().get_difficulty(5), 0.0);
        assert_eq!(
            DifficultySettings::Fixed { target: 2.0 }
                .policy()
                .get_difficulty(5),
            2.0
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        fs::write(&path, "verify_signatures = true\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.verify_signatures);
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
