//! Configuration management
//!
//! Node settings come from built-in defaults, an optional TOML file and
//! `LEDGER_*` environment variables, in that order. The loaded `Config` is
//! passed explicitly to whatever needs it.

pub mod settings;

pub use settings::{Config, DifficultySettings, GenesisSettings};
