//! Test helpers shared by the unit tests
//!
//! Isolated sled-backed chains in temporary directories and blocks that
//! already carry a valid proof-of-work.

pub mod test_utils;

pub use test_utils::*;
