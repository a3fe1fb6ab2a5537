// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/mod.rs
// Version: 0.3.1
//
// This file is the module declaration for the core functionality of the TOS
// miner, located in the core subdirectory. It declares submodules and
// re-exports key types for use throughout the project.

pub mod difficulty;
pub mod toshash;
pub mod types;
pub mod work;

// Re-export the most commonly used items
pub use difficulty::{difficulty_to_target, hash_difficulty};
pub use toshash::{ScratchPad, INPUT_SIZE};
pub use types::{meets_target, Args, Hash256, MinerType, Nonce, Solution};
pub use work::WorkPackage;
