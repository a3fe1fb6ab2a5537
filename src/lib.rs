// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/lib.rs
// Version: 0.3.1
//
// This file serves as the main library entry point for the TOS miner,
// located at the root of the source tree. It exports all public modules
// and types that other crates or binaries can use.
//
// Tree Location:
// - src/lib.rs (root library file)
// - Exports modules: core, miner, pool, utils

pub mod core;
pub mod miner;
pub mod pool;
pub mod utils;

// Re-export commonly used types at the crate root for convenience
pub use crate::core::toshash;
pub use crate::core::types::{Hash256, MinerType, Nonce, Solution};
pub use crate::core::work::WorkPackage;
pub use crate::miner::farm::Farm;
pub use crate::pool::client::StratumClient;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// User agent advertised in mining.subscribe.
pub const MINER_VERSION: &str = concat!("tosminer/", env!("CARGO_PKG_VERSION"));

// Changelog:
// - v0.3.1: Library root for the modular layout. Exports the working set
//   (Farm, StratumClient, WorkPackage, toshash) plus the shared Result
//   alias and the user-agent string used during the pool handshake.
