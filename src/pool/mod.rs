// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/pool/mod.rs
// Version: 0.3.1
//
// This file is the module declaration for the pool communication
// functionality of the TOS miner, located in the pool subdirectory. It
// declares submodules and re-exports key types for use throughout the
// project.
//
// Tree Location:
// - src/pool/mod.rs (pool module entry point)
// - Submodules: client, messages, protocol

pub mod client;
pub mod messages;
pub mod protocol;

// Re-export key types for convenience
pub use client::StratumClient;
pub use messages::{PoolError, PoolEvent, ProtocolVariant, StratumState};
pub use protocol::StratumProtocol;
