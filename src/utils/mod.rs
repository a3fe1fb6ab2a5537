// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/utils/mod.rs
// Version: 0.3.1
//
// Module declaration for shared utilities: output formatting and the
// hash-rate calculator.

pub mod format;
pub mod hashrate;

pub use format::FormatUtils;
pub use hashrate::{HashRate, HashRateCalculator};
