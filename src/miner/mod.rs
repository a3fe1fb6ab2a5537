// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/mod.rs
// Version: 0.3.1
//
// This file is the module declaration for the mining functionality of the
// TOS miner, located in the miner subdirectory. It declares the device
// backends, the shared worker and the farm coordinator.
//
// Tree Location:
// - src/miner/mod.rs (miner module entry point)
// - Submodules: cpu, cuda (feature), device, farm, opencl (feature), worker

pub mod cpu;
pub mod device;
pub mod farm;
pub mod worker;

#[cfg(feature = "opencl")]
pub mod opencl;

#[cfg(feature = "cuda")]
pub mod cuda;

// Re-export key types for convenience
pub use device::{DeviceDescriptor, DeviceHealth, HealthStatus};
pub use farm::Farm;
pub use worker::{Backend, Miner, SolutionSender, WorkerState};
