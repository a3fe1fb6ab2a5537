// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/cpu.rs
// Version: 0.3.1
//
// This file contains the CPU mining backend, located in the miner
// subdirectory. Each CPU worker owns one scratchpad and walks its slice of
// the nonce space in fixed batches.
//
// Tree Location:
// - src/miner/cpu.rs (CPU backend)
// - Depends on: core, worker

use crate::core::toshash::{self, ScratchPad};
use crate::miner::worker::WorkerState;
use std::time::Duration;
use tracing::{debug, info};

const LOG_TARGET: &str = "tosminer::miner::cpu";

/// Nonces per batch between flag checks and rate updates.
const BATCH_SIZE: u64 = 1024;

/// Sleep while paused or idle.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// CPU mining backend: one hashing context per worker thread.
pub struct CpuBackend {
    scratch: ScratchPad,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            scratch: ScratchPad::new(),
        }
    }

    pub fn init(&mut self, state: &WorkerState) -> bool {
        info!(target: LOG_TARGET, "{}: initialized CPU miner", state.name());
        true
    }

    pub fn mine_loop(&mut self, state: &WorkerState) {
        let mut nonce: u64 = 0;
        let mut work = state.current_work();

        while state.is_running() {
            if state.is_paused() {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            if state.poll_new_work() {
                work = state.current_work();
                if work.valid {
                    nonce = work.device_start_nonce(state.index());
                    state.clear_errors();
                    debug!(
                        target: LOG_TARGET,
                        "{}: new job {} starting at nonce {:#018x}",
                        state.name(),
                        work.job_id,
                        nonce
                    );
                }
            }

            if !work.valid {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            let mut hashed = 0u64;
            for _ in 0..BATCH_SIZE {
                if !state.is_running() || state.has_new_work() {
                    break;
                }

                if let Some(solution) = toshash::search(&work, nonce, &mut self.scratch) {
                    info!(
                        target: LOG_TARGET,
                        "{}: found candidate at nonce {:#018x}", state.name(), solution.nonce
                    );
                    state.verify_candidate(solution.nonce);
                }

                nonce = nonce.wrapping_add(1);
                hashed += 1;
            }

            state.record_hashes(hashed);
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}
