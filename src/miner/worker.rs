// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/worker.rs
// Version: 0.3.1
//
// This file contains the device worker shared by all mining backends,
// located in the miner subdirectory. Every backend (CPU, OpenCL, CUDA)
// drives its mine loop against the same worker state: work distribution,
// candidate verification, duplicate/range rejection, health and hash-rate
// accounting, and consecutive-error recovery.
//
// Tree Location:
// - src/miner/worker.rs (worker state + backend dispatch)
// - Depends on: core, device, utils, tokio (solution channel)

use crate::core::difficulty::hash_difficulty;
use crate::core::toshash;
use crate::core::types::{MinerType, Nonce, Solution};
use crate::core::work::WorkPackage;
use crate::utils::format::FormatUtils;
use crate::miner::cpu::CpuBackend;
use crate::miner::device::{DeviceDescriptor, DeviceHealth, HealthStatus};
use crate::utils::hashrate::{HashRate, HashRateCalculator};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "tosminer::miner::worker";

/// Submitted-nonce cache bound. On overflow the cache is cleared wholesale;
/// it is a memoryless duplicate filter, not a correctness device.
pub const MAX_SUBMITTED_NONCES: usize = 1000;

/// Consecutive backend errors before a full re-init is attempted.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Channel the farm installs to receive verified solutions.
pub type SolutionSender = UnboundedSender<(Solution, String)>;

/// Outcome of verifying a backend-reported candidate nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Verified on the CPU and delivered to the farm
    Accepted,
    /// Already submitted for this job
    Duplicate,
    /// Outside this device's allocated nonce range
    OutOfRange,
    /// CPU recomputation did not meet the target (GPU false positive)
    BelowTarget,
    /// No valid work installed
    NoWork,
}

/// State shared between a worker's owner (the farm) and its mining thread.
pub struct WorkerState {
    index: u32,
    device: DeviceDescriptor,

    running: AtomicBool,
    paused: AtomicBool,
    new_work: AtomicBool,
    failed: AtomicBool,

    work: Mutex<WorkPackage>,
    submitted_nonces: Mutex<HashSet<Nonce>>,
    health: Mutex<DeviceHealth>,
    rate: Mutex<HashRateCalculator>,
    hash_count: AtomicU64,
    started_at: Mutex<Instant>,
    consecutive_errors: AtomicU32,

    solution_tx: Mutex<Option<SolutionSender>>,
}

impl WorkerState {
    pub fn new(index: u32, device: DeviceDescriptor) -> Self {
        Self {
            index,
            device,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            new_work: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            work: Mutex::new(WorkPackage::default()),
            submitted_nonces: Mutex::new(HashSet::new()),
            health: Mutex::new(DeviceHealth::default()),
            rate: Mutex::new(HashRateCalculator::default()),
            hash_count: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
            consecutive_errors: AtomicU32::new(0),
            solution_tx: Mutex::new(None),
        }
    }

    /// Worker name for logging ("CPU0", "CL1", "CU0")
    pub fn name(&self) -> String {
        format!("{}{}", self.device.device_type.tag(), self.index)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Install a solution channel; replaces any previous one.
    pub fn set_solution_sender(&self, tx: SolutionSender) {
        *self.solution_tx.lock().unwrap() = Some(tx);
    }

    /// Atomically replace the current work and raise the new-work flag.
    /// A job change clears the submitted-nonce cache.
    pub fn set_work(&self, work: &WorkPackage) {
        let job_changed = {
            let mut current = self.work.lock().unwrap();
            let changed = current.job_id != work.job_id;
            *current = work.clone();
            changed
        };

        if job_changed {
            self.submitted_nonces.lock().unwrap().clear();
        }

        self.new_work.store(true, Ordering::Release);
    }

    /// Consume the new-work flag. Mine loops call this once per iteration.
    pub fn poll_new_work(&self) -> bool {
        self.new_work.swap(false, Ordering::Acquire)
    }

    pub fn has_new_work(&self) -> bool {
        self.new_work.load(Ordering::Acquire)
    }

    /// Thread-safe copy of the current work.
    pub fn current_work(&self) -> WorkPackage {
        self.work.lock().unwrap().clone()
    }

    /// Report a completed batch to the hash counter and EMA.
    pub fn record_hashes(&self, count: u64) {
        let total = self.hash_count.fetch_add(count, Ordering::Relaxed) + count;
        self.rate.lock().unwrap().update(total);
    }

    /// Hash-rate snapshot.
    pub fn hash_rate(&self) -> HashRate {
        let count = self.hash_count.load(Ordering::Relaxed);
        let duration = self.started_at.lock().unwrap().elapsed().as_secs_f64();
        let rate = if duration > 0.0 { count as f64 / duration } else { 0.0 };
        let ema = self.rate.lock().unwrap().effective_rate();
        HashRate {
            rate,
            ema,
            count,
            duration,
        }
    }

    /// Health snapshot.
    pub fn health(&self) -> DeviceHealth {
        self.health.lock().unwrap().clone()
    }

    /// Reset hash counters and the EMA (farm start / stats reset).
    pub fn reset_counters(&self) {
        self.hash_count.store(0, Ordering::Relaxed);
        *self.started_at.lock().unwrap() = Instant::now();
        self.rate.lock().unwrap().reset();
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Record a backend error. Returns true when the error budget is
    /// exhausted and the backend should attempt a full re-init.
    pub fn record_error(&self) -> bool {
        {
            let mut health = self.health.lock().unwrap();
            health.hardware_errors += 1;
            let rate = self.rate.lock().unwrap().effective_rate();
            health.update_status(rate);
        }

        let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors >= MAX_CONSECUTIVE_ERRORS {
            error!(
                target: LOG_TARGET,
                "{}: {} consecutive errors, requesting recovery", self.name(), errors
            );
            self.consecutive_errors.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Clear the consecutive-error counter after a successful operation.
    pub fn clear_errors(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Mark this worker failed: excluded from work distribution and rate
    /// totals until recovered.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
        let mut health = self.health.lock().unwrap();
        health.status = HealthStatus::Failed;
        error!(target: LOG_TARGET, "{}: marked as FAILED", self.name());
    }

    /// Clear the failed flag (after successful recovery).
    pub fn clear_failed(&self) {
        self.failed.store(false, Ordering::Relaxed);
    }

    /// Verify a candidate nonce reported by the backend.
    ///
    /// Order matters: the duplicate check and range check are cheap and run
    /// before the CPU hash. Valid solutions are recorded in the nonce cache,
    /// counted, and delivered to the farm's solution channel.
    pub fn verify_candidate(&self, nonce: Nonce) -> VerifyOutcome {
        let work = self.current_work();
        if !work.valid {
            return VerifyOutcome::NoWork;
        }

        if self.is_duplicate(nonce) {
            warn!(
                target: LOG_TARGET,
                "{}: duplicate nonce {} (device fault?)", self.name(), nonce
            );
            let mut health = self.health.lock().unwrap();
            health.duplicate_solutions += 1;
            return VerifyOutcome::Duplicate;
        }

        if work.total_devices > 1 {
            let start = work.device_start_nonce(self.index);
            let end = start.checked_add(work.device_range_size());
            let out_of_range = nonce < start || end.map_or(false, |e| nonce >= e);
            if out_of_range {
                warn!(
                    target: LOG_TARGET,
                    "{}: nonce {} outside device range starting at {} (device fault?)",
                    self.name(),
                    nonce,
                    start
                );
                return VerifyOutcome::OutOfRange;
            }
        }

        let hash = toshash::hash_for_nonce(&work, nonce);

        if crate::core::types::meets_target(&hash, &work.target) {
            self.record_submitted(nonce);
            {
                let mut health = self.health.lock().unwrap();
                health.valid_solutions += 1;
                health.last_solution_at = Some(Instant::now());
                let rate = self.rate.lock().unwrap().effective_rate();
                health.update_status(rate);
            }

            info!(
                target: LOG_TARGET,
                "💎 {}: verified solution nonce={:#018x} (difficulty {})",
                self.name(),
                nonce,
                FormatUtils::format_number(hash_difficulty(&hash))
            );

            let solution = Solution::new(nonce, hash, self.index);
            if let Some(tx) = self.solution_tx.lock().unwrap().as_ref() {
                if tx.send((solution, work.job_id.clone())).is_err() {
                    debug!(target: LOG_TARGET, "{}: solution channel closed", self.name());
                }
            }
            VerifyOutcome::Accepted
        } else {
            let mut health = self.health.lock().unwrap();
            health.invalid_solutions += 1;
            let rate = self.rate.lock().unwrap().effective_rate();
            health.update_status(rate);
            warn!(
                target: LOG_TARGET,
                "{}: invalid candidate discarded (nonce={}, device false positive)",
                self.name(),
                nonce
            );
            VerifyOutcome::BelowTarget
        }
    }

    fn is_duplicate(&self, nonce: Nonce) -> bool {
        self.submitted_nonces.lock().unwrap().contains(&nonce)
    }

    fn record_submitted(&self, nonce: Nonce) {
        let mut nonces = self.submitted_nonces.lock().unwrap();
        if nonces.len() >= MAX_SUBMITTED_NONCES {
            nonces.clear();
        }
        nonces.insert(nonce);
    }
}

/// Mining backend: one variant per device class, sharing the worker
/// contract (init, mine_loop) without virtual dispatch.
pub enum Backend {
    Cpu(CpuBackend),
    #[cfg(feature = "opencl")]
    OpenCl(crate::miner::opencl::ClBackend),
    #[cfg(feature = "cuda")]
    Cuda(crate::miner::cuda::CudaBackend),
}

impl Backend {
    pub fn device_type(&self) -> MinerType {
        match self {
            Backend::Cpu(_) => MinerType::Cpu,
            #[cfg(feature = "opencl")]
            Backend::OpenCl(_) => MinerType::OpenCl,
            #[cfg(feature = "cuda")]
            Backend::Cuda(_) => MinerType::Cuda,
        }
    }

    /// Allocate backend resources. Returns false on any failure.
    pub fn init(&mut self, state: &WorkerState) -> bool {
        match self {
            Backend::Cpu(b) => b.init(state),
            #[cfg(feature = "opencl")]
            Backend::OpenCl(b) => b.init(state),
            #[cfg(feature = "cuda")]
            Backend::Cuda(b) => b.init(state),
        }
    }

    /// Run the mining loop until the worker stops.
    pub fn mine_loop(&mut self, state: &WorkerState) {
        match self {
            Backend::Cpu(b) => b.mine_loop(state),
            #[cfg(feature = "opencl")]
            Backend::OpenCl(b) => b.mine_loop(state),
            #[cfg(feature = "cuda")]
            Backend::Cuda(b) => b.mine_loop(state),
        }
    }
}

/// A device worker: shared state plus the backend and its thread.
pub struct Miner {
    state: Arc<WorkerState>,
    backend: Arc<Mutex<Backend>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(index: u32, device: DeviceDescriptor, backend: Backend) -> Self {
        Self {
            state: Arc::new(WorkerState::new(index, device)),
            backend: Arc::new(Mutex::new(backend)),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.state.name()
    }

    pub fn index(&self) -> u32 {
        self.state.index()
    }

    pub fn device(&self) -> DeviceDescriptor {
        self.state.device().clone()
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    /// Initialize the backend. Must not be called while the worker runs.
    pub fn init(&self) -> bool {
        let ok = self.backend.lock().unwrap().init(&self.state);
        if ok {
            self.state.clear_failed();
            self.state.clear_errors();
        }
        ok
    }

    /// Spawn the mining thread. Idempotent.
    pub fn start(&self) {
        if self.state.is_running() {
            return;
        }

        self.state.set_running(true);
        self.state.resume();
        self.state.reset_counters();

        let state = Arc::clone(&self.state);
        let backend = Arc::clone(&self.backend);

        let handle = std::thread::Builder::new()
            .name(self.name())
            .spawn(move || {
                info!(target: LOG_TARGET, "{} started", state.name());
                backend.lock().unwrap().mine_loop(&state);
                info!(target: LOG_TARGET, "{} stopped", state.name());
            })
            .expect("failed to spawn mining thread");

        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Stop and join the mining thread. Idempotent.
    pub fn stop(&self) {
        self.state.set_running(false);
        self.state.resume();

        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                error!(target: LOG_TARGET, "{}: mining thread panicked", self.name());
            }
        }
    }

    pub fn pause(&self) {
        self.state.pause();
    }

    pub fn resume(&self) {
        self.state.resume();
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn set_work(&self, work: &WorkPackage) {
        self.state.set_work(work);
    }

    pub fn set_solution_sender(&self, tx: SolutionSender) {
        self.state.set_solution_sender(tx);
    }

    pub fn hash_rate(&self) -> HashRate {
        self.state.hash_rate()
    }

    pub fn health(&self) -> DeviceHealth {
        self.state.health()
    }
}
