// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/farm.rs
// Version: 0.3.1
//
// This file contains the farm coordinator, located in the miner
// subdirectory. The farm owns the device workers, distributes work with the
// active-device count stamped in, isolates failed devices from the rest of
// the fleet, aggregates hash rates and funnels every verified solution into
// one channel toward the pool client.
//
// Tree Location:
// - src/miner/farm.rs (fleet coordinator)
// - Depends on: core, worker

use crate::core::work::WorkPackage;
use crate::miner::worker::{Miner, SolutionSender};
use crate::utils::format::FormatUtils;
use crate::utils::hashrate::HashRate;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const LOG_TARGET: &str = "tosminer::miner::farm";

/// Fallback work older than this is never republished.
pub const FALLBACK_MAX_AGE: Duration = Duration::from_secs(120);

/// Coordinates the device-worker fleet.
pub struct Farm {
    miners: Mutex<Vec<Arc<Miner>>>,

    running: AtomicBool,
    paused: AtomicBool,

    current_work: Mutex<WorkPackage>,
    previous_work: Mutex<WorkPackage>,

    solution_tx: Mutex<Option<SolutionSender>>,

    pub accepted_shares: AtomicU64,
    pub rejected_shares: AtomicU64,
    pub stale_shares: AtomicU64,

    started_at: Mutex<Instant>,
}

impl Farm {
    pub fn new() -> Self {
        Self {
            miners: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            current_work: Mutex::new(WorkPackage::default()),
            previous_work: Mutex::new(WorkPackage::default()),
            solution_tx: Mutex::new(None),
            accepted_shares: AtomicU64::new(0),
            rejected_shares: AtomicU64::new(0),
            stale_shares: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Add a worker to the fleet. Workers are added before start().
    pub fn add_miner(&self, miner: Miner) {
        self.miners.lock().unwrap().push(Arc::new(miner));
    }

    pub fn miner_count(&self) -> usize {
        self.miners.lock().unwrap().len()
    }

    /// Non-failed workers; this is the device count stamped into work.
    pub fn active_miner_count(&self) -> usize {
        self.miners
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_failed())
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Install the channel every worker's verified solutions funnel into.
    pub fn set_solution_sender(&self, tx: SolutionSender) {
        *self.solution_tx.lock().unwrap() = Some(tx);
    }

    /// Initialize all workers in parallel and start the ones that came up.
    /// Returns true when at least one worker is mining.
    pub fn start(&self) -> bool {
        if self.is_running() {
            return true;
        }

        let miners = self.miners.lock().unwrap().clone();
        if miners.is_empty() {
            error!(target: LOG_TARGET, "No miners to start");
            return false;
        }

        info!(target: LOG_TARGET, "Starting farm with {} miner(s)", miners.len());

        *self.started_at.lock().unwrap() = Instant::now();
        self.accepted_shares.store(0, Ordering::Relaxed);
        self.rejected_shares.store(0, Ordering::Relaxed);
        self.stale_shares.store(0, Ordering::Relaxed);

        let solution_tx = self.solution_tx.lock().unwrap().clone();

        // Init every backend in parallel; GPU context setup is slow and
        // independent per device
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = miners
                .iter()
                .map(|miner| {
                    let miner = Arc::clone(miner);
                    scope.spawn(move || miner.init())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap_or(false)).collect()
        });

        let mut started = 0;
        for (miner, initialized) in miners.iter().zip(results) {
            if initialized {
                if let Some(tx) = solution_tx.as_ref() {
                    miner.set_solution_sender(tx.clone());
                }
                miner.start();
                started += 1;
            } else {
                error!(target: LOG_TARGET, "Failed to initialize {}", miner.name());
                miner.state().mark_failed();
            }
        }

        if started > 0 {
            self.running.store(true, Ordering::Relaxed);
            self.paused.store(false, Ordering::Relaxed);
            info!(target: LOG_TARGET, "✅ Farm started with {} active miner(s)", started);
            true
        } else {
            error!(target: LOG_TARGET, "Failed to start any miners");
            false
        }
    }

    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }

        info!(target: LOG_TARGET, "Stopping farm...");
        self.running.store(false, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);

        for miner in self.miners.lock().unwrap().iter() {
            miner.stop();
        }
        info!(target: LOG_TARGET, "Farm stopped");
    }

    pub fn pause(&self) {
        if !self.is_running() || self.is_paused() {
            return;
        }
        self.paused.store(true, Ordering::Relaxed);
        for miner in self.miners.lock().unwrap().iter() {
            miner.pause();
        }
        info!(target: LOG_TARGET, "Farm paused");
    }

    pub fn resume(&self) {
        if !self.is_running() || !self.is_paused() {
            return;
        }
        for miner in self.miners.lock().unwrap().iter() {
            miner.resume();
        }
        self.paused.store(false, Ordering::Relaxed);
        info!(target: LOG_TARGET, "Farm resumed");
    }

    /// Publish new work: stamp the active-device count, keep the prior
    /// package as the single fallback, distribute to non-failed workers.
    pub fn set_work(&self, work: &WorkPackage) {
        let mut work = work.clone();
        work.total_devices = self.active_miner_count().max(1) as u32;

        {
            let mut current = self.current_work.lock().unwrap();
            if current.valid {
                *self.previous_work.lock().unwrap() = current.clone();
            }
            *current = work.clone();
        }

        for miner in self.miners.lock().unwrap().iter() {
            if !miner.is_failed() {
                miner.set_work(&work);
            }
        }

        info!(
            target: LOG_TARGET,
            "📋 New work: job={} height={} devices={}",
            work.job_id,
            work.height,
            work.total_devices
        );
    }

    pub fn current_work(&self) -> WorkPackage {
        self.current_work.lock().unwrap().clone()
    }

    /// Drop the current work (pool outage); devices keep their last package
    /// until fallback work or a fresh job arrives.
    pub fn invalidate_work(&self) {
        self.current_work.lock().unwrap().valid = false;
    }

    /// A fallback exists when the current work is invalid and the retained
    /// previous package is valid and fresh enough.
    pub fn has_fallback_work(&self) -> bool {
        !self.current_work.lock().unwrap().valid && self.fallback_candidate().is_some()
    }

    pub fn get_fallback_work(&self) -> Option<WorkPackage> {
        self.fallback_candidate()
    }

    /// Republish the fallback package to keep devices busy through a brief
    /// pool outage. Returns true when fallback work was activated.
    pub fn activate_fallback_work(&self) -> bool {
        if self.current_work.lock().unwrap().valid {
            return false;
        }
        match self.fallback_candidate() {
            Some(previous) => {
                warn!(
                    target: LOG_TARGET,
                    "Republishing previous job {} ({}s old) as fallback",
                    previous.job_id,
                    previous.age().as_secs()
                );
                self.set_work(&previous);
                true
            }
            None => false,
        }
    }

    fn fallback_candidate(&self) -> Option<WorkPackage> {
        let previous = self.previous_work.lock().unwrap();
        if previous.valid && !previous.is_stale(FALLBACK_MAX_AGE) {
            Some(previous.clone())
        } else {
            None
        }
    }

    /// Combined hash rate. Failed workers are excluded; the aggregate uses
    /// each worker's EMA rate.
    pub fn hash_rate(&self) -> HashRate {
        let duration = self.started_at.lock().unwrap().elapsed().as_secs_f64();

        let mut rate = 0.0;
        let mut ema = 0.0;
        let mut count = 0u64;

        for miner in self.miners.lock().unwrap().iter() {
            if miner.is_failed() {
                continue;
            }
            let hr = miner.hash_rate();
            rate += hr.rate;
            ema += hr.ema;
            count += hr.count;
        }

        HashRate {
            rate,
            ema,
            count,
            duration,
        }
    }

    /// Try to bring failed workers back: full stop / init / start cycle,
    /// re-subscribe to the solution channel, re-deliver the current work.
    /// Returns how many workers recovered.
    pub fn recover_failed_miners(&self) -> u32 {
        let miners = self.miners.lock().unwrap().clone();
        let solution_tx = self.solution_tx.lock().unwrap().clone();
        let current = self.current_work();

        let mut recovered = 0;
        for miner in miners.iter().filter(|m| m.is_failed()) {
            info!(target: LOG_TARGET, "Attempting to recover {}", miner.name());
            miner.stop();

            if miner.init() {
                if let Some(tx) = solution_tx.as_ref() {
                    miner.set_solution_sender(tx.clone());
                }
                if current.valid {
                    miner.set_work(&current);
                }
                miner.start();
                recovered += 1;
                info!(target: LOG_TARGET, "✅ Recovered {}", miner.name());
            } else {
                warn!(target: LOG_TARGET, "{} recovery failed, still excluded", miner.name());
                miner.state().mark_failed();
            }
        }

        recovered
    }

    pub fn record_accepted_share(&self) {
        self.accepted_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_share(&self) {
        self.rejected_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_share(&self) {
        self.stale_shares.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line status summary for the periodic stats printer.
    pub fn status_line(&self) -> String {
        let hr = self.hash_rate();
        format!(
            "{} | A:{} R:{} S:{}",
            FormatUtils::format_hashrate(hr.ema),
            self.accepted_shares.load(Ordering::Relaxed),
            self.rejected_shares.load(Ordering::Relaxed),
            self.stale_shares.load(Ordering::Relaxed)
        )
    }
}

impl Default for Farm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::CpuBackend;
    use crate::miner::device::DeviceDescriptor;
    use crate::miner::worker::Backend;

    fn cpu_miner(index: u32) -> Miner {
        Miner::new(
            index,
            DeviceDescriptor::cpu(index),
            Backend::Cpu(CpuBackend::new()),
        )
    }

    fn valid_work(job_id: &str) -> WorkPackage {
        let mut work = WorkPackage::default();
        work.job_id = job_id.to_string();
        // Target nothing can meet, so test workers never submit
        work.target = [0x00; 32];
        work.valid = true;
        work
    }

    #[test]
    fn test_empty_farm_does_not_start() {
        let farm = Farm::new();
        assert!(!farm.start());
        assert!(!farm.is_running());
    }

    #[test]
    fn test_work_stamped_with_active_count() {
        let farm = Farm::new();
        farm.add_miner(cpu_miner(0));
        farm.add_miner(cpu_miner(1));

        farm.set_work(&valid_work("job-a"));
        assert_eq!(farm.current_work().total_devices, 2);
    }

    #[test]
    fn test_failed_miner_excluded_from_count() {
        let farm = Farm::new();
        farm.add_miner(cpu_miner(0));
        farm.add_miner(cpu_miner(1));

        {
            let miners = farm.miners.lock().unwrap();
            miners[1].state().mark_failed();
        }

        assert_eq!(farm.miner_count(), 2);
        assert_eq!(farm.active_miner_count(), 1);

        farm.set_work(&valid_work("job-b"));
        assert_eq!(farm.current_work().total_devices, 1);
    }

    #[test]
    fn test_previous_work_retained_once() {
        let farm = Farm::new();
        farm.add_miner(cpu_miner(0));

        farm.set_work(&valid_work("job-1"));
        assert!(!farm.has_fallback_work(), "current work still valid");

        farm.set_work(&valid_work("job-2"));
        farm.invalidate_work();

        assert!(farm.has_fallback_work());
        assert_eq!(farm.get_fallback_work().unwrap().job_id, "job-1");

        assert!(farm.activate_fallback_work());
        let republished = farm.current_work();
        assert!(republished.valid);
        assert_eq!(republished.job_id, "job-1");
        assert!(!farm.activate_fallback_work(), "current work valid again");
    }

    #[test]
    fn test_fallback_requires_invalid_current() {
        let farm = Farm::new();
        farm.add_miner(cpu_miner(0));
        farm.set_work(&valid_work("job-1"));
        farm.set_work(&valid_work("job-2"));

        // Current work is valid, so the fallback must not fire
        assert!(!farm.activate_fallback_work());
        assert_eq!(farm.current_work().job_id, "job-2");
    }

    #[test]
    fn test_share_counters() {
        let farm = Farm::new();
        farm.record_accepted_share();
        farm.record_accepted_share();
        farm.record_rejected_share();
        farm.record_stale_share();
        assert_eq!(farm.accepted_shares.load(Ordering::Relaxed), 2);
        assert_eq!(farm.rejected_shares.load(Ordering::Relaxed), 1);
        assert_eq!(farm.stale_shares.load(Ordering::Relaxed), 1);
    }
}
