// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/device.rs
// Version: 0.3.1
//
// This file defines the device descriptor and per-device health tracking for
// the TOS miner, located in the miner subdirectory. Health status is derived
// from solution validity and accumulated hardware errors.
//
// Tree Location:
// - src/miner/device.rs (device descriptor + health model)
// - Depends on: num_cpus

use crate::core::types::MinerType;
use std::time::Instant;

/// Validity below this fraction marks a device degraded.
const VALIDITY_DEGRADED: f64 = 0.95;
/// Validity below this fraction marks a device unhealthy.
const VALIDITY_UNHEALTHY: f64 = 0.80;
/// Validity below this fraction marks a device failed.
const VALIDITY_FAILED: f64 = 0.5;
/// Current rate below this fraction of peak counts as a hashrate drop.
const HASHRATE_DROP_RATIO: f64 = 0.5;
/// Solutions needed before validity judgments are made.
const MIN_SOLUTIONS_FOR_JUDGMENT: u64 = 5;

/// A mining device (CPU thread pool slot, OpenCL GPU or CUDA GPU)
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Backend type
    pub device_type: MinerType,

    /// Index within the farm's fleet
    pub index: u32,

    /// Display name
    pub name: String,

    /// Total device memory in bytes (0 for CPU)
    pub total_memory: u64,

    /// Compute units / multiprocessors
    pub compute_units: u32,

    /// OpenCL addressing
    pub cl_platform_name: String,
    pub cl_platform_index: u32,
    pub cl_device_index: u32,

    /// CUDA addressing (-1 when not a CUDA device)
    pub cuda_device_index: i32,
    pub cuda_cc_major: i32,
    pub cuda_cc_minor: i32,
}

impl DeviceDescriptor {
    pub fn cpu(index: u32) -> Self {
        Self {
            device_type: MinerType::Cpu,
            index,
            name: format!("CPU Thread {}", index),
            total_memory: 0,
            compute_units: 1,
            cl_platform_name: String::new(),
            cl_platform_index: 0,
            cl_device_index: 0,
            cuda_device_index: -1,
            cuda_cc_major: 0,
            cuda_cc_minor: 0,
        }
    }
}

/// Device health status, derived from validity and error counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
}

/// Per-device health counters and derived status
#[derive(Debug, Clone)]
pub struct DeviceHealth {
    pub status: HealthStatus,
    pub valid_solutions: u64,
    pub invalid_solutions: u64,
    pub duplicate_solutions: u64,
    pub hardware_errors: u64,
    pub hashrate_drops: u64,
    pub peak_rate: f64,
    pub current_rate: f64,
    pub last_solution_at: Option<Instant>,
    pub last_hash_update_at: Option<Instant>,
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            valid_solutions: 0,
            invalid_solutions: 0,
            duplicate_solutions: 0,
            hardware_errors: 0,
            hashrate_drops: 0,
            peak_rate: 0.0,
            current_rate: 0.0,
            last_solution_at: None,
            last_hash_update_at: None,
        }
    }
}

impl DeviceHealth {
    /// Fraction of verified candidates that were valid. Defaults to 1.0
    /// until enough solutions have been observed to judge.
    pub fn validity_rate(&self) -> f64 {
        let total = self.valid_solutions + self.invalid_solutions;
        if total == 0 {
            return 1.0;
        }
        self.valid_solutions as f64 / total as f64
    }

    /// Re-derive the status from the counters and the given rate sample.
    pub fn update_status(&mut self, current_rate: f64) {
        self.current_rate = current_rate;
        if current_rate > self.peak_rate {
            self.peak_rate = current_rate;
        }
        if self.peak_rate > 0.0 && current_rate < self.peak_rate * HASHRATE_DROP_RATIO {
            self.hashrate_drops += 1;
        }
        self.last_hash_update_at = Some(Instant::now());

        let total = self.valid_solutions + self.invalid_solutions;
        if total < MIN_SOLUTIONS_FOR_JUDGMENT {
            self.status = HealthStatus::Healthy;
            return;
        }

        let validity = self.validity_rate();
        self.status = if self.hardware_errors > 50 || validity < VALIDITY_FAILED {
            HealthStatus::Failed
        } else if validity < VALIDITY_UNHEALTHY || self.hardware_errors > 20 {
            HealthStatus::Unhealthy
        } else if validity < VALIDITY_DEGRADED || self.hardware_errors > 5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }
}

/// Enumerate CPU "devices": one descriptor per mining thread.
pub fn enum_cpu_devices(threads: usize) -> Vec<DeviceDescriptor> {
    let threads = if threads == 0 { num_cpus::get() } else { threads };
    (0..threads as u32).map(DeviceDescriptor::cpu).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_defaults_to_one() {
        let health = DeviceHealth::default();
        assert_eq!(health.validity_rate(), 1.0);
    }

    #[test]
    fn test_status_stays_healthy_below_judgment_threshold() {
        let mut health = DeviceHealth::default();
        health.valid_solutions = 1;
        health.invalid_solutions = 3;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_status_thresholds() {
        let mut health = DeviceHealth::default();

        health.valid_solutions = 94;
        health.invalid_solutions = 6;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Degraded);

        health.valid_solutions = 79;
        health.invalid_solutions = 21;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        health.valid_solutions = 49;
        health.invalid_solutions = 51;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Failed);
    }

    #[test]
    fn test_hardware_errors_alone_escalate() {
        let mut health = DeviceHealth::default();
        health.valid_solutions = 100;
        health.hardware_errors = 6;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Degraded);

        health.hardware_errors = 21;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        health.hardware_errors = 51;
        health.update_status(0.0);
        assert_eq!(health.status, HealthStatus::Failed);
    }

    #[test]
    fn test_peak_rate_and_drop_counter() {
        let mut health = DeviceHealth::default();
        health.update_status(1000.0);
        assert_eq!(health.peak_rate, 1000.0);
        assert_eq!(health.hashrate_drops, 0);

        health.update_status(400.0);
        assert_eq!(health.peak_rate, 1000.0);
        assert_eq!(health.hashrate_drops, 1);
    }
}
