// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/utils/hashrate.rs
// Version: 0.3.1
//
// This file implements the time-weighted hash-rate calculator used by every
// device worker, located in the utils subdirectory. The EMA smooths the
// noisy per-batch rate for display and health tracking.
//
// Tree Location:
// - src/utils/hashrate.rs (EMA hash-rate calculator)
// - Depends on: std

use std::time::Instant;

/// Default EMA smoothing period in seconds.
pub const DEFAULT_EMA_PERIOD: f64 = 30.0;

/// Samples closer together than this are dropped as noise.
const MIN_SAMPLE_INTERVAL: f64 = 0.1;

/// Hash-rate snapshot: instantaneous rate, smoothed rate, totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRate {
    /// Instantaneous rate in H/s (noisy)
    pub rate: f64,
    /// EMA-smoothed rate in H/s (stable)
    pub ema: f64,
    /// Total hashes counted
    pub count: u64,
    /// Seconds since the counter started
    pub duration: f64,
}

/// Exponential moving average over irregular sample intervals.
///
/// Per-sample alpha is `1 - exp(-dt / period)`, so the smoothing behaves
/// identically whether updates arrive every 200 ms or every 2 s.
#[derive(Debug)]
pub struct HashRateCalculator {
    ema_period: f64,
    last_count: u64,
    current_rate: f64,
    ema_rate: f64,
    initialized: bool,
    last_update: Instant,
}

impl HashRateCalculator {
    pub fn new(ema_period: f64) -> Self {
        Self {
            ema_period,
            last_count: 0,
            current_rate: 0.0,
            ema_rate: 0.0,
            initialized: false,
            last_update: Instant::now(),
        }
    }

    /// Feed the running total hash count.
    pub fn update(&mut self, total_count: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        if elapsed < MIN_SAMPLE_INTERVAL {
            return;
        }

        let delta = total_count.saturating_sub(self.last_count);
        self.current_rate = delta as f64 / elapsed;

        if !self.initialized {
            self.ema_rate = self.current_rate;
            self.initialized = true;
        } else {
            let alpha = 1.0 - (-elapsed / self.ema_period).exp();
            self.ema_rate = alpha * self.current_rate + (1.0 - alpha) * self.ema_rate;
        }

        self.last_count = total_count;
        self.last_update = now;
    }

    /// Instantaneous rate of the last accepted sample (noisy).
    pub fn instant_rate(&self) -> f64 {
        self.current_rate
    }

    /// Smoothed EMA rate (stable).
    pub fn ema_rate(&self) -> f64 {
        self.ema_rate
    }

    /// EMA when available, otherwise the instantaneous rate.
    pub fn effective_rate(&self) -> f64 {
        if self.initialized {
            self.ema_rate
        } else {
            self.current_rate
        }
    }

    pub fn reset(&mut self) {
        self.reset_with(0);
    }

    /// Reset but keep counting from `initial_count` (continuing after a
    /// pause without a rate spike).
    pub fn reset_with(&mut self, initial_count: u64) {
        self.last_count = initial_count;
        self.current_rate = 0.0;
        self.ema_rate = 0.0;
        self.initialized = false;
        self.last_update = Instant::now();
    }
}

impl Default for HashRateCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_EMA_PERIOD)
    }
}
