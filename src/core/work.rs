// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/work.rs
// Version: 0.3.1
//
// This file defines the work package handed from the pool client to the
// mining devices, located in the core subdirectory. It owns the nonce-space
// partitioning across the device fleet and the extranonce2 encoding used on
// share submission.
//
// Tree Location:
// - src/core/work.rs (work package + nonce partitioning)
// - Depends on: hex

use crate::core::toshash::INPUT_SIZE;
use crate::core::types::{Hash256, Nonce};
use std::time::{Duration, Instant};

/// Maximum device count used for partitioning, so per-device ranges never
/// collapse below 2^56 nonces.
pub const MAX_DEVICES: u32 = 256;

/// One pool job. Immutable once published by the farm.
#[derive(Debug, Clone)]
pub struct WorkPackage {
    /// Job identifier from the pool (non-empty for valid packages)
    pub job_id: String,

    /// Block header bytes; the last 8 hold the nonce (little-endian)
    pub header: [u8; INPUT_SIZE],

    /// A hash H is a solution iff H <= target (big-endian compare)
    pub target: Hash256,

    /// Advisory block height
    pub height: u64,

    /// Base nonce for this job, derived from the pool's extranonce1
    pub start_nonce: Nonce,

    /// Extranonce1 hex from the subscribe response
    pub extranonce1: String,

    /// Extranonce2 size in bytes, clamped to [4, 8] by the client
    pub extranonce2_size: usize,

    /// Active (non-failed) device count at dispatch time
    pub total_devices: u32,

    /// Monotonic receive timestamp
    pub received_at: Instant,

    /// False for the sentinel empty package
    pub valid: bool,
}

impl Default for WorkPackage {
    fn default() -> Self {
        Self {
            job_id: String::new(),
            header: [0u8; INPUT_SIZE],
            target: [0u8; 32],
            height: 0,
            start_nonce: 0,
            extranonce1: String::new(),
            extranonce2_size: 4,
            total_devices: 1,
            received_at: Instant::now(),
            valid: false,
        }
    }
}

impl WorkPackage {
    /// Age of this work package.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// True when the package is older than the given threshold.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }

    /// Copy the header bytes into the first `len` positions, zero-padding
    /// the rest. Oversized input is truncated.
    pub fn set_header(&mut self, data: &[u8]) {
        let len = data.len().min(INPUT_SIZE);
        self.header[..len].copy_from_slice(&data[..len]);
        self.header[len..].fill(0);
    }

    /// Header with `nonce` patched into the last 8 bytes (little-endian).
    pub fn input_with_nonce(&self, nonce: Nonce) -> [u8; INPUT_SIZE] {
        let mut input = self.header;
        input[INPUT_SIZE - 8..].copy_from_slice(&nonce.to_le_bytes());
        input
    }

    /// Starting nonce for a device. The nonce space is split evenly across
    /// active devices so ranges are pairwise disjoint: each device owns
    /// `u64::MAX / total_devices` nonces beginning at its offset.
    pub fn device_start_nonce(&self, device_index: u32) -> Nonce {
        if self.total_devices <= 1 {
            return self.start_nonce;
        }

        let clamped_devices = self.total_devices.min(MAX_DEVICES);
        let clamped_index = device_index.min(clamped_devices - 1);

        // floor(2^64 / N), via u128 so N = 2 partitions exactly
        let space_per_device = ((1u128 << 64) / clamped_devices as u128) as u64;
        // space * (N-1) < 2^64, so the offset cannot overflow
        let device_offset = space_per_device * clamped_index as u64;

        match self.start_nonce.checked_add(device_offset) {
            Some(start) => start,
            // Saturate so the device still has a full range below u64::MAX
            None => u64::MAX - space_per_device + 1,
        }
    }

    /// Size of each device's nonce range for this package.
    pub fn device_range_size(&self) -> u64 {
        if self.total_devices <= 1 {
            return u64::MAX;
        }
        let clamped = self.total_devices.min(MAX_DEVICES);
        ((1u128 << 64) / clamped as u128) as u64
    }

    /// Extranonce2 hex for submission: `extranonce2_size` bytes,
    /// little-endian, of (nonce - start_nonce).
    pub fn extranonce2_hex(&self, nonce: Nonce) -> String {
        let en2 = nonce.wrapping_sub(self.start_nonce);
        hex::encode(&en2.to_le_bytes()[..self.extranonce2_size.min(8)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(total_devices: u32, start_nonce: u64) -> WorkPackage {
        let mut w = WorkPackage::default();
        w.job_id = "test".to_string();
        w.total_devices = total_devices;
        w.start_nonce = start_nonce;
        w.valid = true;
        w
    }

    #[test]
    fn test_single_device_gets_start_nonce() {
        let w = package(1, 12345);
        assert_eq!(w.device_start_nonce(0), 12345);
        assert_eq!(w.device_start_nonce(7), 12345);
    }

    #[test]
    fn test_ranges_disjoint() {
        for devices in [2u32, 3, 8, 256] {
            let w = package(devices, 0);
            let space = ((1u128 << 64) / devices as u128) as u64;
            let starts: Vec<u64> = (0..devices).map(|i| w.device_start_nonce(i)).collect();
            for i in 0..devices as usize {
                for j in (i + 1)..devices as usize {
                    let (a, b) = (starts[i].min(starts[j]), starts[i].max(starts[j]));
                    assert!(b - a >= space, "overlap between devices {} and {}", i, j);
                }
            }
        }
    }

    #[test]
    fn test_two_devices_partition_exactly() {
        let w = package(2, 0);
        assert_eq!(w.device_start_nonce(0), 0);
        assert_eq!(w.device_start_nonce(1), 1u64 << 63);
        assert_eq!(w.device_range_size(), 1u64 << 63);
    }

    #[test]
    fn test_device_count_clamped() {
        let w = package(1000, 0);
        let space = ((1u128 << 64) / MAX_DEVICES as u128) as u64;
        // Indices at or past the clamp share the last slot
        assert_eq!(w.device_start_nonce(255), space * 255);
        assert_eq!(w.device_start_nonce(999), space * 255);
    }

    #[test]
    fn test_overflow_saturates() {
        let w = package(3, u64::MAX - 10);
        let space = ((1u128 << 64) / 3u128) as u64;
        // start_nonce + offset overflows for index 2
        assert_eq!(w.device_start_nonce(2), u64::MAX - space + 1);
        // index 0 keeps the raw start
        assert_eq!(w.device_start_nonce(0), u64::MAX - 10);
    }

    #[test]
    fn test_extranonce2_hex_little_endian() {
        let mut w = package(1, 0x1000);
        w.extranonce2_size = 4;
        assert_eq!(w.extranonce2_hex(0x1000 + 0x0102), "02010000");

        w.extranonce2_size = 8;
        assert_eq!(w.extranonce2_hex(0x1000 + 1), "0100000000000000");
    }

    #[test]
    fn test_input_with_nonce_patches_tail() {
        let mut w = package(1, 0);
        w.header = [0xAA; INPUT_SIZE];
        let input = w.input_with_nonce(0x0102030405060708);
        assert_eq!(&input[..INPUT_SIZE - 8], &[0xAA; INPUT_SIZE - 8][..]);
        assert_eq!(&input[INPUT_SIZE - 8..], &0x0102030405060708u64.to_le_bytes());
        // The package header itself is untouched
        assert_eq!(w.header, [0xAA; INPUT_SIZE]);
    }

    #[test]
    fn test_set_header_pads() {
        let mut w = WorkPackage::default();
        w.header = [0xFF; INPUT_SIZE];
        w.set_header(&[1, 2, 3]);
        assert_eq!(&w.header[..3], &[1, 2, 3]);
        assert!(w.header[3..].iter().all(|&b| b == 0));
    }
}
