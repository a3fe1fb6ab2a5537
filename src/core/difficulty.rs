// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/difficulty.rs
// Version: 0.3.1
//
// This file contains the pool-difficulty ("pdiff") to 256-bit target
// conversion and the share-difficulty calculation, located in the core
// subdirectory of the TOS miner source tree.
//
// Tree Location:
// - src/core/difficulty.rs (difficulty / target arithmetic)
// - Depends on: uint, tracing

use crate::core::types::Hash256;
use tracing::warn;
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

const LOG_TARGET: &str = "tosminer::core::difficulty";

/// pdiff base target: 0x00000000FFFF << 208, difficulty 1.
pub const BASE_TARGET: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Difficulties above this produce a near-zero target and would lose
/// precision in the fixed-point divide.
const MAX_SAFE_DIFFICULTY: f64 = 1e15;

/// Convert a pool difficulty to a 256-bit big-endian target:
/// `target = base / difficulty` with `base = 0x00000000FFFF << 208`.
///
/// Fractional difficulties are handled by scaling the divisor by 2^32 and
/// long-dividing the 36-byte shifted dividend byte-by-byte with a 128-bit
/// running remainder.
///
/// Edge cases: difficulty <= 0 yields the all-FF target, difficulty < 1 is
/// not amplified past the base, and difficulty > 1e15 is clamped.
pub fn difficulty_to_target(difficulty: f64) -> Hash256 {
    let mut target = [0u8; 32];

    if difficulty <= 0.0 {
        return [0xFF; 32];
    }

    if difficulty < 1.0 {
        target[4] = 0xFF;
        target[5] = 0xFF;
        return target;
    }

    let difficulty = if difficulty > MAX_SAFE_DIFFICULTY {
        warn!(
            target: LOG_TARGET,
            "Difficulty {} exceeds safe limit, clamping to {}", difficulty, MAX_SAFE_DIFFICULTY
        );
        MAX_SAFE_DIFFICULTY
    } else {
        difficulty
    };

    // target = base / difficulty = (base * 2^32) / round(difficulty * 2^32).
    // The scaled dividend is 0xFFFF followed by 30 zero bytes shifted left
    // by 4 bytes (36 bytes total), so quotient bytes land 4 positions early.
    let mut divisor = (difficulty * 4294967296.0).round() as u128;
    if divisor == 0 {
        divisor = 1;
    }

    let mut remainder: u128 = 0;
    for i in 0..36usize {
        let dividend_byte: u8 = if i == 4 || i == 5 { 0xFF } else { 0 };
        remainder = (remainder << 8) | dividend_byte as u128;

        let q = remainder / divisor;
        if (4..36).contains(&i) {
            target[i - 4] = q.min(255) as u8;
        }
        remainder %= divisor;
    }

    if target.iter().all(|&b| b == 0) {
        // Minimum solvable target
        target[31] = 1;
    }

    target
}

/// Share difficulty of a hash: base / hash, for logging and statistics.
pub fn hash_difficulty(hash: &Hash256) -> u64 {
    let value = U256::from_big_endian(hash);
    if value.is_zero() {
        return u64::MAX;
    }
    let base = U256::from_big_endian(&BASE_TARGET);
    (base / value).low_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with(prefix: &[u8]) -> Hash256 {
        let mut t = [0u8; 32];
        t[..prefix.len()].copy_from_slice(prefix);
        t
    }

    #[test]
    fn test_difficulty_one_is_base() {
        assert_eq!(difficulty_to_target(1.0), BASE_TARGET);
    }

    #[test]
    fn test_difficulty_two() {
        // 0xFFFF / 2 = 0x7FFF remainder 1; 1 * 256 / 2 = 0x80
        let expected = target_with(&[0, 0, 0, 0, 0x7F, 0xFF, 0x80]);
        assert_eq!(difficulty_to_target(2.0), expected);
    }

    #[test]
    fn test_fractional_difficulties() {
        // 0xFFFF / 1.5 = 0xAAAA exactly
        assert_eq!(
            difficulty_to_target(1.5),
            target_with(&[0, 0, 0, 0, 0xAA, 0xAA])
        );
        // 0xFFFF / 3 = 0x5555
        assert_eq!(
            difficulty_to_target(3.0),
            target_with(&[0, 0, 0, 0, 0x55, 0x55])
        );
    }

    #[test]
    fn test_difficulty_256() {
        assert_eq!(
            difficulty_to_target(256.0),
            target_with(&[0, 0, 0, 0, 0x00, 0xFF, 0xFF])
        );
    }

    #[test]
    fn test_difficulty_65535_and_65536() {
        assert_eq!(
            difficulty_to_target(65535.0),
            target_with(&[0, 0, 0, 0, 0x00, 0x01])
        );
        assert_eq!(
            difficulty_to_target(65536.0),
            target_with(&[0, 0, 0, 0, 0x00, 0x00, 0xFF, 0xFF])
        );
    }

    #[test]
    fn test_sub_one_difficulty_capped_at_base() {
        assert_eq!(difficulty_to_target(0.5), BASE_TARGET);
    }

    #[test]
    fn test_non_positive_difficulty() {
        assert_eq!(difficulty_to_target(0.0), [0xFF; 32]);
        assert_eq!(difficulty_to_target(-3.0), [0xFF; 32]);
    }

    #[test]
    fn test_divisor_is_rounded_not_truncated() {
        // d = 1 + 2^-33 scales to exactly 2^32 + 0.5, which rounds up to
        // 2^32 + 1; a truncating divisor would collapse back to the base
        // target.
        let nudged = difficulty_to_target(1.0 + 2f64.powi(-33));
        assert_ne!(nudged, BASE_TARGET);
        assert!(nudged < BASE_TARGET);
    }

    #[test]
    fn test_huge_difficulty_clamped_nonzero() {
        let t = difficulty_to_target(1e30);
        assert_eq!(t, difficulty_to_target(1e15));
        assert!(t.iter().any(|&b| b != 0), "clamped target stays solvable");
    }

    #[test]
    fn test_monotonic_in_difficulty() {
        let diffs = [1.0, 1.5, 2.0, 7.25, 123.75, 4096.0, 1e6, 1e12, 1e15];
        let mut prev = difficulty_to_target(diffs[0]);
        for &d in &diffs[1..] {
            let t = difficulty_to_target(d);
            assert!(t <= prev, "target must not grow with difficulty {}", d);
            prev = t;
        }
    }

    #[test]
    fn test_hash_difficulty() {
        assert_eq!(hash_difficulty(&BASE_TARGET), 1);
        assert_eq!(hash_difficulty(&[0u8; 32]), u64::MAX);

        // Half the base target is difficulty 2
        let half = target_with(&[0, 0, 0, 0, 0x7F, 0xFF, 0x80]);
        assert_eq!(hash_difficulty(&half), 2);

        let mut small = [0u8; 32];
        small[5] = 0xFF;
        small[6] = 0xFF;
        assert_eq!(hash_difficulty(&small), 256);
    }
}
