// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: tests/target_test.rs
// Version: 0.3.1
//
// This file contains the pdiff target-calculation vectors, located in the
// tests directory. It pins the difficulty-to-target conversion to known
// values, including the fractional and clamped edge cases.
//
// Tree Location:
// - tests/target_test.rs (target calculation vectors)
// - Depends on: tosminer

use tosminer::core::difficulty::{difficulty_to_target, BASE_TARGET};

fn target_with(prefix: &[u8]) -> [u8; 32] {
    let mut t = [0u8; 32];
    t[..prefix.len()].copy_from_slice(prefix);
    t
}

#[test]
fn difficulty_1_is_base_target() {
    // 0x00000000FFFF0000...00
    assert_eq!(difficulty_to_target(1.0), BASE_TARGET);
    assert_eq!(BASE_TARGET[4], 0xFF);
    assert_eq!(BASE_TARGET[5], 0xFF);
}

#[test]
fn difficulty_2() {
    // 0xFFFF / 2 = 0x7FFF remainder 1; 1 * 256 / 2 = 0x80
    assert_eq!(
        difficulty_to_target(2.0),
        target_with(&[0, 0, 0, 0, 0x7F, 0xFF, 0x80])
    );
}

#[test]
fn difficulty_256() {
    // 0x0000000000FFFF00...00
    assert_eq!(
        difficulty_to_target(256.0),
        target_with(&[0, 0, 0, 0, 0x00, 0xFF, 0xFF])
    );
}

#[test]
fn difficulty_65535_and_65536() {
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
fn fractional_difficulties_exact() {
    // 65535 / 1.5 = 43690 = 0xAAAA exactly
    assert_eq!(
        difficulty_to_target(1.5),
        target_with(&[0, 0, 0, 0, 0xAA, 0xAA])
    );
    // 65535 / 3 = 21845 = 0x5555
    assert_eq!(
        difficulty_to_target(3.0),
        target_with(&[0, 0, 0, 0, 0x55, 0x55])
    );
}

#[test]
fn fractional_difficulties_approximate() {
    // The leading 16 bits must match floor(65535 / d) within one unit
    for (difficulty, expected) in [(7.25f64, 9039u16), (123.75, 529)] {
        let target = difficulty_to_target(difficulty);
        let high16 = ((target[4] as u16) << 8) | target[5] as u16;
        assert!(
            high16 >= expected.saturating_sub(1) && high16 <= expected + 1,
            "difficulty {}: high16 {} not within 1 of {}",
            difficulty,
            high16,
            expected
        );
    }
}

#[test]
fn sub_one_difficulty_capped_at_base() {
    assert_eq!(difficulty_to_target(0.5), BASE_TARGET);
    assert_eq!(difficulty_to_target(0.001), BASE_TARGET);
}

#[test]
fn non_positive_difficulty_is_all_ff() {
    assert_eq!(difficulty_to_target(0.0), [0xFF; 32]);
    assert_eq!(difficulty_to_target(-1.0), [0xFF; 32]);
}

#[test]
fn extreme_difficulty_clamped_and_solvable() {
    let clamped = difficulty_to_target(1e15);
    assert_eq!(difficulty_to_target(1e18), clamped);
    assert!(
        clamped.iter().any(|&b| b != 0),
        "clamped target must stay above zero"
    );
}

#[test]
fn targets_shrink_monotonically() {
    let difficulties = [
        1.0f64, 1.5, 2.0, 3.0, 7.25, 123.75, 256.0, 65535.0, 65536.0, 1e6, 1e9, 1e12, 1e15,
    ];
    let mut previous = difficulty_to_target(difficulties[0]);
    for &d in &difficulties[1..] {
        let target = difficulty_to_target(d);
        assert!(
            target <= previous,
            "target grew between difficulties (at {})",
            d
        );
        previous = target;
    }
}

#[test]
fn sanity_one_million() {
    let target = difficulty_to_target(1_000_000.0);
    assert_eq!(&target[..4], &[0, 0, 0, 0]);
    assert!(target.iter().any(|&b| b != 0));
}
