// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: tests/toshash_test.rs
// Version: 0.3.1
//
// This file contains tests for the TOS Hash V3 algorithm, located in the
// tests directory. It verifies determinism, input sensitivity and the
// search/verify contract through the public API.
//
// Tree Location:
// - tests/toshash_test.rs (hash algorithm tests)
// - Depends on: tosminer

use tosminer::core::toshash::{self, ScratchPad, INPUT_SIZE};
use tosminer::core::work::WorkPackage;

fn work_with_target(target: [u8; 32]) -> WorkPackage {
    let mut work = WorkPackage::default();
    work.job_id = "test-job".to_string();
    work.header = [0x33; INPUT_SIZE];
    work.target = target;
    work.valid = true;
    work
}

#[test]
fn hash_is_deterministic_across_pads_and_calls() {
    let input = [0x7Eu8; INPUT_SIZE];
    let mut pad_a = ScratchPad::new();
    let mut pad_b = ScratchPad::new();

    let first = toshash::hash(&input, &mut pad_a);
    assert_eq!(first, toshash::hash(&input, &mut pad_b));
    // A reused (dirty) pad must produce the identical digest
    assert_eq!(first, toshash::hash(&input, &mut pad_a));
}

#[test]
fn hash_is_deterministic_across_threads() {
    let input = [0x01u8; INPUT_SIZE];
    let reference = {
        let mut pad = ScratchPad::new();
        toshash::hash(&input, &mut pad)
    };

    let handles: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(move || {
                let mut pad = ScratchPad::new();
                toshash::hash(&input, &mut pad)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), reference);
    }
}

#[test]
fn every_input_byte_matters() {
    let mut pad = ScratchPad::new();
    let base = [0u8; INPUT_SIZE];
    let reference = toshash::hash(&base, &mut pad);

    for position in [0usize, 1, 55, 103, 104, INPUT_SIZE - 1] {
        let mut flipped = base;
        flipped[position] ^= 0x80;
        assert_ne!(
            toshash::hash(&flipped, &mut pad),
            reference,
            "flipping byte {} did not change the digest",
            position
        );
    }
}

#[test]
fn search_patches_nonce_and_checks_target() {
    let mut pad = ScratchPad::new();

    // All-FF target accepts every hash
    let work = work_with_target([0xFF; 32]);
    let solution = toshash::search(&work, 0xDEADBEEF, &mut pad).expect("max target");
    assert_eq!(solution.nonce, 0xDEADBEEF);
    assert_eq!(
        solution.hash,
        toshash::hash_for_nonce(&work, 0xDEADBEEF),
        "reported hash must match the recomputed one"
    );

    // All-zero target rejects everything (no hash is <= 0 in practice)
    let impossible = work_with_target([0x00; 32]);
    assert!(toshash::search(&impossible, 0xDEADBEEF, &mut pad).is_none());
}

#[test]
fn nonce_changes_the_digest() {
    let work = work_with_target([0xFF; 32]);
    let mut pad = ScratchPad::new();
    let a = toshash::search(&work, 1, &mut pad).unwrap();
    let b = toshash::search(&work, 2, &mut pad).unwrap();
    assert_ne!(a.hash, b.hash);
}

#[test]
fn verify_accepts_genuine_and_rejects_tampered() {
    let work = work_with_target([0xFF; 32]);
    let mut pad = ScratchPad::new();
    let solution = toshash::search(&work, 42, &mut pad).unwrap();

    assert!(toshash::verify(&work, &solution));

    let mut wrong_hash = solution.clone();
    wrong_hash.hash[7] ^= 1;
    assert!(!toshash::verify(&work, &wrong_hash));

    let mut wrong_nonce = solution;
    wrong_nonce.nonce += 1;
    assert!(!toshash::verify(&work, &wrong_nonce));
}

#[test]
fn benchmark_reports_positive_rate() {
    let rate = toshash::benchmark(10);
    assert!(rate > 0.0);
}
