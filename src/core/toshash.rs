// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/toshash.rs
// Version: 0.3.1
//
// This file implements the TOS Hash V3 memory-hard algorithm used for
// proof-of-work, located in the core subdirectory. It provides the CPU
// reference used for mining and for verifying GPU candidates.
//
// Tree Location:
// - src/core/toshash.rs (TOS Hash V3 implementation)
// - Depends on: blake3

use crate::core::types::{meets_target, Hash256, Nonce, Solution};
use crate::core::work::WorkPackage;
use std::cell::RefCell;
use std::time::Instant;

/// Scratchpad length in 64-bit words (64 KiB).
pub const MEMORY_SIZE: usize = 8192;
/// Strided mixing rounds in stage 3.
pub const MIXING_ROUNDS: usize = 8;
/// Sequential passes in stage 2.
pub const MEMORY_PASSES: usize = 4;
/// Multiplicative mixing constant.
pub const MIX_CONST: u64 = 0x517cc1b727220a95;
/// Block header size in bytes, nonce in the last 8.
pub const INPUT_SIZE: usize = 112;
/// Output hash size in bytes.
pub const HASH_SIZE: usize = 32;

/// Stage 3 stride schedule, cycled by round index.
const STRIDES: [usize; 4] = [1, 64, 256, 1024];

/// 64 KiB working buffer, owned per hashing context and reusable across
/// invocations. Heap-allocated so worker threads keep small stacks.
pub struct ScratchPad(Box<[u64; MEMORY_SIZE]>);

impl ScratchPad {
    pub fn new() -> Self {
        ScratchPad(vec![0u64; MEMORY_SIZE].into_boxed_slice().try_into().unwrap())
    }
}

impl Default for ScratchPad {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    // Per-thread scratchpad for verification, so verify() costs no allocation
    // on the hot path.
    static VERIFY_SCRATCH: RefCell<ScratchPad> = RefCell::new(ScratchPad::new());
}

#[inline(always)]
fn mix(a: u64, b: u64, round: usize) -> u64 {
    let rot = ((round * 7) % 64) as u32;
    let x = a.wrapping_add(b);
    let y = a ^ b.rotate_left(rot);
    let z = x.wrapping_mul(MIX_CONST);
    z ^ y.rotate_right(rot / 2)
}

/// Stage 1: Blake3 the input to a 256-bit seed, then fill the scratchpad
/// from a 4-word rolling state.
fn stage1_init(input: &[u8], scratch: &mut [u64; MEMORY_SIZE]) {
    let seed = blake3::hash(input);
    let seed = seed.as_bytes();

    let mut state = [0u64; 4];
    for (i, word) in state.iter_mut().enumerate() {
        *word = u64::from_le_bytes(seed[i * 8..(i + 1) * 8].try_into().unwrap());
    }

    for i in 0..MEMORY_SIZE {
        let idx = i % 4;
        state[idx] = mix(state[idx], state[(idx + 1) % 4], i);
        scratch[i] = state[idx];
    }
}

/// Stage 2: alternating forward/backward sequential passes with a carry,
/// so every word depends on the whole pad.
fn stage2_mix(scratch: &mut [u64; MEMORY_SIZE]) {
    for pass in 0..MEMORY_PASSES {
        if pass % 2 == 0 {
            let mut carry = scratch[MEMORY_SIZE - 1];
            for i in 0..MEMORY_SIZE {
                let prev = if i > 0 { scratch[i - 1] } else { scratch[MEMORY_SIZE - 1] };
                scratch[i] = mix(scratch[i], prev ^ carry, pass);
                carry = scratch[i];
            }
        } else {
            let mut carry = scratch[0];
            for i in (0..MEMORY_SIZE).rev() {
                let next = if i < MEMORY_SIZE - 1 { scratch[i + 1] } else { scratch[0] };
                scratch[i] = mix(scratch[i], next ^ carry, pass);
                carry = scratch[i];
            }
        }
    }
}

/// Stage 3: strided mixing with the round-cycled stride schedule.
fn stage3_strided(scratch: &mut [u64; MEMORY_SIZE]) {
    for round in 0..MIXING_ROUNDS {
        let stride = STRIDES[round % 4];
        for i in 0..MEMORY_SIZE {
            let j = (i + stride) % MEMORY_SIZE;
            let k = (i + stride * 2) % MEMORY_SIZE;
            scratch[i] = mix(scratch[i], scratch[j] ^ scratch[k], round);
        }
    }
}

/// Stage 4: XOR-fold the pad to 4 words, serialize little-endian, Blake3.
fn stage4_finalize(scratch: &[u64; MEMORY_SIZE]) -> Hash256 {
    let mut folded = [0u64; 4];
    for (i, word) in scratch.iter().enumerate() {
        folded[i % 4] ^= word;
    }

    let mut bytes = [0u8; 32];
    for (i, word) in folded.iter().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }

    *blake3::hash(&bytes).as_bytes()
}

/// Compute the TOS Hash V3 of a 112-byte input. Deterministic and pure;
/// the scratchpad carries no state between calls.
pub fn hash(input: &[u8; INPUT_SIZE], scratch: &mut ScratchPad) -> Hash256 {
    stage1_init(input, &mut scratch.0);
    stage2_mix(&mut scratch.0);
    stage3_strided(&mut scratch.0);
    stage4_finalize(&scratch.0)
}

/// Patch `nonce` into the header (last 8 bytes, little-endian), hash, and
/// return a solution when the hash meets the work target.
pub fn search(work: &WorkPackage, nonce: Nonce, scratch: &mut ScratchPad) -> Option<Solution> {
    let input = work.input_with_nonce(nonce);
    let result = hash(&input, scratch);

    if meets_target(&result, &work.target) {
        Some(Solution::new(nonce, result, 0))
    } else {
        None
    }
}

/// Hash the work header with `nonce` patched in, using the thread-local
/// verification pad so callers pay no allocation.
pub fn hash_for_nonce(work: &WorkPackage, nonce: Nonce) -> Hash256 {
    let input = work.input_with_nonce(nonce);
    VERIFY_SCRATCH.with(|s| hash(&input, &mut s.borrow_mut()))
}

/// Recompute a solution's hash and check it against the work target.
pub fn verify(work: &WorkPackage, solution: &Solution) -> bool {
    let result = hash_for_nonce(work, solution.nonce);
    result == solution.hash && meets_target(&result, &work.target)
}

/// Single-threaded hash-rate measurement. Returns hashes per second.
pub fn benchmark(iterations: u64) -> f64 {
    let mut scratch = ScratchPad::new();
    let mut input = [0u8; INPUT_SIZE];

    let start = Instant::now();
    for i in 0..iterations {
        input[0] = (i & 0xFF) as u8;
        input[1] = ((i >> 8) & 0xFF) as u8;
        let _ = hash(&input, &mut scratch);
    }
    let elapsed = start.elapsed().as_secs_f64();

    if elapsed > 0.0 {
        iterations as f64 / elapsed
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let input = [0x5Au8; INPUT_SIZE];
        let mut s1 = ScratchPad::new();
        let mut s2 = ScratchPad::new();
        assert_eq!(hash(&input, &mut s1), hash(&input, &mut s2));
        // Scratch reuse must not leak state into the next invocation
        assert_eq!(hash(&input, &mut s1), hash(&input, &mut s2));
    }

    #[test]
    fn test_hash_input_sensitivity() {
        let mut scratch = ScratchPad::new();
        let a = [0u8; INPUT_SIZE];
        let mut b = [0u8; INPUT_SIZE];
        b[INPUT_SIZE - 1] = 1;
        assert_ne!(hash(&a, &mut scratch), hash(&b, &mut scratch));
    }

    #[test]
    fn test_mix_rotation_wraps() {
        // Round 10 gives rot = 70 % 64 = 6; just check it does not panic and
        // differs from the zero-rotation round.
        assert_ne!(mix(1, 2, 0), mix(1, 2, 10));
    }

    #[test]
    fn test_search_respects_target() {
        let mut scratch = ScratchPad::new();
        let mut work = WorkPackage::default();
        work.valid = true;

        work.target = [0xFF; 32];
        let sol = search(&work, 42, &mut scratch).expect("max target accepts everything");
        assert_eq!(sol.nonce, 42);

        work.target = [0x00; 32];
        assert!(search(&work, 42, &mut scratch).is_none());
    }

    #[test]
    fn test_verify_round_trip() {
        let mut scratch = ScratchPad::new();
        let mut work = WorkPackage::default();
        work.valid = true;
        work.target = [0xFF; 32];

        let sol = search(&work, 7, &mut scratch).unwrap();
        assert!(verify(&work, &sol));

        // Tampered hash must fail verification
        let mut bad = sol.clone();
        bad.hash[0] ^= 1;
        assert!(!verify(&work, &bad));
    }

    #[test]
    fn test_hash_across_threads() {
        let input = [0x17u8; INPUT_SIZE];
        let mut scratch = ScratchPad::new();
        let here = hash(&input, &mut scratch);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(move || {
                    let mut scratch = ScratchPad::new();
                    hash(&input, &mut scratch)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), here);
        }
    }
}
