//! Sequential hash-chain verifiable delay function: `output = SHA256^iterations(input)`.
//! Computation is interruptible at iteration boundaries so the heartbeat
//! controller can cancel an in-flight commit without blocking shutdown.

use crate::core::codec::{ct_eq, sha256};
use crate::core::logging::{log_categorized_operation, PerformanceCategory, PerformanceTimer};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Every this-many iterations the cancellation flag is polled. Tuned so the
/// worst-case check interval is well under 10ms even at a conservative
/// single-core SHA-256 rate.
const CANCEL_CHECK_INTERVAL: u64 = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VdfProof {
    pub input: [u8; 32],
    pub output: [u8; 32],
    pub iterations: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct VdfParams {
    pub iterations_per_second: u64,
    pub min_iterations: u64,
    pub max_iterations: u64,
}

impl Default for VdfParams {
    fn default() -> Self {
        Self {
            iterations_per_second: 200_000,
            min_iterations: 1_000,
            max_iterations: 50_000_000,
        }
    }
}

impl VdfParams {
    /// Chooses an iteration count for a requested elapsed time, clamped into
    /// `[min_iterations, max_iterations]`.
    pub fn iterations_for(&self, target_elapsed: std::time::Duration) -> u64 {
        let raw = (self.iterations_per_second as f64 * target_elapsed.as_secs_f64()) as u64;
        raw.clamp(self.min_iterations, self.max_iterations)
    }
}

/// Computes `H^iterations(input)`. Never fails; returns `None` only if
/// `cancel` is observed set, in which case no proof is produced.
pub fn compute(input: [u8; 32], iterations: u64, cancel: &AtomicBool) -> Option<VdfProof> {
    let timer = PerformanceTimer::new("vdf.compute");
    let mut state = input;
    let mut since_check: u64 = 0;
    for _ in 0..iterations {
        state = sha256(&state);
        since_check += 1;
        if since_check >= CANCEL_CHECK_INTERVAL {
            since_check = 0;
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
        }
    }
    let elapsed_ms = timer.elapsed_ms();
    log_categorized_operation(PerformanceCategory::VdfComputation, "vdf.compute", elapsed_ms);
    Some(VdfProof {
        input,
        output: state,
        iterations,
    })
}

/// Recomputes the hash chain and checks the output in constant time.
pub fn verify(proof: &VdfProof) -> bool {
    let mut state = proof.input;
    for _ in 0..proof.iterations {
        state = sha256(&state);
    }
    ct_eq(&state, &proof.output)
}

/// The sole sanctioned VDF input construction for checkpoint chaining:
/// `SHA256(content_hash ‖ previous_hash ‖ ordinal_be64)`.
pub fn chain_input(content_hash: &[u8; 32], previous_hash: &[u8; 32], ordinal: u64) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 32 + 8);
    buf.extend_from_slice(content_hash);
    buf.extend_from_slice(previous_hash);
    buf.extend_from_slice(&ordinal.to_be_bytes());
    sha256(&buf)
}
