//! Per-document checkpoint chain: each checkpoint embeds a VDF proof of
//! elapsed time since the previous one and links backward by hash.

use crate::core::codec::sha256;
use crate::core::errors::{WitnessError, WitnessResult};
use crate::core::logging::{log_categorized_operation, log_checkpoint_commit, PerformanceCategory, PerformanceTimer};
use crate::vdf::{self, VdfParams, VdfProof};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub ordinal: u64,
    pub previous_hash: [u8; 32],
    pub content_hash: [u8; 32],
    pub timestamp_ns: i64,
    pub message: String,
    pub vdf_proof: Option<VdfProof>,
    pub checkpoint_hash: [u8; 32],
}

impl Checkpoint {
    fn compute_hash(
        ordinal: u64,
        previous_hash: &[u8; 32],
        content_hash: &[u8; 32],
        timestamp_ns: i64,
        message: &str,
    ) -> [u8; 32] {
        let mut buf = Vec::with_capacity(8 + 32 + 32 + 8 + message.len());
        buf.extend_from_slice(&ordinal.to_be_bytes());
        buf.extend_from_slice(previous_hash);
        buf.extend_from_slice(content_hash);
        buf.extend_from_slice(&timestamp_ns.to_be_bytes());
        buf.extend_from_slice(message.as_bytes());
        sha256(&buf)
    }
}

#[derive(Debug, Clone)]
pub struct ChainSummary {
    pub length: usize,
    pub first_timestamp_ns: Option<i64>,
    pub last_timestamp_ns: Option<i64>,
    pub total_vdf_iterations: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Chain {
    document_path: PathBuf,
    #[serde(skip, default = "VdfParams::default")]
    vdf_params: VdfParams,
    checkpoints: Vec<Checkpoint>,
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

impl Chain {
    pub fn new<P: Into<PathBuf>>(document_path: P, vdf_params: VdfParams) -> Self {
        Self {
            document_path: document_path.into(),
            vdf_params,
            checkpoints: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Commits a new checkpoint using the VDF's calibrated iteration count
    /// for the requested elapsed time.
    pub fn commit_with_vdf_duration(
        &mut self,
        message: &str,
        target_elapsed: std::time::Duration,
    ) -> WitnessResult<Checkpoint> {
        let iterations = self.vdf_params.iterations_for(target_elapsed);
        self.commit_inner(message, iterations)
    }

    /// Commits a new checkpoint using the VDF params' minimum iteration
    /// count, the default path most callers use.
    pub fn commit(&mut self, message: &str) -> WitnessResult<Checkpoint> {
        let iterations = self.vdf_params.min_iterations;
        self.commit_inner(message, iterations)
    }

    fn commit_inner(&mut self, message: &str, iterations: u64) -> WitnessResult<Checkpoint> {
        let timer = PerformanceTimer::new("chain.commit");
        let document_bytes = fs::read(&self.document_path)?;
        let content_hash = sha256(&document_bytes);

        let ordinal = self.checkpoints.len() as u64;
        let (previous_hash, vdf_proof) = if ordinal == 0 {
            ([0u8; 32], None)
        } else {
            let previous_hash = self.checkpoints[ordinal as usize - 1].checkpoint_hash;
            let input = vdf::chain_input(&content_hash, &previous_hash, ordinal);
            let cancel = AtomicBool::new(false);
            let proof = vdf::compute(input, iterations, &cancel)
                .ok_or(WitnessError::VdfInvalid)?;
            (previous_hash, Some(proof))
        };

        let timestamp_ns = now_ns();
        let checkpoint_hash = Checkpoint::compute_hash(
            ordinal,
            &previous_hash,
            &content_hash,
            timestamp_ns,
            message,
        );

        let checkpoint = Checkpoint {
            ordinal,
            previous_hash,
            content_hash,
            timestamp_ns,
            message: message.to_string(),
            vdf_proof,
            checkpoint_hash,
        };
        self.checkpoints.push(checkpoint.clone());

        let vdf_elapsed_ms = timer.elapsed_ms();
        log_checkpoint_commit(ordinal, self.checkpoints.len(), vdf_elapsed_ms);
        log_categorized_operation(PerformanceCategory::ChainCommit, "chain.commit", vdf_elapsed_ms);
        timer.check_target(5_000);

        Ok(checkpoint)
    }

    /// Rebuilds and checks every chain invariant, returning the first
    /// violation encountered.
    pub fn verify(&self) -> WitnessResult<()> {
        let mut prev_timestamp = i64::MIN;
        for (i, checkpoint) in self.checkpoints.iter().enumerate() {
            let ordinal = i as u64;
            if checkpoint.ordinal != ordinal {
                return Err(WitnessError::ChainBroken {
                    index: ordinal,
                    reason: "ordinal mismatch".into(),
                });
            }

            let expected_hash = Checkpoint::compute_hash(
                checkpoint.ordinal,
                &checkpoint.previous_hash,
                &checkpoint.content_hash,
                checkpoint.timestamp_ns,
                &checkpoint.message,
            );
            if expected_hash != checkpoint.checkpoint_hash {
                return Err(WitnessError::ChainBroken {
                    index: ordinal,
                    reason: "checkpoint hash mismatch".into(),
                });
            }

            if i == 0 {
                if checkpoint.previous_hash != [0u8; 32] || checkpoint.vdf_proof.is_some() {
                    return Err(WitnessError::ChainBroken {
                        index: ordinal,
                        reason: "genesis checkpoint must have zero previous_hash and no VDF proof"
                            .into(),
                    });
                }
            } else {
                let prev = &self.checkpoints[i - 1];
                if checkpoint.previous_hash != prev.checkpoint_hash {
                    return Err(WitnessError::ChainBroken {
                        index: ordinal,
                        reason: "previous_hash does not link to prior checkpoint".into(),
                    });
                }
                let proof = checkpoint
                    .vdf_proof
                    .as_ref()
                    .ok_or_else(|| WitnessError::ChainBroken {
                        index: ordinal,
                        reason: "missing VDF proof".into(),
                    })?;
                let expected_input =
                    vdf::chain_input(&checkpoint.content_hash, &checkpoint.previous_hash, ordinal);
                if proof.input != expected_input {
                    return Err(WitnessError::ChainBroken {
                        index: ordinal,
                        reason: "VDF input does not bind to this checkpoint".into(),
                    });
                }
                if !vdf::verify(proof) {
                    return Err(WitnessError::ChainBroken {
                        index: ordinal,
                        reason: "VDF proof failed verification".into(),
                    });
                }
            }

            if checkpoint.timestamp_ns < prev_timestamp {
                return Err(WitnessError::ChainBroken {
                    index: ordinal,
                    reason: "timestamp decreased relative to previous checkpoint".into(),
                });
            }
            prev_timestamp = checkpoint.timestamp_ns;
        }
        Ok(())
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            length: self.checkpoints.len(),
            first_timestamp_ns: self.checkpoints.first().map(|c| c.timestamp_ns),
            last_timestamp_ns: self.checkpoints.last().map(|c| c.timestamp_ns),
            total_vdf_iterations: self
                .checkpoints
                .iter()
                .filter_map(|c| c.vdf_proof.as_ref())
                .map(|p| p.iterations)
                .sum(),
        }
    }

    /// Lower bound on wall-clock time elapsed across the whole chain, derived
    /// from the calibrated iterations/second rate, not a measured duration.
    pub fn total_elapsed_time(&self) -> std::time::Duration {
        let total_iterations = self.summary().total_vdf_iterations;
        std::time::Duration::from_secs_f64(
            total_iterations as f64 / self.vdf_params.iterations_per_second as f64,
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> WitnessResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| WitnessError::Malformed(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> WitnessResult<Self> {
        let bytes = fs::read(path)?;
        let mut chain: Chain =
            serde_json::from_slice(&bytes).map_err(|e| WitnessError::Malformed(e.to_string()))?;
        chain.vdf_params = VdfParams::default();
        Ok(chain)
    }
}
