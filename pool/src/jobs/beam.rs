/// Beam-family job: login/solution dialect over Equihash 150,5
///
/// Beam encodes difficulty in a packed mantissa|order form; jobs carry the
/// connection's packed difficulty, and the share digest is the double-SHA256
/// of the submitted solution.

use chrono::Utc;
use num_bigint::BigUint;
use num_traits::One;
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::OnceLock;

use forgepool_hashing::{HashAlgorithm, Sha256d, SolutionVerifier};

use super::{effective_difficulty, is_hex, Share, SubmissionRegistry, WorkerSnapshot};
use crate::blockchain::BeamBlockTemplate;
use crate::difficulty::{digest_value, target_to_difficulty};
use crate::error::ShareError;

/// Nonce width, hex chars (8 bytes).
pub const NONCE_LENGTH: usize = 16;
/// Solution width, hex chars (104 bytes).
pub const SOLUTION_LENGTH: usize = 208;

fn diff1() -> &'static BigUint {
    static DIFF1: OnceLock<BigUint> = OnceLock::new();
    DIFF1.get_or_init(|| (BigUint::one() << 256u32) - BigUint::one())
}

/// Expand Beam's packed difficulty (mantissa | order << 24).
pub fn unpack_difficulty(packed: u32) -> f64 {
    let leading_bit = 1u32 << 24;
    let order = (packed >> 24) as i32;
    let mantissa = (leading_bit | (packed & (leading_bit - 1))) as f64;
    (mantissa * 2f64.powi(order - 24)).abs()
}

/// Pack a difficulty back into Beam's wire form. Values below 1 are clamped;
/// Beam never targets fractional difficulty.
pub fn pack_difficulty(unpacked: f64) -> u32 {
    let unpacked = unpacked.max(1.0);
    let rounded = unpacked.round().min(u32::MAX as f64) as u32;
    let bits = 32 - rounded.leading_zeros() as i32;
    let corrected_order = bits - 24 - 1;
    let mantissa = (unpacked * 2f64.powi(-corrected_order) - 2f64.powi(24)) as i64;
    let order = (24 + corrected_order) as u32;
    (mantissa as u32 & 0x00ff_ffff) | (order << 24)
}

pub struct BeamJob {
    job_id: String,
    template: BeamBlockTemplate,
    input: Vec<u8>,
    block_target: BigUint,
    network_difficulty: f64,
    solver: Arc<dyn SolutionVerifier>,
    solution_hasher: Sha256d,
    submissions: SubmissionRegistry,
}

impl BeamJob {
    pub fn new(
        template: BeamBlockTemplate,
        job_id: String,
        solver: Arc<dyn SolutionVerifier>,
    ) -> anyhow::Result<Self> {
        let input = hex::decode(&template.input)
            .map_err(|e| anyhow::anyhow!("bad input in template: {e}"))?;
        if input.len() != 32 {
            anyhow::bail!("bad input in template: expected 32 bytes, got {}", input.len());
        }

        let network_difficulty = unpack_difficulty(template.difficulty);
        if network_difficulty < 1.0 {
            anyhow::bail!("template difficulty {} unpacks below 1", template.difficulty);
        }
        let block_target = crate::difficulty::difficulty_to_target(diff1(), network_difficulty);

        Ok(Self {
            job_id,
            template,
            input,
            block_target,
            network_difficulty,
            solver,
            solution_hasher: Sha256d,
            submissions: SubmissionRegistry::new(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn height(&self) -> u64 {
        self.template.height
    }

    pub fn network_difficulty(&self) -> f64 {
        self.network_difficulty
    }

    pub fn block_target(&self) -> &BigUint {
        &self.block_target
    }

    /// Beam's job notification is a whole message, not a params array; the
    /// difficulty field carries the connection's packed share difficulty.
    pub fn notify_message(&self, connection_difficulty: f64) -> Value {
        json!({
            "id": self.job_id,
            "method": "job",
            "jsonrpc": "2.0",
            "input": self.template.input,
            "height": self.template.height,
            "difficulty": pack_difficulty(connection_difficulty),
        })
    }

    pub fn process_share(
        &self,
        worker: &WorkerSnapshot,
        nonce: &str,
        solution: &str,
    ) -> Result<(Share, Option<String>), ShareError> {
        if nonce.len() != NONCE_LENGTH || !is_hex(nonce) {
            return Err(ShareError::Invalid("incorrect size of nonce".to_string()));
        }
        if solution.len() != SOLUTION_LENGTH || !is_hex(solution) {
            return Err(ShareError::Invalid("incorrect size of solution".to_string()));
        }

        if !self.submissions.try_register(&format!("{nonce}{solution}")) {
            return Err(ShareError::Duplicate);
        }

        // Lengths validated above.
        let nonce_bytes = hex::decode(nonce).expect("hex-validated nonce");
        let solution_bytes = hex::decode(solution).expect("hex-validated solution");

        let mut preimage = Vec::with_capacity(40);
        preimage.extend_from_slice(&self.input);
        preimage.extend_from_slice(&nonce_bytes);
        if !self.solver.verify(&preimage, &solution_bytes) {
            return Err(ShareError::Invalid("invalid solution".to_string()));
        }

        let digest = self.solution_hasher.digest(&solution_bytes);
        let value = digest_value(&digest);

        let share_difficulty = target_to_difficulty(diff1(), &value);
        let is_block_candidate = value <= self.block_target;

        let accounted = effective_difficulty(share_difficulty, is_block_candidate, worker)?;

        let mut share = Share {
            block_height: self.template.height,
            network_difficulty: self.network_difficulty,
            difficulty: accounted,
            is_block_candidate,
            block_hash: None,
            block_reward: None,
            created: Utc::now(),
        };

        if is_block_candidate {
            let mut reversed = digest;
            reversed.reverse();
            share.block_hash = Some(hex::encode(reversed));
            // The wallet wants the winning (nonce, solution) pair back.
            return Ok((share, Some(format!("{nonce}{solution}"))));
        }

        Ok((share, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;
    impl SolutionVerifier for AcceptAll {
        fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
            true
        }
    }

    fn template(difficulty: u32) -> BeamBlockTemplate {
        BeamBlockTemplate {
            input: "cc".repeat(32),
            height: 1_500_000,
            difficulty,
        }
    }

    fn job(packed_difficulty: u32) -> BeamJob {
        BeamJob::new(template(packed_difficulty), "3".to_string(), Arc::new(AcceptAll)).unwrap()
    }

    fn solution_hex(seed: u8) -> String {
        hex::encode([seed; 104])
    }

    #[test]
    fn packed_difficulty_round_trips() {
        for difficulty in [1.0, 25.0, 1000.0, 123_456.0, 9_000_000.0] {
            let packed = pack_difficulty(difficulty);
            let unpacked = unpack_difficulty(packed);
            let rel = (unpacked - difficulty).abs() / difficulty;
            assert!(rel < 1e-6, "difficulty {difficulty}: {unpacked}");
        }
    }

    #[test]
    fn unpack_matches_hand_computed_values() {
        // order 24, zero mantissa: the implicit leading bit alone, 2^24.
        assert_eq!(unpack_difficulty(24 << 24), 16_777_216.0);
        // order 0, zero mantissa: 2^24 scaled down by 2^-24.
        assert_eq!(unpack_difficulty(0), 1.0);
    }

    #[test]
    fn structural_rejection_checks_both_fields() {
        let job = job(1 << 24);
        let worker = WorkerSnapshot::fixed(0.000001);

        assert!(matches!(
            job.process_share(&worker, "1234", &solution_hex(1)),
            Err(ShareError::Invalid(m)) if m.contains("nonce")
        ));
        assert!(matches!(
            job.process_share(&worker, &"ab".repeat(8), "beef"),
            Err(ShareError::Invalid(m)) if m.contains("solution")
        ));
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        // Low packed difficulty: everything under the block target is fine,
        // the point here is the registry.
        let job = job(1 << 24);
        let worker = WorkerSnapshot::fixed(0.000001);
        let nonce = "0011223344556677";

        let first = job.process_share(&worker, nonce, &solution_hex(5));
        assert!(first.is_ok(), "{first:?}");
        assert!(matches!(
            job.process_share(&worker, nonce, &solution_hex(5)),
            Err(ShareError::Duplicate)
        ));
    }

    #[test]
    fn candidate_returns_nonce_solution_payload() {
        // Difficulty 1: target is the whole space, every share is a block.
        let job = job(0);
        let worker = WorkerSnapshot::fixed(0.000001);
        let (share, payload) = job
            .process_share(&worker, "0011223344556677", &solution_hex(9))
            .unwrap();
        assert!(share.is_block_candidate);
        assert_eq!(
            payload.unwrap(),
            format!("0011223344556677{}", solution_hex(9))
        );
        assert_eq!(share.block_height, 1_500_000);
    }

    #[test]
    fn high_difficulty_connection_rejects_weak_shares() {
        // Network difficulty 2^24: ordinary solutions are nowhere near it.
        let job = job(48 << 24);
        let worker = WorkerSnapshot::fixed(1000.0);
        let err = job
            .process_share(&worker, "0011223344556677", &solution_hex(7))
            .unwrap_err();
        assert!(matches!(err, ShareError::LowDifficulty(_)));
    }

    #[test]
    fn notify_message_packs_connection_difficulty() {
        let job = job(1 << 24);
        let msg = job.notify_message(100.0);
        assert_eq!(msg["method"], "job");
        assert_eq!(msg["id"], "3");
        let packed = msg["difficulty"].as_u64().unwrap() as u32;
        let unpacked = unpack_difficulty(packed);
        assert!((unpacked - 100.0).abs() / 100.0 < 1e-6);
    }
}
