/// Equihash-family job: ZCash-style 140-byte headers plus an Equihash
/// solution, coinbase/merkle assembly and full block serialization
///
/// The solution verifier is injected; native solver bindings live outside
/// this workspace behind the same trait.

use chrono::Utc;
use num_bigint::BigUint;
use num_traits::{Num, Zero};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::OnceLock;

use forgepool_hashing::{HashAlgorithm, Sha256d, SolutionVerifier};

use super::{effective_difficulty, is_hex, Share, SubmissionRegistry, WorkerSnapshot};
use crate::blockchain::EquihashBlockTemplate;
use crate::difficulty::{digest_value, target_to_difficulty};
use crate::error::ShareError;

/// Full nonce width: extranonce1 plus the miner's extranonce2, hex chars.
pub const NONCE_LENGTH: usize = 64;
/// ntime field width, hex chars.
pub const NTIME_LENGTH: usize = 8;

/// ZCash-family diff1 target.
pub(crate) fn diff1() -> &'static BigUint {
    static DIFF1: OnceLock<BigUint> = OnceLock::new();
    DIFF1.get_or_init(|| {
        BigUint::from_str_radix(
            "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            16,
        )
        .expect("diff1 constant")
    })
}

/// Compact-size encoding, as prefixed to the solution on the wire.
fn var_int(value: u64) -> Vec<u8> {
    match value {
        0..=0xfc => vec![value as u8],
        0xfd..=0xffff => {
            let mut out = vec![0xfd];
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out
        }
        0x10000..=0xffff_ffff => {
            let mut out = vec![0xfe];
            out.extend_from_slice(&(value as u32).to_le_bytes());
            out
        }
        _ => {
            let mut out = vec![0xff];
            out.extend_from_slice(&value.to_le_bytes());
            out
        }
    }
}

/// Double-SHA256 merkle fold over internal-order txids, duplicating the last
/// entry on odd levels.
fn merkle_root(hasher: &Sha256d, mut hashes: Vec<[u8; 32]>) -> [u8; 32] {
    if hashes.is_empty() {
        return [0u8; 32];
    }
    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            hashes.push(*hashes.last().expect("non-empty level"));
        }
        hashes = hashes
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(&pair[1]);
                hasher.digest(&buf)
            })
            .collect();
    }
    hashes[0]
}

/// Display-order (big-endian) hex to internal little-endian 32 bytes.
fn internal_bytes(hex_be: &str, what: &str) -> anyhow::Result<[u8; 32]> {
    let decoded = hex::decode(hex_be).map_err(|e| anyhow::anyhow!("bad {what}: {e}"))?;
    if decoded.len() != 32 {
        anyhow::bail!("bad {what}: expected 32 bytes, got {}", decoded.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&decoded);
    out.reverse();
    Ok(out)
}

pub struct EquihashJob {
    job_id: String,
    template: EquihashBlockTemplate,
    block_target: BigUint,
    network_difficulty: f64,
    bits: u32,
    prev_hash: [u8; 32],
    merkle_root: [u8; 32],
    reserved: [u8; 32],
    solution_size: usize,
    solution_prefix: Vec<u8>,
    solver: Arc<dyn SolutionVerifier>,
    header_hasher: Sha256d,
    submissions: SubmissionRegistry,
    coinbase_bytes: Vec<u8>,
    transaction_bytes: Vec<Vec<u8>>,
    block_reward: Option<f64>,
}

impl EquihashJob {
    pub fn new(
        template: EquihashBlockTemplate,
        job_id: String,
        solution_size: usize,
        solver: Arc<dyn SolutionVerifier>,
    ) -> anyhow::Result<Self> {
        let bits = u32::from_str_radix(template.bits.trim_start_matches("0x"), 16)
            .map_err(|e| anyhow::anyhow!("bad bits in template: {e}"))?;
        let block_target = crate::difficulty::compact_to_target(bits);
        if block_target.is_zero() {
            anyhow::bail!("template bits {bits:#x} decode to an invalid target");
        }
        let network_difficulty = target_to_difficulty(diff1(), &block_target);

        let header_hasher = Sha256d;
        let prev_hash = internal_bytes(&template.previous_block_hash, "previous block hash")?;
        let reserved = match &template.final_sapling_root_hash {
            Some(root) => internal_bytes(root, "final sapling root")?,
            None => [0u8; 32],
        };

        let coinbase_bytes = hex::decode(&template.coinbase_txn.data)
            .map_err(|e| anyhow::anyhow!("bad coinbase data: {e}"))?;
        let mut txids = vec![internal_bytes(&template.coinbase_txn.hash, "coinbase hash")?];
        let mut transaction_bytes = Vec::with_capacity(template.transactions.len());
        for tx in &template.transactions {
            txids.push(internal_bytes(&tx.hash, "transaction hash")?);
            transaction_bytes
                .push(hex::decode(&tx.data).map_err(|e| anyhow::anyhow!("bad tx data: {e}"))?);
        }
        let merkle_root = merkle_root(&header_hasher, txids);

        let block_reward = template.subsidy.as_ref().map(|s| s.miner);

        Ok(Self {
            job_id,
            template,
            block_target,
            network_difficulty,
            bits,
            prev_hash,
            merkle_root,
            reserved,
            solution_size,
            solution_prefix: var_int(solution_size as u64),
            solver,
            header_hasher,
            submissions: SubmissionRegistry::new(),
            coinbase_bytes,
            transaction_bytes,
            block_reward,
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

    /// mining.notify params; every multi-byte field is sent in the
    /// byte-reversed (wire) order miners expect.
    pub fn job_params(&self, clean_jobs: bool) -> Value {
        json!([
            self.job_id,
            hex::encode(self.template.version.to_le_bytes()),
            hex::encode(self.prev_hash),
            hex::encode(self.merkle_root),
            hex::encode(self.reserved),
            hex::encode(self.template.cur_time.to_le_bytes()),
            hex::encode(self.bits.to_le_bytes()),
            clean_jobs,
        ])
    }

    /// 140-byte block header for a given nonce.
    fn serialize_header(&self, nonce: &[u8; 32]) -> [u8; 140] {
        let mut out = [0u8; 140];
        out[0..4].copy_from_slice(&self.template.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..100].copy_from_slice(&self.reserved);
        out[100..104].copy_from_slice(&self.template.cur_time.to_le_bytes());
        out[104..108].copy_from_slice(&self.bits.to_le_bytes());
        out[108..140].copy_from_slice(nonce);
        out
    }

    /// header ‖ solution ‖ varint(tx count) ‖ coinbase ‖ transactions.
    fn serialize_block(&self, header: &[u8; 140], solution: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            140 + solution.len()
                + 9
                + self.coinbase_bytes.len()
                + self.transaction_bytes.iter().map(Vec::len).sum::<usize>(),
        );
        out.extend_from_slice(header);
        out.extend_from_slice(solution);
        out.extend_from_slice(&var_int(1 + self.transaction_bytes.len() as u64));
        out.extend_from_slice(&self.coinbase_bytes);
        for tx in &self.transaction_bytes {
            out.extend_from_slice(tx);
        }
        out
    }

    pub fn process_share(
        &self,
        worker: &WorkerSnapshot,
        ntime: &str,
        extranonce2: &str,
        solution: &str,
    ) -> Result<(Share, Option<String>), ShareError> {
        if ntime.len() != NTIME_LENGTH || !is_hex(ntime) {
            return Err(ShareError::Invalid("incorrect size of ntime".to_string()));
        }

        let expected_en2 = NONCE_LENGTH.saturating_sub(worker.extranonce1.len());
        if extranonce2.len() != expected_en2 || !is_hex(extranonce2) {
            return Err(ShareError::Invalid(
                "incorrect size of extranonce2".to_string(),
            ));
        }

        let expected_solution = (self.solution_prefix.len() + self.solution_size) * 2;
        if solution.len() != expected_solution || !is_hex(solution) {
            return Err(ShareError::Invalid("incorrect size of solution".to_string()));
        }

        // The job's timestamp is authoritative: miners echo it back exactly.
        let ntime_value = u32::from_str_radix(ntime, 16)
            .map_err(|_| ShareError::Invalid("incorrect size of ntime".to_string()))?;
        if ntime_value != self.template.cur_time {
            return Err(ShareError::Invalid("ntime out of range".to_string()));
        }

        let nonce = format!("{}{}", worker.extranonce1, extranonce2);

        if !self.submissions.try_register(&format!("{nonce}{solution}")) {
            return Err(ShareError::Duplicate);
        }

        let mut nonce_bytes = [0u8; 32];
        // Both halves hex-validated above.
        hex::decode_to_slice(&nonce, &mut nonce_bytes)
            .map_err(|_| ShareError::Invalid("incorrect size of extranonce2".to_string()))?;

        let solution_bytes =
            hex::decode(solution).map_err(|_| ShareError::Invalid("invalid solution".to_string()))?;
        if solution_bytes[..self.solution_prefix.len()] != self.solution_prefix[..] {
            return Err(ShareError::Invalid("invalid solution".to_string()));
        }

        let header = self.serialize_header(&nonce_bytes);
        if !self
            .solver
            .verify(&header, &solution_bytes[self.solution_prefix.len()..])
        {
            return Err(ShareError::Invalid("invalid solution".to_string()));
        }

        let mut preimage = Vec::with_capacity(140 + solution_bytes.len());
        preimage.extend_from_slice(&header);
        preimage.extend_from_slice(&solution_bytes);
        let digest = self.header_hasher.digest(&preimage);
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
            block_reward: self.block_reward,
            created: Utc::now(),
        };

        if is_block_candidate {
            let mut reversed = digest;
            reversed.reverse();
            share.block_hash = Some(hex::encode(reversed));
            let block_hex = hex::encode(self.serialize_block(&header, &solution_bytes));
            return Ok((share, Some(block_hex)));
        }

        Ok((share, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::templates::{EquihashCoinbaseTransaction, TemplateTransaction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AcceptAll;
    impl SolutionVerifier for AcceptAll {
        fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
            true
        }
    }

    struct Counting(AtomicUsize);
    impl SolutionVerifier for Counting {
        fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    /// 8-byte solutions keep the test fixtures readable.
    const SOLUTION_SIZE: usize = 8;

    fn template(bits: &str) -> EquihashBlockTemplate {
        EquihashBlockTemplate {
            version: 4,
            previous_block_hash: "00".repeat(32),
            cur_time: 0x5f5e1000,
            bits: bits.to_string(),
            height: 500_000,
            coinbase_txn: EquihashCoinbaseTransaction {
                data: "0400008085202f89".to_string(),
                hash: "aa".repeat(32),
                fee: 0.0,
            },
            transactions: vec![TemplateTransaction {
                data: "beef".to_string(),
                hash: "bb".repeat(32),
            }],
            final_sapling_root_hash: None,
            subsidy: Some(crate::blockchain::templates::ZcashSubsidy { miner: 2.5 }),
        }
    }

    fn job(bits: &str) -> EquihashJob {
        EquihashJob::new(template(bits), "2".to_string(), SOLUTION_SIZE, Arc::new(AcceptAll))
            .unwrap()
    }

    fn solution_hex(seed: u8) -> String {
        // 1-byte compact-size prefix (0x08) + 8 solution bytes.
        format!("08{}", hex::encode([seed; SOLUTION_SIZE]))
    }

    fn en2(seed: u8) -> String {
        hex::encode([seed; 28])
    }

    #[test]
    fn ntime_must_equal_template_time() {
        let job = job("207fffff");
        let worker = WorkerSnapshot::fixed(0.000001);
        let err = job
            .process_share(&worker, "5f5e1001", &en2(1), &solution_hex(1))
            .unwrap_err();
        assert!(matches!(err, ShareError::Invalid(m) if m.contains("ntime")));
    }

    #[test]
    fn structural_rejection_happens_before_solution_verify() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let job = EquihashJob::new(
            template("207fffff"),
            "2".to_string(),
            SOLUTION_SIZE,
            counting.clone(),
        )
        .unwrap();
        let worker = WorkerSnapshot::fixed(0.000001);

        // Wrong ntime width, wrong extranonce2 width, wrong solution width.
        assert!(job.process_share(&worker, "123", &en2(1), &solution_hex(1)).is_err());
        assert!(job
            .process_share(&worker, "5f5e1000", "abcd", &solution_hex(1))
            .is_err());
        assert!(job
            .process_share(&worker, "5f5e1000", &en2(1), "0812")
            .is_err());

        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_nonce_solution_pair_is_rejected() {
        let job = job("207fffff");
        let worker = WorkerSnapshot::fixed(0.000001);

        let first = job.process_share(&worker, "5f5e1000", &en2(3), &solution_hex(3));
        assert!(first.is_ok(), "{first:?}");
        assert!(matches!(
            job.process_share(&worker, "5f5e1000", &en2(3), &solution_hex(3)),
            Err(ShareError::Duplicate)
        ));
        // Same extranonce2, different solution: a distinct submission.
        assert!(job
            .process_share(&worker, "5f5e1000", &en2(3), &solution_hex(4))
            .is_ok());
    }

    #[test]
    fn rejected_solution_is_an_invalid_share() {
        struct RejectAll;
        impl SolutionVerifier for RejectAll {
            fn verify(&self, _header: &[u8], _solution: &[u8]) -> bool {
                false
            }
        }

        let job = EquihashJob::new(
            template("207fffff"),
            "2".to_string(),
            SOLUTION_SIZE,
            Arc::new(RejectAll),
        )
        .unwrap();
        let worker = WorkerSnapshot::fixed(0.000001);
        let err = job
            .process_share(&worker, "5f5e1000", &en2(1), &solution_hex(1))
            .unwrap_err();
        assert!(matches!(err, ShareError::Invalid(m) if m.contains("solution")));
    }

    #[test]
    fn wrong_solution_prefix_is_rejected() {
        let job = job("207fffff");
        let worker = WorkerSnapshot::fixed(0.000001);
        let bad = format!("07{}", hex::encode([1u8; SOLUTION_SIZE]));
        let err = job.process_share(&worker, "5f5e1000", &en2(1), &bad).unwrap_err();
        assert!(matches!(err, ShareError::Invalid(_)));
    }

    #[test]
    fn block_candidate_serializes_the_full_block() {
        // Scan extranonce2 values until one hashes under the huge target.
        let job = job("207fffff");
        let worker = WorkerSnapshot::fixed(1e12);

        let mut found = None;
        for seed in 0..64u8 {
            match job.process_share(&worker, "5f5e1000", &en2(seed), &solution_hex(seed)) {
                Ok((share, block_hex)) if share.is_block_candidate => {
                    found = Some((share, block_hex));
                    break;
                }
                _ => continue,
            }
        }

        let (share, block_hex) = found.expect("no candidate in scan range");
        assert!(share.is_block_candidate);
        assert_eq!(share.block_reward, Some(2.5));
        let block_hex = block_hex.expect("candidates carry block hex");
        let block = hex::decode(block_hex).unwrap();

        // header + solution + varint + coinbase + one transaction.
        let expected_len = 140 + 1 + SOLUTION_SIZE + 1 + 8 + 2;
        assert_eq!(block.len(), expected_len);
        assert_eq!(block[140], 0x08);
        assert_eq!(block[140 + 1 + SOLUTION_SIZE], 0x02); // tx count
    }

    #[test]
    fn low_difficulty_share_is_rejected() {
        // Target 3: nothing is a candidate, every share difficulty is tiny.
        let job = job("01030000");
        let worker = WorkerSnapshot::fixed(1000.0);
        let err = job
            .process_share(&worker, "5f5e1000", &en2(9), &solution_hex(9))
            .unwrap_err();
        assert!(matches!(err, ShareError::LowDifficulty(_)));
    }

    #[test]
    fn merkle_root_folds_pairwise() {
        let hasher = Sha256d;
        let single = merkle_root(&hasher, vec![[7u8; 32]]);
        assert_eq!(single, [7u8; 32]);

        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&a);
        buf[32..].copy_from_slice(&b);
        assert_eq!(merkle_root(&hasher, vec![a, b]), hasher.digest(&buf));

        // Odd levels duplicate the trailing txid.
        let odd = merkle_root(&hasher, vec![a, b, a]);
        let even = merkle_root(&hasher, vec![a, b, a, a]);
        assert_eq!(odd, even);
    }

    #[test]
    fn var_int_boundaries() {
        assert_eq!(var_int(0xfc), vec![0xfc]);
        assert_eq!(var_int(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(var_int(1344), vec![0xfd, 0x40, 0x05]);
        assert_eq!(var_int(0x10000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn notify_params_use_wire_byte_order() {
        let job = job("1d00ffff");
        let params = job.job_params(true);
        let arr = params.as_array().unwrap();
        assert_eq!(arr.len(), 8);
        assert_eq!(arr[1].as_str().unwrap(), "04000000"); // version 4, LE
        assert_eq!(arr[6].as_str().unwrap(), "ffff001d"); // bits, LE
        assert_eq!(arr[7], true);
    }
}
