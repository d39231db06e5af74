/// Kaspa-family job: heavy-hash share validation over DAG block headers
///
/// The share pipeline is pre-PoW hash -> coinbase serialization ->
/// matrix transform -> heavy hash. Hashers are injected so Karlsencoin
/// (Blake3 coinbase) and Pyrin (all-Blake3 past its fork) reuse the same job.

use chrono::Utc;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::OnceLock;

use forgepool_hashing::{Blake2b, Blake3, CShake256, HashAlgorithm};

use super::{effective_difficulty, is_hex, Share, SubmissionRegistry, WorkerSnapshot};
use crate::blockchain::KaspaBlockTemplate;
use crate::difficulty::{compact_to_target, digest_value, target_to_difficulty};
use crate::error::ShareError;

pub const NONCE_LENGTH: usize = 16;

const COINBASE_BLOCK_HASH: &[u8] = b"BlockHash";
const COINBASE_PROOF_OF_WORK_HASH: &[u8] = b"ProofOfWorkHash";
const COINBASE_HEAVY_HASH: &[u8] = b"HeavyHash";

/// The matrix regeneration loop converges almost immediately for any real
/// pre-PoW hash; the cap turns a degenerate (or adversarial) seed into a
/// template rejection instead of an unbounded spin.
const MATRIX_GENERATION_LIMIT: usize = 64;

fn diff1() -> &'static BigUint {
    static DIFF1: OnceLock<BigUint> = OnceLock::new();
    DIFF1.get_or_init(|| (BigUint::one() << 255u32) - BigUint::one())
}

/// Hasher chain for one Kaspa-family coin.
#[derive(Clone)]
pub struct KaspaHashers {
    pub header: Arc<dyn HashAlgorithm>,
    pub coinbase: Arc<dyn HashAlgorithm>,
    pub share: Arc<dyn HashAlgorithm>,
}

impl KaspaHashers {
    pub fn kaspa() -> Self {
        Self {
            header: Arc::new(Blake2b::keyed(COINBASE_BLOCK_HASH)),
            coinbase: Arc::new(CShake256::new(b"", COINBASE_PROOF_OF_WORK_HASH)),
            share: Arc::new(CShake256::new(b"", COINBASE_HEAVY_HASH)),
        }
    }

    /// Karlsencoin swaps the coinbase hasher for plain Blake3.
    pub fn karlsencoin() -> Self {
        Self {
            coinbase: Arc::new(Blake3::new()),
            ..Self::kaspa()
        }
    }

    /// Pyrin runs all-Blake3 from its fork height onward.
    pub fn pyrin(daa_score: u64, blake3_fork_height: Option<u64>) -> Self {
        match blake3_fork_height {
            Some(fork) if daa_score >= fork => Self {
                header: Arc::new(Blake3::keyed_from_domain(COINBASE_BLOCK_HASH)),
                coinbase: Arc::new(Blake3::new()),
                share: Arc::new(Blake3::new()),
            },
            _ => Self::kaspa(),
        }
    }
}

/// xoshiro256++ seeded from the pre-PoW hash; drives matrix generation.
struct XoShiRo256PlusPlus {
    s: [u64; 4],
}

impl XoShiRo256PlusPlus {
    fn new(pre_pow_hash: &[u8; 32]) -> Self {
        let mut s = [0u64; 4];
        for (i, word) in s.iter_mut().enumerate() {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&pre_pow_hash[i * 8..i * 8 + 8]);
            *word = u64::from_le_bytes(bytes);
        }
        Self { s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = self.s[0]
            .wrapping_add(self.s[3])
            .rotate_left(23)
            .wrapping_add(self.s[0]);
        let t = self.s[1] << 17;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);
        result
    }
}

fn generate_matrix(pre_pow_hash: &[u8; 32]) -> Result<Box<[[u16; 64]; 64]>, ShareError> {
    let mut generator = XoShiRo256PlusPlus::new(pre_pow_hash);

    for _ in 0..MATRIX_GENERATION_LIMIT {
        let mut matrix = Box::new([[0u16; 64]; 64]);
        for row in matrix.iter_mut() {
            for j in (0..64).step_by(16) {
                let val = generator.next_u64();
                for shift in 0..16 {
                    row[j + shift] = ((val >> (4 * shift)) & 0x0f) as u16;
                }
            }
        }
        if compute_rank(&matrix) == 64 {
            return Ok(matrix);
        }
    }

    Err(ShareError::Other(
        "matrix generation failed to reach full rank".to_string(),
    ))
}

fn compute_rank(matrix: &[[u16; 64]; 64]) -> usize {
    const EPS: f64 = 1e-9;
    let mut b: Vec<[f64; 64]> = matrix.iter().map(|row| row.map(f64::from)).collect();
    let mut rank = 0;
    let mut row_selected = [false; 64];

    for i in 0..64 {
        let mut j = 0;
        while j < 64 {
            if !row_selected[j] && b[j][i].abs() > EPS {
                break;
            }
            j += 1;
        }
        if j != 64 {
            rank += 1;
            row_selected[j] = true;
            let pivot = b[j][i];
            for p in i + 1..64 {
                b[j][p] /= pivot;
            }
            for k in 0..64 {
                if k != j && b[k][i].abs() > EPS {
                    for p in i + 1..64 {
                        b[k][p] -= b[j][p] * b[k][i];
                    }
                }
            }
        }
    }

    rank
}

pub struct KaspaJob {
    job_id: String,
    template: KaspaBlockTemplate,
    block_target: BigUint,
    network_difficulty: f64,
    /// Header bytes with nonce and timestamp zeroed; final hashing patches
    /// the two fields in place.
    header_bytes: Vec<u8>,
    timestamp_offset: usize,
    pre_pow_hash: [u8; 32],
    matrix: Box<[[u16; 64]; 64]>,
    hashers: KaspaHashers,
    submissions: SubmissionRegistry,
    notify_params: Value,
}

impl KaspaJob {
    pub fn new(
        template: KaspaBlockTemplate,
        job_id: String,
        hashers: KaspaHashers,
    ) -> anyhow::Result<Self> {
        let block_target = compact_to_target(template.header.bits);
        if block_target.is_zero() {
            anyhow::bail!("template bits {:#x} decode to an invalid target", template.header.bits);
        }
        let network_difficulty = target_to_difficulty(diff1(), &block_target);

        let (header_bytes, timestamp_offset) = Self::build_header_bytes(&template)?;
        let pre_pow_hash = hashers.header.digest(&header_bytes);
        let matrix = generate_matrix(&pre_pow_hash)
            .map_err(|e| anyhow::anyhow!("unusable pre-PoW hash: {e}"))?;

        let notify_params = Self::build_notify_params(&job_id, &pre_pow_hash, template.header.timestamp);

        Ok(Self {
            job_id,
            template,
            block_target,
            network_difficulty,
            header_bytes,
            timestamp_offset,
            pre_pow_hash,
            matrix,
            hashers,
            submissions: SubmissionRegistry::new(),
            notify_params,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn height(&self) -> u64 {
        self.template.header.daa_score
    }

    pub fn network_difficulty(&self) -> f64 {
        self.network_difficulty
    }

    pub fn block_target(&self) -> &BigUint {
        &self.block_target
    }

    /// mining.notify params: job id, the large-job form (pre-PoW hash +
    /// timestamp hex), the four raw u64 words, and the template timestamp.
    pub fn job_params(&self, _clean_jobs: bool) -> Value {
        self.notify_params.clone()
    }

    fn build_notify_params(job_id: &str, pre_pow_hash: &[u8; 32], timestamp: u64) -> Value {
        let mut large = String::with_capacity(64);
        let mut words = [0u64; 4];
        for i in 0..4 {
            let slice = &pre_pow_hash[i * 8..i * 8 + 8];
            large.push_str(&hex::encode(slice));
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(slice);
            words[i] = u64::from_le_bytes(bytes);
        }

        let timestamp_hex = hex::encode(timestamp.to_le_bytes());
        json!([job_id, format!("{large}{timestamp_hex}"), words, timestamp])
    }

    /// Serialized header with nonce/timestamp zeroed (the pre-PoW form); the
    /// offset locates the timestamp so the final hash can patch both fields.
    fn build_header_bytes(template: &KaspaBlockTemplate) -> anyhow::Result<(Vec<u8>, usize)> {
        let h = &template.header;
        let decode = |field: &str, what: &str| -> anyhow::Result<Vec<u8>> {
            hex::decode(field).map_err(|e| anyhow::anyhow!("bad {what} in template: {e}"))
        };

        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&h.version.to_le_bytes());
        buf.extend_from_slice(&(h.parents.len() as u64).to_le_bytes());
        for level in &h.parents {
            buf.extend_from_slice(&(level.parent_hashes.len() as u64).to_le_bytes());
            for parent in &level.parent_hashes {
                buf.extend_from_slice(&decode(parent, "parent hash")?);
            }
        }
        buf.extend_from_slice(&decode(&h.hash_merkle_root, "merkle root")?);
        buf.extend_from_slice(&decode(&h.accepted_id_merkle_root, "accepted-id merkle root")?);
        buf.extend_from_slice(&decode(&h.utxo_commitment, "utxo commitment")?);

        let timestamp_offset = buf.len();
        buf.extend_from_slice(&0u64.to_le_bytes()); // timestamp (pre-PoW: zero)
        buf.extend_from_slice(&h.bits.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // nonce (pre-PoW: zero)
        buf.extend_from_slice(&h.daa_score.to_le_bytes());
        buf.extend_from_slice(&h.blue_score.to_le_bytes());

        let mut blue_work = h.blue_work.clone();
        if blue_work.len() % 2 != 0 {
            blue_work.insert(0, '0');
        }
        let blue_work_bytes = decode(&blue_work, "blue work")?;
        buf.extend_from_slice(&(blue_work_bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(&blue_work_bytes);

        buf.extend_from_slice(&decode(&h.pruning_point, "pruning point")?);

        Ok((buf, timestamp_offset))
    }

    fn header_digest(&self, nonce: u64, timestamp: u64) -> [u8; 32] {
        let mut buf = self.header_bytes.clone();
        let o = self.timestamp_offset;
        buf[o..o + 8].copy_from_slice(&timestamp.to_le_bytes());
        buf[o + 12..o + 20].copy_from_slice(&nonce.to_le_bytes());
        self.hashers.header.digest(&buf)
    }

    fn serialize_coinbase(&self, nonce: u64) -> [u8; 32] {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&self.pre_pow_hash);
        buf.extend_from_slice(&self.template.header.timestamp.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&nonce.to_le_bytes());
        self.hashers.coinbase.digest(&buf)
    }

    /// Matrix transform: nibble-vector product folded back into the data.
    fn compute_coinbase(&self, data: &[u8; 32]) -> [u8; 32] {
        let mut vector = [0u16; 64];
        for i in 0..32 {
            vector[2 * i] = (data[i] >> 4) as u16;
            vector[2 * i + 1] = (data[i] & 0x0f) as u16;
        }

        let mut product = [0u16; 64];
        for i in 0..64 {
            let mut sum: u16 = 0;
            for j in 0..64 {
                sum = sum.wrapping_add(self.matrix[i][j].wrapping_mul(vector[j]));
            }
            product[i] = sum >> 10;
        }

        let mut out = [0u8; 32];
        for i in 0..32 {
            out[i] = data[i] ^ (((product[2 * i] as u8) << 4) | product[2 * i + 1] as u8);
        }
        out
    }

    fn share_value(&self, nonce: u64) -> BigUint {
        let coinbase = self.serialize_coinbase(nonce);
        let transformed = self.compute_coinbase(&coinbase);
        let digest = self.hashers.share.digest(&transformed);
        digest_value(&digest)
    }

    pub fn process_share(
        &self,
        worker: &WorkerSnapshot,
        nonce: &str,
    ) -> Result<Share, ShareError> {
        let mut nonce = nonce.strip_prefix("0x").unwrap_or(nonce).to_string();

        // Short-form nonces get the connection's extranonce prefix, padded
        // out to the full width.
        if nonce.len() <= NONCE_LENGTH.saturating_sub(worker.extranonce1.len()) {
            let mut prefix = worker.extranonce1.clone();
            while prefix.len() < NONCE_LENGTH - nonce.len() {
                prefix.push('0');
            }
            nonce = format!("{prefix}{nonce}");
        }

        if nonce.len() != NONCE_LENGTH || !is_hex(&nonce) {
            return Err(ShareError::Invalid("incorrect size of nonce".to_string()));
        }

        if !self.submissions.try_register(&nonce) {
            return Err(ShareError::Duplicate);
        }

        let nonce_value = u64::from_str_radix(&nonce, 16)
            .map_err(|_| ShareError::Invalid("incorrect size of nonce".to_string()))?;

        let value = self.share_value(nonce_value);
        let share_difficulty = target_to_difficulty(diff1(), &value);
        let is_block_candidate = value <= self.block_target;

        let accounted = effective_difficulty(share_difficulty, is_block_candidate, worker)?;

        let block_hash = is_block_candidate.then(|| {
            hex::encode(self.header_digest(nonce_value, self.template.header.timestamp))
        });

        Ok(Share {
            block_height: self.template.header.daa_score,
            network_difficulty: self.network_difficulty,
            difficulty: accounted,
            is_block_candidate,
            block_hash,
            block_reward: None,
            created: Utc::now(),
        })
    }
}
