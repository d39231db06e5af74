/// Job lifecycle and the shared share-validation contract
///
/// A Job is built once from a block template and immutable afterwards; only
/// its duplicate-submission registry grows. Validation is synchronous
/// CPU-bound work operating on an immutable snapshot of the worker's state.

pub mod beam;
pub mod equihash;
pub mod kaspa;
pub mod manager;

pub use manager::{JobManager, JobNotification, PoolJob};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::ShareError;

/// Result of one accepted share, forwarded to the persistence/payment
/// collaborators and echoed in the miner's response.
#[derive(Debug, Clone, Serialize)]
pub struct Share {
    pub block_height: u64,
    pub network_difficulty: f64,
    /// Difficulty the share was accounted at (the connection's difficulty,
    /// or its previous difficulty inside the retarget grace window).
    pub difficulty: f64,
    pub is_block_candidate: bool,
    pub block_hash: Option<String>,
    pub block_reward: Option<f64>,
    pub created: DateTime<Utc>,
}

/// Immutable view of the worker-context fields share validation reads.
/// Taken under the context lock, then used without suspension.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub extranonce1: String,
    pub difficulty: f64,
    pub previous_difficulty: Option<f64>,
    /// True once a vardiff retarget has happened on this connection; arms
    /// the previous-difficulty grace window.
    pub retargeted: bool,
}

impl WorkerSnapshot {
    #[cfg(test)]
    pub fn fixed(difficulty: f64) -> Self {
        Self {
            extranonce1: "0a0b0c0d".to_string(),
            difficulty,
            previous_difficulty: None,
            retargeted: false,
        }
    }
}

/// Per-job duplicate-submission registry.
///
/// The insert is a single atomic test-and-set so two concurrent submissions
/// of the same key can never both appear novel. Keys are case-folded; the
/// registry dies with its job.
pub(crate) struct SubmissionRegistry {
    seen: Mutex<HashSet<String>>,
}

impl SubmissionRegistry {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// True when the key was novel and is now registered.
    pub fn try_register(&self, key: &str) -> bool {
        self.seen.lock().insert(key.to_ascii_lowercase())
    }
}

/// Acceptance decision for a share that already passed structural and
/// consensus checks. Returns the difficulty the share is accounted at.
///
/// Block candidates bypass the ratio check entirely. Otherwise the share
/// must reach 99% of the connection's difficulty, falling back to the
/// previous difficulty if a retarget happened - absorbing the race between a
/// server-initiated retarget and in-flight work computed under the old
/// target. The fallback has no expiry; it stays valid until the next
/// retarget overwrites it.
pub(crate) fn effective_difficulty(
    share_difficulty: f64,
    is_block_candidate: bool,
    worker: &WorkerSnapshot,
) -> Result<f64, ShareError> {
    if is_block_candidate || share_difficulty / worker.difficulty >= 0.99 {
        return Ok(worker.difficulty);
    }

    if worker.retargeted {
        if let Some(previous) = worker.previous_difficulty {
            if share_difficulty / previous >= 0.99 {
                return Ok(previous);
            }
        }
    }

    Err(ShareError::LowDifficulty(share_difficulty))
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_accepts_first_rejects_second() {
        let registry = SubmissionRegistry::new();
        assert!(registry.try_register("deadbeef:sol"));
        assert!(!registry.try_register("deadbeef:sol"));
        // Case variants are the same submission.
        assert!(!registry.try_register("DEADBEEF:SOL"));
    }

    #[test]
    fn registry_is_race_free_under_concurrent_submits() {
        use std::sync::Arc;

        let registry = Arc::new(SubmissionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.try_register("same-key")));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn block_candidate_bypasses_ratio_check() {
        let worker = WorkerSnapshot::fixed(1000.0);
        // Absurdly low share difficulty, but the digest met the block target.
        let accounted = effective_difficulty(0.001, true, &worker).unwrap();
        assert_eq!(accounted, 1000.0);
    }

    #[test]
    fn ratio_must_reach_99_percent() {
        let worker = WorkerSnapshot::fixed(100.0);
        assert!(effective_difficulty(99.0, false, &worker).is_ok());
        assert!(matches!(
            effective_difficulty(98.0, false, &worker),
            Err(ShareError::LowDifficulty(_))
        ));
    }

    #[test]
    fn grace_window_accounts_at_previous_difficulty() {
        let worker = WorkerSnapshot {
            extranonce1: "00".into(),
            difficulty: 50.0,
            previous_difficulty: Some(10.0),
            retargeted: true,
        };
        // 10.2 vs new difficulty 50 fails, but vs previous 10 passes and is
        // accounted at 10.
        let accounted = effective_difficulty(10.2, false, &worker).unwrap();
        assert_eq!(accounted, 10.0);
    }

    #[test]
    fn grace_window_requires_a_retarget() {
        let worker = WorkerSnapshot {
            extranonce1: "00".into(),
            difficulty: 50.0,
            previous_difficulty: Some(10.0),
            retargeted: false,
        };
        assert!(effective_difficulty(10.2, false, &worker).is_err());
    }

    #[test]
    fn grace_window_still_enforces_previous_difficulty() {
        let worker = WorkerSnapshot {
            extranonce1: "00".into(),
            difficulty: 50.0,
            previous_difficulty: Some(10.0),
            retargeted: true,
        };
        assert!(matches!(
            effective_difficulty(5.0, false, &worker),
            Err(ShareError::LowDifficulty(_))
        ));
    }
}
