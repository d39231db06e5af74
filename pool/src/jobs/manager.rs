/// JobManager - rotates jobs on fresh templates and fans out notifications
///
/// The current job is swapped behind a lock that readers only hold long
/// enough to clone an Arc; in-flight validations keep whichever job they
/// captured. A short ring of superseded jobs stays valid so submissions that
/// raced a rotation are not rejected as stale.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use forgepool_hashing::{EquihashVerifier, SolutionVerifier};

use super::beam::BeamJob;
use super::equihash::EquihashJob;
use super::kaspa::{KaspaHashers, KaspaJob};
use crate::blockchain::BlockTemplate;
use crate::config::{CoinFamily, Config, KaspaSettings, KaspaVariant};

/// Superseded jobs still accepted for in-flight shares.
const MAX_ACTIVE_JOBS: usize = 8;

#[derive(Clone)]
pub enum PoolJob {
    Equihash(Arc<EquihashJob>),
    Kaspa(Arc<KaspaJob>),
    Beam(Arc<BeamJob>),
}

impl PoolJob {
    pub fn id(&self) -> &str {
        match self {
            Self::Equihash(j) => j.job_id(),
            Self::Kaspa(j) => j.job_id(),
            Self::Beam(j) => j.job_id(),
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            Self::Equihash(j) => j.height(),
            Self::Kaspa(j) => j.height(),
            Self::Beam(j) => j.height(),
        }
    }

    pub fn network_difficulty(&self) -> f64 {
        match self {
            Self::Equihash(j) => j.network_difficulty(),
            Self::Kaspa(j) => j.network_difficulty(),
            Self::Beam(j) => j.network_difficulty(),
        }
    }

    /// Complete server-initiated notify message in this family's dialect.
    /// Beam folds the connection's difficulty into the job itself; the
    /// mining dialects carry it in a separate set-difficulty message.
    pub fn notify_message(&self, clean_jobs: bool, connection_difficulty: f64) -> Value {
        match self {
            Self::Equihash(j) => json!({
                "id": Value::Null,
                "method": "mining.notify",
                "params": j.job_params(clean_jobs),
            }),
            Self::Kaspa(j) => json!({
                "id": Value::Null,
                "method": "mining.notify",
                "params": j.job_params(clean_jobs),
            }),
            Self::Beam(j) => j.notify_message(connection_difficulty),
        }
    }
}

/// Builds family-specific jobs from parsed templates. Solution verifiers are
/// constructed once and shared by every job.
pub struct JobFactory {
    family: CoinFamily,
    equihash_solution_size: usize,
    equihash_solver: Arc<dyn SolutionVerifier>,
    beam_solver: Arc<dyn SolutionVerifier>,
    kaspa: KaspaSettings,
}

impl JobFactory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            family: config.coin,
            equihash_solution_size: config.equihash.solution_size,
            equihash_solver: Arc::new(EquihashVerifier::new(config.equihash.n, config.equihash.k, 32)),
            beam_solver: Arc::new(EquihashVerifier::new(config.beam.n, config.beam.k, 8)),
            kaspa: config.kaspa.clone(),
        }
    }

    /// Swap in external solver implementations (e.g. native bindings).
    pub fn with_solvers(
        mut self,
        equihash: Arc<dyn SolutionVerifier>,
        beam: Arc<dyn SolutionVerifier>,
    ) -> Self {
        self.equihash_solver = equihash;
        self.beam_solver = beam;
        self
    }

    pub fn family(&self) -> CoinFamily {
        self.family
    }

    pub fn build(&self, template: BlockTemplate, job_id: String) -> anyhow::Result<PoolJob> {
        match template {
            BlockTemplate::Equihash(t) => Ok(PoolJob::Equihash(Arc::new(EquihashJob::new(
                t,
                job_id,
                self.equihash_solution_size,
                self.equihash_solver.clone(),
            )?))),
            BlockTemplate::Kaspa(t) => {
                let hashers = match self.kaspa.variant {
                    KaspaVariant::Kaspa => KaspaHashers::kaspa(),
                    KaspaVariant::Karlsencoin => KaspaHashers::karlsencoin(),
                    KaspaVariant::Pyrin => {
                        KaspaHashers::pyrin(t.header.daa_score, self.kaspa.blake3_fork_height)
                    }
                };
                Ok(PoolJob::Kaspa(Arc::new(KaspaJob::new(t, job_id, hashers)?)))
            }
            BlockTemplate::Beam(t) => Ok(PoolJob::Beam(Arc::new(BeamJob::new(
                t,
                job_id,
                self.beam_solver.clone(),
            )?))),
        }
    }
}

#[derive(Clone)]
pub struct JobNotification {
    pub job: PoolJob,
    pub clean_jobs: bool,
}

pub struct JobManager {
    factory: JobFactory,
    job_counter: AtomicU64,
    current: RwLock<Option<PoolJob>>,
    recent: RwLock<VecDeque<PoolJob>>,
    notify_tx: broadcast::Sender<JobNotification>,
}

impl JobManager {
    pub fn new(factory: JobFactory) -> Self {
        let (notify_tx, _) = broadcast::channel(16);
        Self {
            factory,
            job_counter: AtomicU64::new(0),
            current: RwLock::new(None),
            recent: RwLock::new(VecDeque::new()),
            notify_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.notify_tx.subscribe()
    }

    fn next_job_id(&self) -> String {
        format!("{:x}", self.job_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Build a job from a fresh template and make it current. Miners are
    /// told to discard in-flight work only when the height advanced; a
    /// same-height refresh keeps their work valid.
    pub async fn rotate(&self, template: BlockTemplate) -> anyhow::Result<String> {
        let clean_jobs = {
            let current = self.current.read().await;
            current
                .as_ref()
                .map(|job| job.height() != template.height())
                .unwrap_or(true)
        };

        let job_id = self.next_job_id();
        let job = self.factory.build(template, job_id.clone())?;

        {
            let mut current = self.current.write().await;
            if let Some(old) = current.take() {
                let mut recent = self.recent.write().await;
                recent.push_front(old);
                recent.truncate(MAX_ACTIVE_JOBS);
            }
            *current = Some(job.clone());
        }

        let _ = self.notify_tx.send(JobNotification { job, clean_jobs });
        Ok(job_id)
    }

    pub async fn current_job(&self) -> Option<PoolJob> {
        self.current.read().await.clone()
    }

    /// Resolve a submitted job id against the current job and the
    /// stale-but-known ring.
    pub async fn find_job(&self, job_id: &str) -> Option<PoolJob> {
        {
            let current = self.current.read().await;
            if let Some(job) = current.as_ref() {
                if job.id() == job_id {
                    return Some(job.clone());
                }
            }
        }

        let recent = self.recent.read().await;
        recent.iter().find(|job| job.id() == job_id).cloned()
    }
}
