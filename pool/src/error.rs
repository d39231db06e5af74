/// Error taxonomy for the Stratum core
///
/// Per-share errors never unwind past a connection's dispatch loop: they are
/// translated into JSON-RPC error responses and the connection stays open.
/// Only protocol violations and socket failures terminate a connection.

use thiserror::Error;

/// Rejection reasons for a single share submission.
#[derive(Debug, Clone, Error)]
pub enum ShareError {
    /// Submission referenced a job id this pool no longer recognizes.
    #[error("job '{0}' not found")]
    Stale(String),

    /// The (nonce, solution) tuple was already submitted against this job.
    #[error("duplicate share")]
    Duplicate,

    /// Share difficulty below the connection's (and grace-window) difficulty.
    #[error("low difficulty share ({0})")]
    LowDifficulty(f64),

    /// Malformed submission field (wrong length / not hex / bad solution).
    #[error("{0}")]
    Invalid(String),

    /// Submit from a worker that never authorized.
    #[error("unauthorized worker")]
    Unauthorized,

    /// Submit from a connection that never subscribed.
    #[error("not subscribed")]
    NotSubscribed,

    #[error("{0}")]
    Other(String),
}

impl ShareError {
    /// Wire code for the generic Stratum dialect (mining.subscribe family).
    pub fn stratum_code(&self) -> i32 {
        match self {
            ShareError::Other(_) | ShareError::Invalid(_) => 20,
            ShareError::Stale(_) => 21,
            ShareError::Duplicate => 22,
            ShareError::LowDifficulty(_) => 23,
            ShareError::Unauthorized => 24,
            ShareError::NotSubscribed => 25,
        }
    }

    /// Wire code for the Beam dialect (login/solution family).
    pub fn beam_code(&self) -> i32 {
        match self {
            ShareError::Stale(_) => -32008,
            ShareError::Duplicate => -32006,
            ShareError::LowDifficulty(_) => -32009,
            ShareError::Invalid(msg) if msg.contains("nonce") => -32007,
            ShareError::Invalid(_) => -32004,
            ShareError::Unauthorized | ShareError::NotSubscribed => -32003,
            ShareError::Other(_) => -32008,
        }
    }
}

/// Template-source failure. Pauses job rotation while the existing job
/// keeps serving; retried with backoff and never surfaced to miners.
#[derive(Debug, Error)]
#[error("upstream unavailable: {0}")]
pub struct UpstreamUnavailable(pub String);

/// Connection-fatal conditions. Anything carrying this error tears down the
/// offending connection only; other connections and the shared job are
/// untouched.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("method '{0}' not allowed before authorization")]
    UnknownMethodPreAuth(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
