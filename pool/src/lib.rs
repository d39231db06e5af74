pub mod blockchain;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod stratum;
pub mod vardiff;

// NOTE: Persistence, payouts and the HTTP API are separate services; this
// crate emits Share records / block candidates on channels and stops there.
