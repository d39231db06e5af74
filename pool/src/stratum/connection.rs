/// Per-connection worker state
///
/// A WorkerContext is created on accept and dropped on disconnect; nothing
/// survives a reconnect (a fresh extranonce1 is issued). The context is
/// owned by its connection task, except `difficulty`/`previous_difficulty`,
/// which the vardiff sweep task also writes - hence the RwLock wrapping at
/// the call sites.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::jobs::WorkerSnapshot;
use crate::vardiff::VarDiffState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state after accept.
    Connected,
    /// After successful subscribe (mining dialect).
    Subscribed,
    /// After successful authorize / login.
    Authorized,
    /// Connection being torn down.
    Disconnecting,
}

/// Hands out per-connection extranonce prefixes. The counter starts at a
/// random point so a pool restart does not replay the same sequence against
/// miners still holding old work.
pub struct ExtraNonceProvider {
    counter: AtomicU64,
    width_bytes: usize,
}

impl ExtraNonceProvider {
    pub fn new(width_bytes: usize) -> Self {
        assert!((1..=8).contains(&width_bytes), "extranonce width out of range");
        Self {
            counter: AtomicU64::new(rand::random::<u64>()),
            width_bytes,
        }
    }

    pub fn next(&self) -> String {
        let value = self.counter.fetch_add(1, Ordering::Relaxed);
        let mask = if self.width_bytes == 8 {
            u64::MAX
        } else {
            (1u64 << (self.width_bytes * 8)) - 1
        };
        format!("{:0width$x}", value & mask, width = self.width_bytes * 2)
    }
}

pub struct WorkerContext {
    /// Unique connection id (uuid).
    pub connection_id: String,

    pub peer_addr: SocketAddr,

    pub state: ConnectionState,

    /// Issued at accept, revealed at subscribe, immutable afterwards.
    pub extranonce1: String,

    /// Current required share difficulty. Written by this connection's task
    /// and by the vardiff sweep.
    pub difficulty: f64,

    /// Previous difficulty, honored by validation for in-flight shares
    /// after a retarget. Overwritten (never expired) by the next retarget.
    pub previous_difficulty: Option<f64>,

    /// Pinned via a `d=N` password hint; disables vardiff.
    pub static_difficulty: bool,

    pub vardiff: VarDiffState,

    pub wallet: Option<String>,
    pub worker_name: Option<String>,
    pub user_agent: Option<String>,

    pub current_job_id: Option<String>,

    pub shares_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,

    last_activity: Instant,
    connected_at: Instant,

    /// Outbound writer queue (server -> miner). FIFO through a single writer
    /// task, which is what guarantees set-difficulty flushes before any
    /// later job notification.
    pub outbound: Option<mpsc::UnboundedSender<String>>,
}

impl WorkerContext {
    pub fn new(
        connection_id: String,
        peer_addr: SocketAddr,
        extranonce1: String,
        difficulty: f64,
    ) -> Self {
        let now = Instant::now();
        Self {
            connection_id,
            peer_addr,
            state: ConnectionState::Connected,
            extranonce1,
            difficulty,
            previous_difficulty: None,
            static_difficulty: false,
            vardiff: VarDiffState::new(),
            wallet: None,
            worker_name: None,
            user_agent: None,
            current_job_id: None,
            shares_submitted: 0,
            shares_accepted: 0,
            shares_rejected: 0,
            last_activity: now,
            connected_at: now,
            outbound: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, ConnectionState::Subscribed | ConnectionState::Authorized)
    }

    pub fn is_authorized(&self) -> bool {
        self.state == ConnectionState::Authorized
    }

    /// Immutable view for the (synchronous) share validators.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            extranonce1: self.extranonce1.clone(),
            difficulty: self.difficulty,
            previous_difficulty: self.previous_difficulty,
            retargeted: self.vardiff.last_update.is_some(),
        }
    }

    /// Move to a new difficulty, keeping the old one for the grace window.
    pub fn apply_retarget(&mut self, new_difficulty: f64) {
        self.previous_difficulty = Some(self.difficulty);
        self.difficulty = new_difficulty;
    }

    pub fn record_share(&mut self, accepted: bool) {
        self.shares_submitted += 1;
        if accepted {
            self.shares_accepted += 1;
        } else {
            self.shares_rejected += 1;
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.shares_submitted == 0 {
            return 0.0;
        }
        self.shares_accepted as f64 / self.shares_submitted as f64
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// wallet.worker, or just the wallet.
    pub fn worker_id(&self) -> Option<String> {
        match (&self.wallet, &self.worker_name) {
            (Some(wallet), Some(worker)) => Some(format!("{wallet}.{worker}")),
            (Some(wallet), None) => Some(wallet.clone()),
            _ => None,
        }
    }
}

/// Static-difficulty password hints: "d=5000", "x,d=5000", "d=5000;foo".
pub fn parse_difficulty_hint(password: &str) -> Option<f64> {
    for part in password.split([',', ';', ' ']) {
        if let Some(v) = part.trim().strip_prefix("d=") {
            if let Ok(n) = v.trim().parse::<f64>() {
                if n.is_finite() && n > 0.0 {
                    return Some(n);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn context() -> WorkerContext {
        WorkerContext::new("test".to_string(), addr(), "0a0b0c0d".to_string(), 8.0)
    }

    #[test]
    fn fresh_connection_is_unsubscribed() {
        let ctx = context();
        assert_eq!(ctx.state, ConnectionState::Connected);
        assert!(!ctx.is_subscribed());
        assert!(!ctx.is_authorized());
        assert_eq!(ctx.shares_submitted, 0);
    }

    #[test]
    fn authorized_implies_subscribed() {
        let mut ctx = context();
        ctx.state = ConnectionState::Authorized;
        assert!(ctx.is_subscribed());
        assert!(ctx.is_authorized());
    }

    #[test]
    fn worker_id_formats() {
        let mut ctx = context();
        assert!(ctx.worker_id().is_none());

        ctx.wallet = Some("t1Maa2u3".to_string());
        assert_eq!(ctx.worker_id(), Some("t1Maa2u3".to_string()));

        ctx.worker_name = Some("rig1".to_string());
        assert_eq!(ctx.worker_id(), Some("t1Maa2u3.rig1".to_string()));
    }

    #[test]
    fn share_tracking() {
        let mut ctx = context();
        ctx.record_share(true);
        ctx.record_share(true);
        ctx.record_share(false);
        assert_eq!(ctx.shares_submitted, 3);
        assert_eq!(ctx.shares_accepted, 2);
        assert_eq!(ctx.shares_rejected, 1);
        assert!((ctx.acceptance_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn snapshot_arms_grace_window_only_after_retarget() {
        let mut ctx = context();
        assert!(!ctx.snapshot().retargeted);
        assert!(ctx.snapshot().previous_difficulty.is_none());

        ctx.vardiff.last_update = Some(Instant::now());
        ctx.apply_retarget(32.0);

        let snapshot = ctx.snapshot();
        assert!(snapshot.retargeted);
        assert_eq!(snapshot.difficulty, 32.0);
        assert_eq!(snapshot.previous_difficulty, Some(8.0));
    }

    #[test]
    fn extranonce_provider_is_unique_and_sized() {
        let provider = ExtraNonceProvider::new(4);
        let a = provider.next();
        let b = provider.next();
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
        assert_ne!(a, b);

        let wide = ExtraNonceProvider::new(8);
        assert_eq!(wide.next().len(), 16);
    }

    #[test]
    fn difficulty_hint_parsing() {
        assert_eq!(parse_difficulty_hint("d=5000"), Some(5000.0));
        assert_eq!(parse_difficulty_hint("x,d=0.5"), Some(0.5));
        assert_eq!(parse_difficulty_hint("d=0"), None);
        assert_eq!(parse_difficulty_hint("password"), None);
        assert_eq!(parse_difficulty_hint(""), None);
    }
}
