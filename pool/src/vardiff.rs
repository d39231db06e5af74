use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VarDiffConfig {
    /// Desired average time between accepted shares, seconds.
    #[serde(default = "default_target_share_secs")]
    pub target_share_secs: u64,
    /// How often to retarget, seconds.
    #[serde(default = "default_retarget_secs")]
    pub retarget_secs: u64,
    /// Ignore small fluctuations; only retarget if deviation exceeds this fraction.
    #[serde(default = "default_variance")]
    pub variance: f64,
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: f64,
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: f64,
}

fn default_target_share_secs() -> u64 {
    15
}
fn default_retarget_secs() -> u64 {
    90
}
fn default_variance() -> f64 {
    0.30
}
fn default_min_difficulty() -> f64 {
    0.01
}
fn default_max_difficulty() -> f64 {
    1e12
}

impl Default for VarDiffConfig {
    fn default() -> Self {
        Self {
            target_share_secs: default_target_share_secs(),
            retarget_secs: default_retarget_secs(),
            variance: default_variance(),
            min_difficulty: default_min_difficulty(),
            max_difficulty: default_max_difficulty(),
        }
    }
}

impl VarDiffConfig {
    pub fn target_share_time(&self) -> Duration {
        Duration::from_secs(self.target_share_secs)
    }

    pub fn retarget_time(&self) -> Duration {
        Duration::from_secs(self.retarget_secs)
    }

    /// Optional env overrides (useful for tests / tuning):
    /// - FORGEPOOL_VARDIFF_TARGET_SHARE_SECS
    /// - FORGEPOOL_VARDIFF_RETARGET_SECS
    /// - FORGEPOOL_VARDIFF_VARIANCE
    /// - FORGEPOOL_VARDIFF_MIN_DIFFICULTY
    /// - FORGEPOOL_VARDIFF_MAX_DIFFICULTY
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FORGEPOOL_VARDIFF_TARGET_SHARE_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.target_share_secs = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("FORGEPOOL_VARDIFF_RETARGET_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.retarget_secs = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("FORGEPOOL_VARDIFF_VARIANCE") {
            if let Ok(n) = v.parse::<f64>() {
                if n.is_finite() && n >= 0.0 {
                    self.variance = n;
                }
            }
        }
        if let Ok(v) = std::env::var("FORGEPOOL_VARDIFF_MIN_DIFFICULTY") {
            if let Ok(n) = v.parse::<f64>() {
                if n.is_finite() && n > 0.0 {
                    self.min_difficulty = n;
                }
            }
        }
        if let Ok(v) = std::env::var("FORGEPOOL_VARDIFF_MAX_DIFFICULTY") {
            if let Ok(n) = v.parse::<f64>() {
                if n.is_finite() {
                    self.max_difficulty = n.max(self.min_difficulty);
                }
            }
        }
    }
}

/// Per-connection retarget window.
///
/// `last_update` doubles as the grace-window marker: the share validator only
/// honors `previous_difficulty` when a retarget has actually happened. There
/// is no expiry — the previous difficulty stays valid until the next
/// retarget overwrites it, tolerating arbitrarily delayed in-flight shares.
#[derive(Debug, Clone)]
pub struct VarDiffState {
    window_start: Instant,
    accepted_since: u64,
    pub last_update: Option<Instant>,
}

/// Idle connections get walked down after this many silent windows.
const IDLE_WINDOWS: u32 = 3;

impl VarDiffState {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            accepted_since: 0,
            last_update: None,
        }
    }

    /// Record a share and optionally retarget difficulty.
    ///
    /// Returns `Some(new_difficulty)` if a retarget occurred and difficulty
    /// changed. The caller is responsible for stashing the old value into the
    /// context's `previous_difficulty` and notifying the miner.
    pub fn on_share(
        &mut self,
        now: Instant,
        accepted: bool,
        current_difficulty: f64,
        cfg: &VarDiffConfig,
    ) -> Option<f64> {
        if accepted {
            self.accepted_since = self.accepted_since.saturating_add(1);
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < cfg.retarget_time() {
            return None;
        }

        // No accepted shares yet: leave the decision to the idle sweep.
        if self.accepted_since == 0 {
            return None;
        }

        let elapsed_secs = elapsed.as_secs_f64().max(0.000_001);
        let avg_share_time = elapsed_secs / (self.accepted_since as f64);
        let target = cfg.target_share_time().as_secs_f64().max(0.000_001);

        let ratio = target / avg_share_time;
        let lower = 1.0 - cfg.variance;
        let upper = 1.0 + cfg.variance;

        self.window_start = now;
        self.accepted_since = 0;

        if ratio >= lower && ratio <= upper {
            return None;
        }

        self.retarget(now, current_difficulty * ratio, current_difficulty, cfg)
    }

    /// Timer-driven evaluation for connections that stopped producing
    /// accepted shares entirely; halves difficulty per sweep until the miner
    /// keeps up again.
    pub fn on_idle(
        &mut self,
        now: Instant,
        current_difficulty: f64,
        cfg: &VarDiffConfig,
    ) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if self.accepted_since > 0 || elapsed < cfg.retarget_time() * IDLE_WINDOWS {
            return None;
        }

        self.window_start = now;
        self.accepted_since = 0;

        self.retarget(now, current_difficulty / 2.0, current_difficulty, cfg)
    }

    fn retarget(
        &mut self,
        now: Instant,
        proposed: f64,
        current_difficulty: f64,
        cfg: &VarDiffConfig,
    ) -> Option<f64> {
        let mut next = proposed;
        if !next.is_finite() || next <= 0.0 {
            next = cfg.min_difficulty;
        }

        let next = next.clamp(cfg.min_difficulty, cfg.max_difficulty);

        if (next - current_difficulty).abs() < f64::EPSILON {
            None
        } else {
            self.last_update = Some(now);
            Some(next)
        }
    }
}

impl Default for VarDiffState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: u64, retarget: u64, variance: f64) -> VarDiffConfig {
        VarDiffConfig {
            target_share_secs: target,
            retarget_secs: retarget,
            variance,
            min_difficulty: 1.0,
            max_difficulty: 1_000_000.0,
        }
    }

    #[test]
    fn vardiff_increases_difficulty_when_shares_too_fast() {
        let cfg = cfg(10, 10, 0.0);
        let mut st = VarDiffState::new();
        let start = st.window_start;
        // 10 accepted shares in 10s => avg 1s, target 10s => ratio 10 => diff increases.
        for i in 0..10 {
            let _ = st.on_share(start + Duration::from_secs(i), true, 100.0, &cfg);
        }
        let next = st.on_share(start + Duration::from_secs(10), true, 100.0, &cfg);
        assert!(next.is_some());
        assert!(next.unwrap() > 100.0);
        assert!(st.last_update.is_some());
    }

    #[test]
    fn vardiff_decreases_difficulty_when_shares_too_slow() {
        let cfg = cfg(10, 20, 0.0);
        let mut st = VarDiffState::new();
        let start = st.window_start;
        // 1 accepted share in 20s => avg 20s, ratio 0.5 => diff decreases.
        let next = st.on_share(start + Duration::from_secs(20), true, 100.0, &cfg);
        assert!(next.is_some());
        assert!(next.unwrap() < 100.0);
    }

    #[test]
    fn vardiff_clamps_to_bounds() {
        let cfg = VarDiffConfig {
            target_share_secs: 10,
            retarget_secs: 10,
            variance: 0.0,
            min_difficulty: 50.0,
            max_difficulty: 150.0,
        };
        let mut st = VarDiffState::new();
        let start = st.window_start;
        for i in 0..100 {
            let _ = st.on_share(start + Duration::from_millis(i * 100), true, 100.0, &cfg);
        }
        let next = st.on_share(start + Duration::from_secs(10), true, 100.0, &cfg);
        assert_eq!(next, Some(150.0));
    }

    #[test]
    fn vardiff_stays_put_inside_variance_band() {
        let cfg = cfg(10, 10, 0.5);
        let mut st = VarDiffState::new();
        let start = st.window_start;
        // 1 share in 12s => ratio 0.83, within +-50% band.
        let next = st.on_share(start + Duration::from_secs(12), true, 100.0, &cfg);
        assert!(next.is_none());
        assert!(st.last_update.is_none());
    }

    #[test]
    fn idle_sweep_halves_difficulty_after_silent_windows() {
        let cfg = cfg(10, 10, 0.0);
        let mut st = VarDiffState::new();
        let start = st.window_start;

        assert!(st.on_idle(start + Duration::from_secs(5), 100.0, &cfg).is_none());
        let next = st.on_idle(start + Duration::from_secs(31), 100.0, &cfg);
        assert_eq!(next, Some(50.0));
    }

    #[test]
    fn idle_sweep_respects_floor() {
        let cfg = cfg(10, 10, 0.0);
        let mut st = VarDiffState::new();
        let start = st.window_start;
        let next = st.on_idle(start + Duration::from_secs(31), 1.5, &cfg);
        assert_eq!(next, Some(1.0));
        // Already at the floor: nothing further to do.
        let next = st.on_idle(start + Duration::from_secs(62), 1.0, &cfg);
        assert!(next.is_none());
    }
}
