use serde::Deserialize;

use crate::vardiff::VarDiffConfig;

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinFamily {
    Equihash,
    Kaspa,
    Beam,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KaspaVariant {
    #[default]
    Kaspa,
    Karlsencoin,
    Pyrin,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    pub coin: CoinFamily,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub vardiff: VarDiffConfig,

    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub equihash: EquihashSettings,

    #[serde(default)]
    pub kaspa: KaspaSettings,

    #[serde(default)]
    pub beam: BeamSettings,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.vardiff.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.pool.initial_difficulty <= 0.0 {
            anyhow::bail!("pool.initial_difficulty must be positive");
        }
        if self.pool.extranonce1_size == 0 || self.pool.extranonce1_size > 8 {
            anyhow::bail!("pool.extranonce1_size must be 1..=8 bytes");
        }
        if self.vardiff.min_difficulty > self.vardiff.max_difficulty {
            anyhow::bail!("vardiff.min_difficulty exceeds vardiff.max_difficulty");
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct PoolSettings {
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: f64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    /// Read-loop inactivity timeout, seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
    /// Bytes of per-connection extranonce prefix.
    #[serde(default = "default_extranonce1_size")]
    pub extranonce1_size: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_difficulty: default_initial_difficulty(),
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
            client_timeout_secs: default_client_timeout_secs(),
            extranonce1_size: default_extranonce1_size(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UpstreamSettings {
    /// JSON-RPC endpoint of the coin daemon / wallet serving block templates.
    pub rpc_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra params forwarded verbatim with the template request (e.g.
    /// getblocktemplate capabilities, pay address).
    #[serde(default)]
    pub template_params: Option<serde_json::Value>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct EquihashSettings {
    #[serde(default = "default_equihash_n")]
    pub n: u32,
    #[serde(default = "default_equihash_k")]
    pub k: u32,
    /// Raw solution size in bytes, before the compact-size length prefix.
    #[serde(default = "default_equihash_solution_size")]
    pub solution_size: usize,
}

impl Default for EquihashSettings {
    fn default() -> Self {
        Self {
            n: default_equihash_n(),
            k: default_equihash_k(),
            solution_size: default_equihash_solution_size(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct KaspaSettings {
    #[serde(default)]
    pub variant: KaspaVariant,
    /// Pyrin switches its hasher set at this height.
    #[serde(default)]
    pub blake3_fork_height: Option<u64>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BeamSettings {
    #[serde(default = "default_beam_n")]
    pub n: u32,
    #[serde(default = "default_beam_k")]
    pub k: u32,
}

impl Default for BeamSettings {
    fn default() -> Self {
        Self {
            n: default_beam_n(),
            k: default_beam_k(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3333".to_string()
}
fn default_initial_difficulty() -> f64 {
    1.0
}
fn default_max_connections() -> usize {
    10_000
}
fn default_max_connections_per_ip() -> usize {
    10
}
fn default_client_timeout_secs() -> u64 {
    600
}
fn default_extranonce1_size() -> usize {
    4
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_equihash_n() -> u32 {
    200
}
fn default_equihash_k() -> u32 {
    9
}
fn default_equihash_solution_size() -> usize {
    1344
}
fn default_beam_n() -> u32 {
    150
}
fn default_beam_k() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let raw = r#"
            coin = "kaspa"

            [upstream]
            rpc_url = "http://127.0.0.1:16110"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.coin, CoinFamily::Kaspa);
        assert_eq!(config.listen, "0.0.0.0:3333");
        assert_eq!(config.pool.extranonce1_size, 4);
        assert_eq!(config.kaspa.variant, KaspaVariant::Kaspa);
        assert_eq!(config.vardiff.target_share_secs, 15);
    }

    #[test]
    fn family_sections_override_defaults() {
        let raw = r#"
            coin = "equihash"
            listen = "127.0.0.1:3334"

            [pool]
            initial_difficulty = 16.0

            [equihash]
            n = 144
            k = 5
            solution_size = 100

            [upstream]
            rpc_url = "http://127.0.0.1:8232"
            poll_interval_secs = 5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.equihash.n, 144);
        assert_eq!(config.equihash.solution_size, 100);
        assert_eq!(config.pool.initial_difficulty, 16.0);
        assert_eq!(config.upstream.poll_interval_secs, 5);
    }

    #[test]
    fn unknown_family_is_rejected() {
        let raw = r#"
            coin = "scrypt"

            [upstream]
            rpc_url = "http://127.0.0.1:9999"
        "#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }
}
