/// Block-template snapshots per coin family
///
/// Templates are opaque upstream state: parsed once, then owned immutably by
/// the Job built from them. Field names follow the daemons' JSON.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::config::CoinFamily;

#[derive(Debug, Clone)]
pub enum BlockTemplate {
    Equihash(EquihashBlockTemplate),
    Kaspa(KaspaBlockTemplate),
    Beam(BeamBlockTemplate),
}

impl BlockTemplate {
    pub fn parse(family: CoinFamily, value: &Value) -> Result<Self> {
        match family {
            CoinFamily::Equihash => Ok(Self::Equihash(
                serde_json::from_value(value.clone()).context("invalid equihash template")?,
            )),
            CoinFamily::Kaspa => Ok(Self::Kaspa(
                serde_json::from_value(value.clone()).context("invalid kaspa template")?,
            )),
            CoinFamily::Beam => Ok(Self::Beam(
                serde_json::from_value(value.clone()).context("invalid beam template")?,
            )),
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            Self::Equihash(t) => t.height,
            Self::Kaspa(t) => t.header.daa_score,
            Self::Beam(t) => t.height,
        }
    }

    /// Identity used for change detection between polls.
    pub fn ident(&self) -> String {
        match self {
            Self::Equihash(t) => format!("{}:{}", t.height, t.previous_block_hash),
            Self::Kaspa(t) => format!(
                "{}:{}:{}",
                t.header.daa_score, t.header.hash_merkle_root, t.header.timestamp
            ),
            Self::Beam(t) => format!("{}:{}", t.height, t.input),
        }
    }
}

/// ZCash-family `getblocktemplate` response (subset the job consumes).
#[derive(Debug, Clone, Deserialize)]
pub struct EquihashBlockTemplate {
    pub version: u32,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    #[serde(rename = "curtime")]
    pub cur_time: u32,
    pub bits: String,
    pub height: u64,
    /// Daemon-assembled coinbase (the pool requests the `coinbasetxn`
    /// capability; output construction stays upstream).
    #[serde(rename = "coinbasetxn")]
    pub coinbase_txn: EquihashCoinbaseTransaction,
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    #[serde(default, rename = "finalsaplingroothash")]
    pub final_sapling_root_hash: Option<String>,
    #[serde(default)]
    pub subsidy: Option<ZcashSubsidy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquihashCoinbaseTransaction {
    pub data: String,
    pub hash: String,
    #[serde(default)]
    pub fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTransaction {
    pub data: String,
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZcashSubsidy {
    #[serde(default)]
    pub miner: f64,
}

/// Kaspad `getBlockTemplate` block (header portion; transactions ride along
/// opaquely for submission).
#[derive(Debug, Clone, Deserialize)]
pub struct KaspaBlockTemplate {
    pub header: KaspaBlockHeader,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaspaBlockHeader {
    pub version: u16,
    #[serde(default)]
    pub parents: Vec<KaspaParentLevel>,
    pub hash_merkle_root: String,
    pub accepted_id_merkle_root: String,
    pub utxo_commitment: String,
    pub timestamp: u64,
    pub bits: u32,
    #[serde(default)]
    pub nonce: u64,
    pub daa_score: u64,
    pub blue_score: u64,
    pub blue_work: String,
    pub pruning_point: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaspaParentLevel {
    pub parent_hashes: Vec<String>,
}

/// Beam mining-job input as served by the wallet stratum API.
#[derive(Debug, Clone, Deserialize)]
pub struct BeamBlockTemplate {
    /// 32-byte PoW input, hex.
    pub input: String,
    pub height: u64,
    /// Packed difficulty (mantissa | order << 24).
    pub difficulty: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equihash_template_parses_daemon_fields() {
        let value = json!({
            "version": 4,
            "previousblockhash": "00000000018cc0f84eb8a96a6e732ed4536e44a6c35b1d64974f6eb23b4743a4",
            "curtime": 1713523200u32,
            "bits": "1d00ffff",
            "height": 2_400_000u64,
            "coinbasetxn": { "data": "0400008085202f89", "hash": "ab".repeat(32), "fee": 0.0 },
            "transactions": [],
            "finalsaplingroothash": "3e".repeat(32),
        });
        let template = BlockTemplate::parse(CoinFamily::Equihash, &value).unwrap();
        assert_eq!(template.height(), 2_400_000);
        match template {
            BlockTemplate::Equihash(t) => {
                assert_eq!(t.bits, "1d00ffff");
                assert!(t.final_sapling_root_hash.is_some());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn kaspa_template_parses_camel_case_header() {
        let value = json!({
            "header": {
                "version": 1,
                "parents": [{ "parentHashes": ["11".repeat(32)] }],
                "hashMerkleRoot": "22".repeat(32),
                "acceptedIdMerkleRoot": "33".repeat(32),
                "utxoCommitment": "44".repeat(32),
                "timestamp": 1_713_523_200_000u64,
                "bits": 0x207fffffu32,
                "daaScore": 1234u64,
                "blueScore": 1200u64,
                "blueWork": "1b2d",
                "pruningPoint": "55".repeat(32),
            },
            "transactions": [],
        });
        let template = BlockTemplate::parse(CoinFamily::Kaspa, &value).unwrap();
        assert_eq!(template.height(), 1234);
    }

    #[test]
    fn template_ident_changes_with_refresh() {
        let mk = |ts: u64| {
            BlockTemplate::parse(
                CoinFamily::Kaspa,
                &json!({
                    "header": {
                        "version": 1,
                        "parents": [],
                        "hashMerkleRoot": "22".repeat(32),
                        "acceptedIdMerkleRoot": "33".repeat(32),
                        "utxoCommitment": "44".repeat(32),
                        "timestamp": ts,
                        "bits": 0x207fffffu32,
                        "daaScore": 1234u64,
                        "blueScore": 1200u64,
                        "blueWork": "1b2d",
                        "pruningPoint": "55".repeat(32),
                    },
                }),
            )
            .unwrap()
        };
        // Same height, refreshed timestamp: still a new job identity.
        assert_ne!(mk(1000).ident(), mk(2000).ident());
    }

    #[test]
    fn missing_fields_are_an_error() {
        let value = json!({ "height": 1 });
        assert!(BlockTemplate::parse(CoinFamily::Beam, &value).is_err());
    }
}
