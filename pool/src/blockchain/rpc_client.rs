/// Thin JSON-RPC client for the upstream block-template daemon
///
/// Only the template fetch lives here; coin-specific RPC surfaces (wallet,
/// submission, explorers) are separate services.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::CoinFamily;
use crate::error::UpstreamUnavailable;

pub struct DaemonClient {
    url: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        tracing::info!("daemon client initialized: {}", url);
        Ok(Self { url, client })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| UpstreamUnavailable(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamUnavailable(e.to_string()))?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(anyhow!("daemon error for '{}': {}", method, err));
        }

        body.get("result")
            .filter(|r| !r.is_null())
            .cloned()
            .ok_or_else(|| anyhow!("daemon returned no result for '{}'", method))
    }

    /// Fetch the current block template. `extra_params` is forwarded verbatim
    /// when configured (capabilities, pay address, ...).
    pub async fn get_block_template(
        &self,
        family: CoinFamily,
        extra_params: Option<&Value>,
    ) -> Result<Value> {
        let (method, default_params) = match family {
            CoinFamily::Equihash => (
                "getblocktemplate",
                json!([{ "capabilities": ["coinbasetxn", "workid", "coinbase/append"] }]),
            ),
            CoinFamily::Kaspa => ("getBlockTemplate", json!({})),
            CoinFamily::Beam => ("get_block_template", json!({})),
        };

        let params = extra_params.cloned().unwrap_or(default_params);
        let result = self.call(method, params).await?;

        // Kaspad nests the block under "block".
        if family == CoinFamily::Kaspa {
            if let Some(block) = result.get("block") {
                return Ok(block.clone());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_timeout() {
        let client = DaemonClient::new("http://127.0.0.1:8232".to_string(), Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
