/// Block Template Manager - polls the upstream daemon and rotates jobs
///
/// Upstream failures never reach connected miners: the current job keeps
/// serving while the poll loop retries with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use super::rpc_client::DaemonClient;
use super::templates::BlockTemplate;
use crate::config::{CoinFamily, UpstreamSettings};
use crate::jobs::JobManager;
use crate::metrics::prometheus as metrics;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct TemplateManager {
    client: Arc<DaemonClient>,
    family: CoinFamily,
    poll_interval: Duration,
    extra_params: Option<serde_json::Value>,
}

impl TemplateManager {
    pub fn new(family: CoinFamily, upstream: &UpstreamSettings) -> anyhow::Result<Self> {
        let client = DaemonClient::new(
            upstream.rpc_url.clone(),
            Duration::from_secs(upstream.request_timeout_secs),
        )?;

        Ok(Self {
            client: Arc::new(client),
            family,
            poll_interval: Duration::from_secs(upstream.poll_interval_secs),
            extra_params: upstream.template_params.clone(),
        })
    }

    /// Spawn the polling loop. Runs until the process exits; independently
    /// cancellable (dropping the runtime) without touching connections.
    pub fn start(self, jobs: Arc<JobManager>) {
        tokio::spawn(async move {
            let mut last_ident: Option<String> = None;
            let mut failures: u32 = 0;

            loop {
                match self.fetch().await {
                    Ok(template) => {
                        if failures > 0 {
                            tracing::info!("template source recovered after {} failures", failures);
                        }
                        failures = 0;

                        let ident = template.ident();
                        if last_ident.as_deref() != Some(ident.as_str()) {
                            let height = template.height();
                            metrics::inc_template_updates();
                            metrics::set_template_height(height);

                            match jobs.rotate(template).await {
                                Ok(job_id) => {
                                    last_ident = Some(ident);
                                    tracing::info!(
                                        height,
                                        job_id = %job_id,
                                        "new block template"
                                    );
                                }
                                Err(e) => {
                                    tracing::error!("rejecting unusable template: {e:#}");
                                }
                            }
                        }

                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        metrics::inc_template_fetch_errors();

                        let backoff = self
                            .poll_interval
                            .saturating_mul(2u32.saturating_pow(failures.min(5)))
                            .min(MAX_BACKOFF);
                        tracing::warn!(
                            "template fetch failed ({} consecutive): {e:#}; retrying in {:?}",
                            failures,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });
    }

    async fn fetch(&self) -> anyhow::Result<BlockTemplate> {
        let raw = self
            .client
            .get_block_template(self.family, self.extra_params.as_ref())
            .await?;
        BlockTemplate::parse(self.family, &raw)
    }
}
