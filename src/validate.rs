use std::time::Duration;

use chrono::Local;
use reqwest::{Client, StatusCode};
use tokio::task::JoinSet;
use tracing::{error, warn, Instrument};

use crate::logging::LogContext;
use crate::proxy::ProxyEndpoint;
use crate::{info_time, Result};

/// Confirms which candidate proxies actually forward a request.
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    probe_target: String,
    timeout: Duration,
    log: LogContext,
}

impl ProxyValidator {
    pub fn new(probe_target: impl Into<String>, timeout: Duration, log: LogContext) -> Self {
        Self {
            probe_target: probe_target.into(),
            timeout,
            log,
        }
    }

    /// Probes every candidate at once and returns the ones that answered 200.
    /// Waits for all probes; the order of the result is unspecified.
    pub async fn validate(&self, candidates: &[ProxyEndpoint]) -> Vec<ProxyEndpoint> {
        let span = self.log.span().clone();
        async {
            let start_time = Local::now();
            let mut probes = JoinSet::new();
            for candidate in candidates {
                probes.spawn({
                    let proxy = candidate.clone();
                    let target = self.probe_target.clone();
                    let timeout = self.timeout;
                    async move { probe(proxy, &target, timeout).await }
                        .instrument(self.log.span().clone())
                });
            }

            let mut working = Vec::with_capacity(candidates.len());
            while let Some(task) = probes.join_next().await {
                match task {
                    Ok(Some(proxy)) => working.push(proxy),
                    Ok(None) => {}
                    Err(e) => error!("Proxy probe task failed: {e}"),
                }
            }

            info_time!(
                start_time,
                "Validated proxies: {} of {} working",
                working.len(),
                candidates.len()
            );
            working
        }
        .instrument(span)
        .await
    }
}

/// Single GET to `target` through `proxy`. TLS certificates are not verified.
async fn probe(proxy: ProxyEndpoint, target: &str, timeout: Duration) -> Option<ProxyEndpoint> {
    let client = match probe_client(&proxy, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(%proxy, "Proxy {proxy} failed: {e}");
            return None;
        }
    };

    match client.get(target).send().await {
        Ok(res) if res.status() == StatusCode::OK => {
            info_time!("Proxy {} working", proxy);
            Some(proxy)
        }
        Ok(res) => {
            warn!(%proxy, status = res.status().as_u16(), "Proxy {proxy} failed: status {}", res.status());
            None
        }
        Err(e) => {
            error!(%proxy, "Proxy {proxy} failed: {e}");
            None
        }
    }
}

fn probe_client(proxy: &ProxyEndpoint, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .proxy(proxy.to_reqwest()?)
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()?;
    Ok(client)
}
