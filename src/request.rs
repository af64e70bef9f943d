use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use rand::seq::SliceRandom;
use reqwest::{header::USER_AGENT, Client, StatusCode};
use tokio::task::JoinSet;
use tracing::{error, Instrument};

use crate::logging::LogContext;
use crate::proxy::ProxyEndpoint;
use crate::{info_time, Result};

/// Issues a batch of GETs through a single proxy.
///
/// One `Client` is built per engine and shared by every request of every batch it runs,
/// so the whole batch goes out through the same proxy.
#[derive(Debug, Clone)]
pub struct FetchEngine {
    client: Client,
    proxy: ProxyEndpoint,
    user_agents: Arc<[String]>,
    log: LogContext,
}

impl FetchEngine {
    pub fn new(
        proxy: ProxyEndpoint,
        user_agents: &[String],
        timeout: Duration,
        log: LogContext,
    ) -> Result<Self> {
        let client = Client::builder()
            .proxy(proxy.to_reqwest()?)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            proxy,
            user_agents: user_agents.into(),
            log,
        })
    }

    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    /// Fetches every URL concurrently. `result[i]` is the body of `urls[i]` when it answered 200,
    /// `None` otherwise. A failing request never affects its siblings.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<Option<String>> {
        let span = self.log.span().clone();
        async {
            let start_time = Local::now();
            let mut task_set = JoinSet::new();
            for (idx, url) in urls.iter().enumerate() {
                task_set.spawn({
                    // Client uses Arc so we can clone cheaply
                    let client = self.client.clone();
                    let url = url.clone();
                    let user_agent = self.pick_user_agent();

                    async move { (idx, request_page_html(client, &url, user_agent).await) }
                        .instrument(self.log.span().clone())
                });
            }

            // Results land in their own slot, independent of completion order.
            let mut pages = vec![None; urls.len()];
            while let Some(task) = task_set.join_next().await {
                match task {
                    Ok((idx, page)) => pages[idx] = page,
                    Err(e) => error!("Request task failed: {e}"),
                }
            }

            info_time!(
                start_time,
                "Fetched {} of {} pages via {}",
                pages.iter().filter(|p| p.is_some()).count(),
                urls.len(),
                self.proxy
            );
            pages
        }
        .instrument(span)
        .await
    }

    fn pick_user_agent(&self) -> Option<String> {
        self.user_agents.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Requests a page and returns its HTML on a 200, logging anything else.
async fn request_page_html(client: Client, url: &str, user_agent: Option<String>) -> Option<String> {
    let mut req = client.get(url);
    if let Some(user_agent) = user_agent {
        req = req.header(USER_AGENT, user_agent);
    }

    let res = match req.send().await {
        Ok(res) => res,
        Err(e) => {
            error!(url, "Request failed: {e}");
            return None;
        }
    };

    let status = res.status();
    if status != StatusCode::OK {
        error!(
            url,
            status = status.as_u16(),
            "Request failed: {}, message='{}'",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown")
        );
        return None;
    }

    match res.text().await {
        Ok(html) => {
            info_time!("Request successful: {} - {}", url, status.as_u16());
            Some(html)
        }
        Err(e) => {
            error!(url, "Reading the body failed: {e}");
            None
        }
    }
}
