use std::fmt;
use std::sync::Arc;

use chrono::Local;
use rand::seq::SliceRandom;
use tracing::{info, warn, Instrument};

use crate::config::Settings;
use crate::logging::LogContext;
use crate::parse::{extract_listing_urls, extract_records};
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::request::FetchEngine;
use crate::table::Table;
use crate::validate::ProxyValidator;
use crate::{info_time, Result};

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ProxiesLoaded,
    ProxiesValidated,
    ListingsFetched,
    UrlsExtracted,
    DetailsFetched,
    RecordsExtracted,
    Assembled,
    /// Terminal: no candidate proxy answered the probe.
    NoProxies,
    /// Terminal: every page of a stage failed to fetch.
    NoPages,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Assembled | Stage::NoProxies | Stage::NoPages)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub stage: Stage,
    /// The proxy the page fetches went through, if any fetch was attempted.
    pub proxy: Option<ProxyEndpoint>,
    pub detail_urls: Vec<String>,
    pub table: Table,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            stage: Stage::Init,
            proxy: None,
            detail_urls: Vec::new(),
            table: Table::default(),
        }
    }
}

/// Sequences proxy loading, validation, both fetch stages, parsing and assembly.
///
/// Each stage waits for its whole concurrent batch before the next one starts.
pub struct Pipeline {
    settings: Settings,
    base_url: Arc<str>,
    log: LogContext,
}

impl Pipeline {
    pub fn new(settings: Settings, log: LogContext) -> Self {
        let base_url = settings.scraping.base_url.as_str().into();
        Self {
            settings,
            base_url,
            log,
        }
    }

    /// Runs every stage. Only configuration problems come back as `Err`; running out of proxies
    /// or pages ends the run at a terminal [`Stage`] with an empty table.
    pub async fn run(&self) -> Result<PipelineRun> {
        let span = self.log.span().clone();
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> Result<PipelineRun> {
        let start_time = Local::now();
        let mut run = PipelineRun::new();
        info_time!("Started scraping");

        // Init -> ProxiesLoaded
        let pool = ProxyPool::load(&self.settings.proxy.source)?;
        let candidates = pool.sample(self.settings.proxy.sample_size);
        self.advance(&mut run, Stage::ProxiesLoaded);
        info!("Sampled {} of {} candidate proxies", candidates.len(), pool.len());

        // ProxiesLoaded -> ProxiesValidated
        let validator = self.validator();
        let Some(engine) = self.engine_for(&validator, &candidates).await? else {
            return Ok(self.halt(run, Stage::NoProxies));
        };
        run.proxy = Some(engine.proxy().clone());
        self.advance(&mut run, Stage::ProxiesValidated);

        // ProxiesValidated -> ListingsFetched
        let listing_urls = self.settings.listing_urls();
        let listing_pages = engine.fetch_all(&listing_urls).await;
        info!("Total number of pages: {}", listing_pages.len());
        if listing_pages.iter().all(Option::is_none) {
            return Ok(self.halt(run, Stage::NoPages));
        }
        self.advance(&mut run, Stage::ListingsFetched);

        // ListingsFetched -> UrlsExtracted
        run.detail_urls = extract_listing_urls(Arc::new(listing_pages), self.base_url.clone()).await?;
        self.advance(&mut run, Stage::UrlsExtracted);

        // UrlsExtracted -> DetailsFetched
        let engine = if self.settings.proxy.revalidate_between_stages {
            match self.engine_for(&validator, &candidates).await? {
                Some(engine) => engine,
                None => return Ok(self.halt(run, Stage::NoProxies)),
            }
        } else {
            engine
        };
        run.proxy = Some(engine.proxy().clone());
        let detail_pages = engine.fetch_all(&run.detail_urls).await;
        if !detail_pages.is_empty() && detail_pages.iter().all(Option::is_none) {
            return Ok(self.halt(run, Stage::NoPages));
        }
        self.advance(&mut run, Stage::DetailsFetched);

        // DetailsFetched -> RecordsExtracted -> Assembled
        let records = extract_records(Arc::new(detail_pages), self.base_url.clone()).await?;
        self.advance(&mut run, Stage::RecordsExtracted);
        run.table = Table::from_records(&records);
        self.advance(&mut run, Stage::Assembled);

        info_time!(start_time, "Finished scraping: {} rows", run.table.len());
        Ok(run)
    }

    fn validator(&self) -> ProxyValidator {
        ProxyValidator::new(
            self.settings.proxy.check_url.clone(),
            self.settings.timeout(),
            self.log.component("validator"),
        )
    }

    /// Validates `candidates` and builds an engine around one random working proxy.
    /// `None` when nothing passed validation, in which case no client is built.
    async fn engine_for(
        &self,
        validator: &ProxyValidator,
        candidates: &[ProxyEndpoint],
    ) -> Result<Option<FetchEngine>> {
        let working = validator.validate(candidates).await;
        let Some(proxy) = working.choose(&mut rand::thread_rng()).cloned() else {
            warn!("No working proxies found.");
            return Ok(None);
        };
        info!("Found {} working proxies, using {proxy}", working.len());

        let engine = FetchEngine::new(
            proxy,
            &self.settings.scraping.user_agents,
            self.settings.timeout(),
            self.log.component("fetch"),
        )?;
        Ok(Some(engine))
    }

    fn advance(&self, run: &mut PipelineRun, next: Stage) {
        info!(from = %run.stage, to = %next, "Stage {} -> {}", run.stage, next);
        run.stage = next;
    }

    fn halt(&self, mut run: PipelineRun, terminal: Stage) -> PipelineRun {
        warn!(at = %run.stage, "Stopping run: {terminal}");
        run.stage = terminal;
        run.table = Table::default();
        run
    }
}
