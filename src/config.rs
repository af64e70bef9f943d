use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_CHECK_URL: &str = "http://httpbin.org/ip";
const DEFAULT_SAMPLE_SIZE: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub scraping: ScrapingSettings,
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingSettings {
    /// Site root, prepended to every relative link found on a page.
    pub base_url: String,
    /// Listing URL prefix, the page number is appended to it.
    pub listing_url: String,
    #[serde(default = "default_start_page")]
    pub start_page: usize,
    #[serde(default = "default_start_page")]
    pub end_page: usize,
    #[serde(default)]
    pub user_agents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// One `host:port` per line.
    pub source: PathBuf,
    #[serde(default = "default_check_url")]
    pub check_url: String,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Validate the candidates again and pick a new proxy before the detail stage.
    #[serde(default)]
    pub revalidate_between_stages: bool,
}

fn default_start_page() -> usize {
    1
}

fn default_check_url() -> String {
    DEFAULT_CHECK_URL.to_string()
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Settings {
    /// Reads and validates the TOML settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let scraping = &self.scraping;
        if scraping.base_url.trim().is_empty() {
            return Err(Error::MissingSetting("scraping.base_url"));
        }
        if scraping.listing_url.trim().is_empty() {
            return Err(Error::MissingSetting("scraping.listing_url"));
        }
        if scraping.user_agents.is_empty() {
            return Err(Error::MissingSetting("scraping.user_agents"));
        }
        if scraping.start_page > scraping.end_page {
            return Err(Error::MissingSetting("scraping.start_page <= scraping.end_page"));
        }
        if self.proxy.sample_size == 0 {
            return Err(Error::MissingSetting("proxy.sample_size"));
        }
        if self.proxy.check_url.trim().is_empty() {
            return Err(Error::MissingSetting("proxy.check_url"));
        }
        Ok(())
    }

    /// Every listing page URL in the configured page range.
    pub fn listing_urls(&self) -> Vec<String> {
        (self.scraping.start_page..=self.scraping.end_page)
            .map(|page| format!("{}{page}", self.scraping.listing_url))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.timeout_secs)
    }
}
