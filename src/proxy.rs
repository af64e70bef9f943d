use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use rand::seq::SliceRandom;
use tracing::warn;

use crate::{Error, Result};

/// A proxy address in `scheme://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyEndpoint(String);

impl ProxyEndpoint {
    /// Bare `host:port` records get an `http://` scheme.
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains("://") {
            Self(raw.to_string())
        } else {
            Self(format!("http://{raw}"))
        }
    }

    /// Accepts only `[scheme://]host:port`; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let endpoint = Self::new(raw);
        let (_, authority) = endpoint.0.split_once("://")?;
        let (host, port) = authority.rsplit_once(':')?;
        if host.is_empty() || host.contains(['/', ' ', '"']) || port.parse::<u16>().is_err() {
            return None;
        }
        Some(endpoint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        reqwest::Proxy::all(self.as_str()).map_err(|_| Error::InvalidProxy(self.0.clone()))
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidate proxies, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    /// Reads a delimited proxy list: one record per line, the proxy in the first column.
    /// A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ProxySource {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&raw))
    }

    /// Takes the first column of every CSV record. Comment lines, header rows and other
    /// values that are not `host:port` are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(raw.as_bytes());

        let mut endpoints = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable proxy record {}: {e}", line + 1);
                    continue;
                }
            };
            let first_col = record.get(0).unwrap_or("");
            if first_col.is_empty() {
                continue;
            }
            match ProxyEndpoint::parse(first_col) {
                Some(endpoint) => endpoints.push(endpoint),
                None => warn!("Skipping proxy record {}: {first_col:?} is not host:port", line + 1),
            }
        }
        Self::from_endpoints(endpoints)
    }

    /// Duplicates are dropped, first occurrence wins.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = ProxyEndpoint>) -> Self {
        let mut seen = HashSet::new();
        let endpoints = endpoints
            .into_iter()
            .filter(|endpoint| seen.insert(endpoint.clone()))
            .collect();
        Self { endpoints }
    }

    /// Uniformly random distinct endpoints, clamped to the pool size.
    pub fn sample(&self, k: usize) -> Vec<ProxyEndpoint> {
        let k = k.min(self.endpoints.len());
        self.endpoints
            .choose_multiple(&mut rand::thread_rng(), k)
            .cloned()
            .collect()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
