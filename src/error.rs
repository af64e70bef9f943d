use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Couldn't read the proxy source at {path}: {source}")]
    ProxySource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid proxy endpoint: {0}")]
    InvalidProxy(String),

    #[error("Couldn't parse the config file: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Missing or invalid setting: {0}")]
    MissingSetting(&'static str),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Couldn't install the log subscriber: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}
