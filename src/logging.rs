//! Log context handed to every component, and the subscriber setup for the binary.
//!
//! Components never reach for a global logger of their own. The driver owns a root
//! [`LogContext`] and gives each component a named child of it when building it, so
//! every event a component emits is tagged with the run and the component.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{info_span, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::Result;

const DEFAULT_FILTER: &str = "knihscrap=info";

#[derive(Debug, Clone)]
pub struct LogContext {
    span: Span,
}

impl LogContext {
    /// Root context for one pipeline run.
    pub fn run(run_id: &str) -> Self {
        Self {
            span: info_span!("run", id = %run_id),
        }
    }

    /// Child context for a single component of the run.
    pub fn component(&self, name: &'static str) -> Self {
        Self {
            span: info_span!(parent: &self.span, "component", name),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self { span: Span::none() }
    }
}

/// Installs the global subscriber: stdout always, plus a plain-text file when `log_file` is set.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .try_init()?;

    Ok(())
}
