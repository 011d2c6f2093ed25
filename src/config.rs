// Layered application configuration. This has no bearing on engine
// semantics, only on which adapters a given process wires up — the
// `ql`/`engine`/`executor`/`world` modules know nothing of it.

use crate::cli::{Cli, OutputKind};
use crate::error::Result;
use serde::Deserialize;

/// Resolved configuration for one process, after layering a YAML file
/// (if any), environment variables (`NQL_*`), and CLI flags on top of
/// built-in defaults, in that order of increasing precedence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logs: Option<String>,
    pub network: Option<String>,
    pub syslog_addr: Option<String>,
    pub filter: Option<String>,
    pub queries: Vec<String>,
    pub output: OutputKind,
    pub http_url: Option<String>,
    pub metrics_addr: Option<String>,
    pub correlate_within_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logs: None,
            network: None,
            syslog_addr: None,
            filter: None,
            queries: Vec::new(),
            output: OutputKind::Stdout,
            http_url: None,
            metrics_addr: None,
            correlate_within_ms: crate::ql::DEFAULT_CORRELATE_WITHIN_MS,
        }
    }
}

impl AppConfig {
    /// Builds the file+env layers via the `config` crate, then
    /// overlays any CLI flags the user actually passed (`Option`/empty
    /// fields on `Cli` mean "inherit the lower layer").
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("NQL").separator("__"));
        let layered = builder.build()?;
        let mut cfg: AppConfig = layered.try_deserialize().unwrap_or_default();

        if cli.logs.is_some() {
            cfg.logs = cli.logs.clone();
        }
        if cli.network.is_some() {
            cfg.network = cli.network.clone();
        }
        if cli.syslog_addr.is_some() {
            cfg.syslog_addr = cli.syslog_addr.clone();
        }
        if cli.filter.is_some() {
            cfg.filter = cli.filter.clone();
        }
        if !cli.query.is_empty() {
            cfg.queries = cli.query.clone();
        }
        if let Some(output) = cli.output {
            cfg.output = output;
        }
        if cli.http_url.is_some() {
            cfg.http_url = cli.http_url.clone();
        }
        if cli.metrics_addr.is_some() {
            cfg.metrics_addr = cli.metrics_addr.clone();
        }
        if let Some(within) = cli.correlate_within_ms {
            cfg.correlate_within_ms = within;
        }
        Ok(cfg)
    }
}
