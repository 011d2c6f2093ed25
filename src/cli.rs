// Command-line flags. Modeled on a daemon-style `clap::Parser` struct:
// plain fields with `#[arg(...)]` attributes, verbosity as a
// repeatable count flag, no subcommands.

use clap::{Parser, ValueEnum};
use serde::Deserialize;

/// Where matched/derived events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Stdout,
    File,
    Http,
    Prometheus,
}

impl Default for OutputKind {
    fn default() -> Self {
        OutputKind::Stdout
    }
}

/// Streaming correlation and windowed-aggregation engine for log and
/// network event streams.
#[derive(Debug, Parser)]
#[command(name = "nqlstream", version, about)]
pub struct Cli {
    /// Path to a newline-delimited JSON log file to tail.
    #[arg(long, env = "NQL_LOGS")]
    pub logs: Option<String>,

    /// Path to a newline-delimited JSON packet-summary file to read
    /// ("-" for stdin).
    #[arg(long, env = "NQL_NETWORK")]
    pub network: Option<String>,

    /// UDP address to receive syslog datagrams on, e.g. "0.0.0.0:5514".
    #[arg(long, env = "NQL_SYSLOG_ADDR")]
    pub syslog_addr: Option<String>,

    /// A bare filter expression applied as a pre-filter on every input
    /// adapter, ahead of any `--query`.
    #[arg(long, env = "NQL_FILTER")]
    pub filter: Option<String>,

    /// An NQL query to register; may be passed multiple times.
    #[arg(short, long = "query")]
    pub query: Vec<String>,

    /// Output adapter events are forwarded to.
    #[arg(long, value_enum)]
    pub output: Option<OutputKind>,

    /// HTTP endpoint `--output http` posts events to.
    #[arg(long, env = "NQL_HTTP_URL")]
    pub http_url: Option<String>,

    /// Bind address `--output prometheus` serves `/metrics` on.
    #[arg(long, env = "NQL_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// Default `within` window (ms) for the always-on legacy
    /// time-based correlator.
    #[arg(long)]
    pub correlate_within_ms: Option<u64>,

    /// Path to a YAML config file layered beneath CLI flags and env vars.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
