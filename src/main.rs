// nqlstream daemon entry point: wires configured input adapters into
// a single `World`, drives its event and timer loop on one
// current-thread-equivalent tokio runtime, and forwards matched/derived
// events to the configured output adapter.

use clap::Parser;
use nqlstream::adapters::{self, InputAdapter, LogTailer, PacketReader, PrometheusSink, StdoutSink, SyslogReceiver};
use nqlstream::cli::{Cli, OutputKind};
use nqlstream::config::AppConfig;
use nqlstream::filter::FilterPredicate;
use nqlstream::world::{EventHandler, World};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("nqlstream={level}").parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// Builds the configured output adapter. Returns the `PrometheusSink`
/// separately (rather than only as `Arc<dyn EventHandler>`) when that
/// adapter is selected, so the metrics HTTP server and `World`'s
/// handler share the exact same gauge state instead of two disjoint
/// instances.
fn build_handler(cfg: &AppConfig, rt: tokio::runtime::Handle) -> (Arc<dyn EventHandler>, Option<Arc<PrometheusSink>>) {
    match cfg.output {
        OutputKind::Stdout => (Arc::new(StdoutSink), None),
        OutputKind::File => (Arc::new(adapters::FileSink::new("nqlstream-events.jsonl", 100 * 1024 * 1024)), None),
        OutputKind::Http => {
            let url = cfg.http_url.clone().unwrap_or_else(|| {
                warn!("output=http with no --http-url set, posting to http://localhost:8080/events");
                "http://localhost:8080/events".to_string()
            });
            (Arc::new(adapters::HttpSink::new(url, rt)), None)
        }
        OutputKind::Prometheus => {
            let sink = Arc::new(PrometheusSink::new());
            (sink.clone(), Some(sink))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = match AppConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        logs = ?cfg.logs,
        network = ?cfg.network,
        syslog_addr = ?cfg.syslog_addr,
        output = ?cfg.output,
        queries = cfg.queries.len(),
        "nqlstream {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let (handler, prometheus_sink) = build_handler(&cfg, tokio::runtime::Handle::current());

    let mut world = World::with_correlate_within(now_ns(), cfg.correlate_within_ms);
    world.set_handler(handler);
    for query in &cfg.queries {
        if let Err(e) = world.ensure_registered(query, now_ns()) {
            error!(query, error = %e, "failed to register query, skipping");
        }
    }

    if let Some(sink) = prometheus_sink {
        spawn_metrics_server(&cfg, sink);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pre_filter = match &cfg.filter {
        Some(expr) => match FilterPredicate::compile(expr) {
            Ok(p) => Some(p),
            Err(e) => {
                error!(filter = expr, error = %e, "invalid --filter expression, ignoring");
                None
            }
        },
        None => None,
    };

    // Wired input adapters share one `Box<dyn InputAdapter>` spawn path
    // instead of a separate `if let`/`tokio::spawn` per concrete type.
    let mut input_adapters: Vec<Box<dyn InputAdapter>> = Vec::new();
    if let Some(path) = &cfg.logs {
        input_adapters.push(Box::new(LogTailer {
            path: path.clone(),
            origin: "log-tailer".to_string(),
            poll_interval: Duration::from_millis(500),
            pre_filter: pre_filter.clone(),
        }));
    }
    if let Some(path) = &cfg.network {
        input_adapters.push(Box::new(PacketReader {
            path: path.clone(),
            origin: "packet-reader".to_string(),
            pre_filter: pre_filter.clone(),
        }));
    }
    if let Some(addr) = &cfg.syslog_addr {
        input_adapters.push(Box::new(SyslogReceiver {
            bind_addr: addr.clone(),
            origin: "syslog".to_string(),
            pre_filter: pre_filter.clone(),
        }));
    }
    for adapter in input_adapters {
        let tx = tx.clone();
        tokio::spawn(async move { adapter.run(tx).await });
    }
    drop(tx);

    // `IntervalStream` wraps the flush/expire timer as a `Stream`
    // rather than polling `tokio::time::Interval::tick` directly, so it
    // composes with `rx.recv()` inside the same `select!`.
    let mut tick = IntervalStream::new(tokio::time::interval(Duration::from_millis(250)));
    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        world.emit(&event);
                        for query in &cfg.queries {
                            if let Err(e) = world.execute(query, &event) {
                                warn!(query, error = %e, "query execution failed");
                            }
                        }
                    }
                    None => {
                        info!("all input adapters finished, shutting down");
                        break;
                    }
                }
            }
            Some(_) = tick.next() => {
                world.tick(now_ns());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    info!(
        events_processed = world.events_processed(),
        events_correlated = world.events_correlated(),
        "nqlstream shutting down"
    );
}

fn spawn_metrics_server(cfg: &AppConfig, sink: Arc<PrometheusSink>) {
    let addr = cfg.metrics_addr.clone().unwrap_or_else(|| "0.0.0.0:9898".to_string());
    tokio::spawn(async move {
        let router = adapters::metrics_router(sink);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(addr, "prometheus metrics server listening");
                if let Err(e) = axum::serve(listener, router).await {
                    error!(error = %e, "metrics server exited");
                }
            }
            Err(e) => error!(error = %e, addr, "failed to bind metrics server"),
        }
    });
}
