// Input/output adapters: the only part of the crate that talks to the
// outside world. Everything in `engine`/`executor`/`world` is
// adapter-agnostic.

pub mod input;
pub mod output;

pub use input::{InputAdapter, LogTailer, PacketReader, SyslogReceiver};
pub use output::{FanOutHandler, FileSink, HttpSink, PrometheusSink, StdoutSink};

use axum::{extract::State, routing::get, Router};
use std::sync::Arc;

/// Builds the `axum` router serving `--output prometheus`'s `/metrics`
/// endpoint.
pub fn metrics_router(sink: Arc<PrometheusSink>) -> Router {
    Router::new().route("/metrics", get(render_metrics)).with_state(sink)
}

async fn render_metrics(State(sink): State<Arc<PrometheusSink>>) -> String {
    sink.render()
}
