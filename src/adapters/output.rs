// Output adapters: each implements `EventHandler`, so `World` can fan
// events out without knowing which sink (or sinks) are wired up.

use crate::event::Event;
use crate::world::EventHandler;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Writes one compact JSON line per event to stdout.
pub struct StdoutSink;

impl EventHandler for StdoutSink {
    fn handle(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to serialize event for stdout"),
        }
    }
}

/// Buffered, size-rotated JSON-lines file sink: opens the file lazily
/// on first write, and renames-with-timestamp once the rotation
/// threshold is crossed.
pub struct FileSink {
    path: PathBuf,
    rotation_bytes: u64,
    inner: Mutex<FileSinkState>,
}

struct FileSinkState {
    writer: Option<BufWriter<File>>,
    current_size: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, rotation_bytes: u64) -> Self {
        Self { path: path.into(), rotation_bytes, inner: Mutex::new(FileSinkState { writer: None, current_size: 0 }) }
    }

    fn open(&self, state: &mut FileSinkState) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        state.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn rotate(&self, state: &mut FileSinkState) -> std::io::Result<()> {
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }
        // Timestamped rotation suffix, formatted with `chrono`, rather
        // than a bare epoch count.
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let rotated = self.path.with_extension(format!("{stamp}.old"));
        std::fs::rename(&self.path, &rotated)?;
        state.writer = None;
        state.current_size = 0;
        Ok(())
    }

    fn write_line(&self, event: &Event) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut state = self.inner.lock().unwrap();
        if state.writer.is_none() {
            self.open(&mut state)?;
        }
        {
            let writer = state.writer.as_mut().expect("just opened");
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        state.current_size += line.len() as u64 + 1;
        if state.current_size >= self.rotation_bytes {
            self.rotate(&mut state)?;
        }
        Ok(())
    }
}

impl EventHandler for FileSink {
    fn handle(&self, event: &Event) {
        if let Err(e) = self.write_line(event) {
            warn!(error = %e, path = %self.path.display(), "failed to write event to file sink");
        }
    }
}

/// Fire-and-forget HTTP POST per event, unbatched. `handle` is
/// synchronous (the `EventHandler` contract), so the POST is spawned
/// onto the stored runtime handle rather than awaited in place.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    runtime: tokio::runtime::Handle,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, runtime: tokio::runtime::Handle) -> Self {
        Self { client: reqwest::Client::new(), url: url.into(), runtime }
    }
}

impl EventHandler for HttpSink {
    fn handle(&self, event: &Event) {
        let client = self.client.clone();
        let url = self.url.clone();
        let body = event.clone();
        self.runtime.spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                warn!(error = %e, url, "http sink post failed");
            }
        });
    }
}

/// Renders aggregation-derived events as Prometheus gauges, keyed by
/// `metrics.*` names and labelled by `group.*`. Backed by a
/// `Mutex<HashMap<...>>` snapshot an `axum` `/metrics` handler reads
/// from; see [`crate::adapters::metrics_route`].
pub struct PrometheusSink {
    gauges: Mutex<HashMap<String, f64>>,
    events_seen: AtomicU64,
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self { gauges: Mutex::new(HashMap::new()), events_seen: AtomicU64::new(0) }
    }

    /// Renders the current gauge snapshot in Prometheus text exposition
    /// format.
    pub fn render(&self) -> String {
        let gauges = self.gauges.lock().unwrap();
        let mut out = String::new();
        for (name, value) in gauges.iter() {
            out.push_str(&format!("nql_{name} {value}\n"));
        }
        out.push_str(&format!("nql_events_seen_total {}\n", self.events_seen.load(Ordering::Relaxed)));
        out
    }
}

impl EventHandler for PrometheusSink {
    fn handle(&self, event: &Event) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        let Some(metrics) = event.payload.get("metrics").and_then(|m| m.as_object()) else {
            return;
        };
        let group_suffix = event
            .payload
            .get("group")
            .and_then(|g| g.as_object())
            .map(|fields| {
                let mut values: Vec<&str> = fields.values().filter_map(|v| v.as_str()).collect();
                values.sort_unstable();
                values.join("_")
            })
            .filter(|s| !s.is_empty())
            .map(|s| format!("_{s}"))
            .unwrap_or_default();

        let mut gauges = self.gauges.lock().unwrap();
        for (key, value) in metrics {
            if let Some(v) = value.as_f64() {
                gauges.insert(format!("{key}{group_suffix}"), v);
            }
        }
    }
}

/// Broadcasts every event to all wired sinks, satisfying `World`'s
/// single-handler contract when more than one output is configured.
pub struct FanOutHandler {
    handlers: Vec<std::sync::Arc<dyn EventHandler>>,
}

impl FanOutHandler {
    pub fn new(handlers: Vec<std::sync::Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }
}

impl EventHandler for FanOutHandler {
    fn handle(&self, event: &Event) {
        for h in &self.handlers {
            h.handle(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;

    #[test]
    fn prometheus_sink_renders_metrics_with_group_suffix() {
        let sink = PrometheusSink::new();
        let event = Event::derived(
            0,
            json!({"nql_result_type": "aggregation", "group": {"service": "api"}, "metrics": {"count": 3.0}}),
        );
        sink.handle(&event);
        let rendered = sink.render();
        assert!(rendered.contains("nql_count_api 3"));
        assert!(rendered.contains("nql_events_seen_total 1"));
    }

    #[test]
    fn file_sink_writes_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = FileSink::new(&path, 10);
        let event = Event::new(EventKind::Log, 0, None, json!({"level": "INFO"}));
        sink.handle(&event);
        assert!(path.exists());
    }
}
