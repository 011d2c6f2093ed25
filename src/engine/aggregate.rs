// Per-query windowed aggregation state: bucket lifecycle for the
// none/tumbling/sliding/session window types, the running numeric
// state each aggregation function keeps per bucket, and the periodic
// flush that emits closed buckets as derived events.

use crate::event::Event;
use crate::ql::{AggFn, WindowSpec};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// Hard cap on how many sliding windows a single event may be
/// attributed to, bounding pathological window/slide configurations.
/// Kept as a constant rather than configurable.
pub const MAX_SLIDING_WINDOWS_PER_EVENT: usize = 1000;

/// Soft cap on the number of distinct values tracked per bucket per
/// `distinct(field)` function. Exceeding it doesn't fail the query;
/// the bucket stops recording new distinct values and its count
/// becomes a lower bound (logged once per bucket).
const DISTINCT_CAP: usize = 100_000;

fn scalar_group_key(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => "null".to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        Some(JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format!("{:.6}", n.as_f64().unwrap_or(0.0))
            }
        }
        Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => "null".to_string(),
    }
}

fn numeric_value(value: Option<&JsonValue>) -> f64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// A scalar value tracked by a `distinct(field)` function, compared
/// with ε = 1e-9 tolerance for numbers.
#[derive(Debug, Clone, PartialEq)]
enum DistinctValue {
    Num(f64),
    Str(String),
}

impl DistinctValue {
    fn from_json(value: Option<&JsonValue>) -> Option<Self> {
        match value {
            Some(JsonValue::Number(n)) => Some(DistinctValue::Num(n.as_f64().unwrap_or(0.0))),
            Some(JsonValue::String(s)) => Some(DistinctValue::Str(s.clone())),
            Some(JsonValue::Bool(b)) => Some(DistinctValue::Str(b.to_string())),
            _ => None,
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DistinctValue::Num(a), DistinctValue::Num(b)) => (a - b).abs() < 1e-9,
            (DistinctValue::Str(a), DistinctValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// Running state for a single aggregation function within a bucket.
/// Every field is updated unconditionally on each event the bucket
/// receives (absent/non-numeric fields contribute 0.0), so no
/// separate per-function count is kept — `Bucket::count` already
/// reflects it.
#[derive(Debug, Clone)]
struct FnState {
    sum: f64,
    sum_squares: f64,
    min: f64,
    max: f64,
    distinct: Vec<DistinctValue>,
    distinct_lossy: bool,
    samples: Vec<f64>,
}

impl FnState {
    fn new() -> Self {
        Self {
            sum: 0.0,
            sum_squares: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            distinct: Vec::new(),
            distinct_lossy: false,
            samples: Vec::new(),
        }
    }

    fn record_numeric(&mut self, v: f64) {
        self.sum += v;
        self.sum_squares += v * v;
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    fn record_distinct(&mut self, value: Option<&JsonValue>) {
        let Some(dv) = DistinctValue::from_json(value) else {
            return;
        };
        if self.distinct.iter().any(|existing| existing.approx_eq(&dv)) {
            return;
        }
        if self.distinct.len() >= DISTINCT_CAP {
            if !self.distinct_lossy {
                tracing::warn!(cap = DISTINCT_CAP, "distinct tracking capped; result is a lower bound");
                self.distinct_lossy = true;
            }
            return;
        }
        self.distinct.push(dv);
    }
}

/// Nearest-rank percentile over a copy of the observed samples.
/// `rank = ⌊(p/100)·n⌋` is a 1-based rank into the sorted sequence
/// (ties break by position): for 20 samples of 10..=200, p95 gives
/// rank 19 (1-based) and so value 190, not the 20th (last) element.
fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).floor() as i64;
    let idx = (rank - 1).max(0) as usize;
    sorted[idx.min(n - 1)]
}

/// A single aggregation bucket: one group-key tuple within one
/// window instance.
#[derive(Debug, Clone)]
struct Bucket {
    group_key: Vec<String>,
    window_start: u64,
    window_end: u64,
    count: u64,
    last_event_ns: u64,
    fn_states: Vec<FnState>,
}

impl Bucket {
    fn new(group_key: Vec<String>, window_start: u64, window_end: u64, n_fns: usize) -> Self {
        Self {
            group_key,
            window_start,
            window_end,
            count: 0,
            last_event_ns: window_start,
            fn_states: (0..n_fns).map(|_| FnState::new()).collect(),
        }
    }

    fn apply(&mut self, functions: &[AggFn], event: &Event, ts_ns: u64) {
        self.count += 1;
        self.last_event_ns = ts_ns;
        for (spec, state) in functions.iter().zip(self.fn_states.iter_mut()) {
            match spec {
                AggFn::Count => {}
                AggFn::Sum(field) | AggFn::Avg(field) => state.record_numeric(numeric_value(event.lookup(field))),
                AggFn::Min(field) | AggFn::Max(field) => state.record_numeric(numeric_value(event.lookup(field))),
                AggFn::Percentile(field, _) => state.samples.push(numeric_value(event.lookup(field))),
                AggFn::Distinct(field) => state.record_distinct(event.lookup(field)),
            }
        }
    }

    fn reset(&mut self, n_fns: usize) {
        self.count = 0;
        self.fn_states = (0..n_fns).map(|_| FnState::new()).collect();
    }
}

fn build_metrics(functions: &[AggFn], bucket: &Bucket) -> Map<String, JsonValue> {
    let mut metrics = Map::new();
    for (spec, state) in functions.iter().zip(bucket.fn_states.iter()) {
        match spec {
            AggFn::Count => {
                metrics.insert("count".to_string(), json!(bucket.count));
            }
            AggFn::Sum(field) => {
                metrics.insert(field.clone(), json!(state.sum));
            }
            AggFn::Avg(field) => {
                let avg = if bucket.count == 0 { 0.0 } else { state.sum / bucket.count as f64 };
                metrics.insert(format!("avg_{field}"), json!(avg));
            }
            AggFn::Min(field) => {
                let v = if state.min.is_finite() { state.min } else { 0.0 };
                metrics.insert(format!("min_{field}"), json!(v));
            }
            AggFn::Max(field) => {
                let v = if state.max.is_finite() { state.max } else { 0.0 };
                metrics.insert(format!("max_{field}"), json!(v));
            }
            AggFn::Percentile(field, p) => {
                metrics.insert(spec.metric_key(), json!(percentile(&state.samples, *p)));
            }
            AggFn::Distinct(field) => {
                metrics.insert(format!("distinct_{field}"), json!(state.distinct.len() as u64));
            }
        }
    }
    metrics
}

fn build_payload(functions: &[AggFn], group_by: &[String], bucket: &Bucket, window: WindowSpec) -> JsonValue {
    let mut obj = Map::new();
    obj.insert("nql_result_type".to_string(), json!("aggregation"));
    if !group_by.is_empty() {
        let mut group = Map::new();
        for (name, key) in group_by.iter().zip(bucket.group_key.iter()) {
            group.insert(name.clone(), json!(key));
        }
        obj.insert("group".to_string(), JsonValue::Object(group));
    }
    obj.insert("metrics".to_string(), JsonValue::Object(build_metrics(functions, bucket)));
    if !matches!(window, WindowSpec::None) {
        obj.insert(
            "window".to_string(),
            json!({ "start_ns": bucket.window_start, "end_ns": bucket.window_end }),
        );
    }
    JsonValue::Object(obj)
}

fn flush_interval_ns(window: WindowSpec) -> Option<u64> {
    match window {
        WindowSpec::None => None,
        WindowSpec::Tumbling(size_ms) => Some(size_ms.max(1) * 1_000_000),
        WindowSpec::Sliding(_, slide_ms) => Some(slide_ms.max(1) * 1_000_000),
        WindowSpec::Session(timeout_ms) => Some((timeout_ms / 2).max(100) * 1_000_000),
    }
}

/// Per-query aggregation state, keyed in `World` by the original query
/// text. Owns a deep copy of the descriptor so it outlives the AST node
/// it was created from.
pub struct AggregationState {
    functions: Vec<AggFn>,
    group_by: Vec<String>,
    window: WindowSpec,
    buckets: HashMap<(Vec<String>, u64), Bucket>,
    session_open: HashMap<Vec<String>, u64>,
    next_flush_ns: Option<u64>,
}

impl AggregationState {
    pub fn new(functions: Vec<AggFn>, group_by: Vec<String>, window: WindowSpec, now_ns: u64) -> Self {
        Self {
            next_flush_ns: flush_interval_ns(window).map(|interval| now_ns + interval),
            functions,
            group_by,
            window,
            buckets: HashMap::new(),
            session_open: HashMap::new(),
        }
    }

    pub fn flush_due(&self, now_ns: u64) -> bool {
        matches!(self.next_flush_ns, Some(t) if now_ns >= t)
    }

    fn group_key(&self, event: &Event) -> Vec<String> {
        self.group_by.iter().map(|path| scalar_group_key(event.lookup(path))).collect()
    }

    /// Attribute `event` to its bucket(s). Returns whether the event
    /// was attributed to at least one bucket and, for `None` windows
    /// only, the immediately-synthesized derived payload; other window
    /// types defer emission to [`Self::flush`].
    pub fn update(&mut self, event: &Event, ts_ns: u64) -> (bool, Option<JsonValue>) {
        let group_key = self.group_key(event);
        let n_fns = self.functions.len();
        match self.window {
            WindowSpec::None => {
                let key = (group_key.clone(), 0u64);
                let bucket = self
                    .buckets
                    .entry(key)
                    .or_insert_with(|| Bucket::new(group_key, 0, u64::MAX, n_fns));
                bucket.apply(&self.functions, event, ts_ns);
                (true, Some(build_payload(&self.functions, &self.group_by, bucket, self.window)))
            }
            WindowSpec::Tumbling(size_ms) => {
                let size_ns = size_ms.max(1) * 1_000_000;
                let start = (ts_ns / size_ns) * size_ns;
                let end = start + size_ns;
                let key = (group_key.clone(), start);
                let bucket = self
                    .buckets
                    .entry(key)
                    .or_insert_with(|| Bucket::new(group_key, start, end, n_fns));
                bucket.apply(&self.functions, event, ts_ns);
                (true, None)
            }
            WindowSpec::Sliding(size_ms, slide_ms) => {
                let size_ns = size_ms.max(1) * 1_000_000;
                let slide_ns = slide_ms.max(1) * 1_000_000;
                let lower = (ts_ns.saturating_sub(size_ns) / slide_ns) * slide_ns;
                let upper = (ts_ns / slide_ns) * slide_ns;
                let mut start = lower;
                let mut attributed = 0usize;
                while start <= upper && attributed < MAX_SLIDING_WINDOWS_PER_EVENT {
                    if start <= ts_ns && ts_ns < start + size_ns {
                        let end = start + size_ns;
                        let key = (group_key.clone(), start);
                        let bucket = self
                            .buckets
                            .entry(key)
                            .or_insert_with(|| Bucket::new(group_key.clone(), start, end, n_fns));
                        bucket.apply(&self.functions, event, ts_ns);
                        attributed += 1;
                    }
                    start += slide_ns;
                }
                (attributed > 0, None)
            }
            WindowSpec::Session(timeout_ms) => {
                let timeout_ns = timeout_ms.max(1) * 1_000_000;
                let reuse_start = self.session_open.get(&group_key).copied().filter(|&start| {
                    self.buckets
                        .get(&(group_key.clone(), start))
                        .is_some_and(|b| ts_ns.saturating_sub(b.last_event_ns) < timeout_ns)
                });
                let start = match reuse_start {
                    Some(start) => start,
                    None => {
                        self.session_open.insert(group_key.clone(), ts_ns);
                        ts_ns
                    }
                };
                let key = (group_key.clone(), start);
                let bucket = self
                    .buckets
                    .entry(key)
                    .or_insert_with(|| Bucket::new(group_key, start, u64::MAX, n_fns));
                bucket.apply(&self.functions, event, ts_ns);
                (true, None)
            }
        }
    }

    /// Periodic flush tick. Returns the payloads of any buckets that
    /// closed this tick.
    pub fn flush(&mut self, now_ns: u64) -> Vec<JsonValue> {
        let mut emitted = Vec::new();
        match self.window {
            WindowSpec::None => {}
            WindowSpec::Tumbling(size_ms) => {
                let size_ns = size_ms.max(1) * 1_000_000;
                let due: Vec<_> = self
                    .buckets
                    .iter()
                    .filter(|(_, b)| b.window_end <= now_ns)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in due {
                    let Some(mut bucket) = self.buckets.remove(&key) else { continue };
                    if bucket.count > 0 {
                        emitted.push(build_payload(&self.functions, &self.group_by, &bucket, self.window));
                    }
                    bucket.reset(self.functions.len());
                    let advance = ((now_ns - bucket.window_start) / size_ns) * size_ns;
                    bucket.window_start += advance;
                    bucket.window_end = bucket.window_start + size_ns;
                    self.buckets.insert((bucket.group_key.clone(), bucket.window_start), bucket);
                }
            }
            WindowSpec::Sliding(_, _) => {
                let due: Vec<_> = self
                    .buckets
                    .iter()
                    .filter(|(_, b)| b.window_end <= now_ns)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in due {
                    if let Some(bucket) = self.buckets.remove(&key) {
                        if bucket.count > 0 {
                            emitted.push(build_payload(&self.functions, &self.group_by, &bucket, self.window));
                        }
                    }
                }
            }
            WindowSpec::Session(timeout_ms) => {
                let timeout_ns = timeout_ms.max(1) * 1_000_000;
                let due: Vec<_> = self
                    .buckets
                    .iter()
                    .filter(|(_, b)| b.count > 0 && now_ns.saturating_sub(b.last_event_ns) >= timeout_ns)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in due {
                    if let Some(bucket) = self.buckets.remove(&key) {
                        emitted.push(build_payload(&self.functions, &self.group_by, &bucket, self.window));
                        self.session_open.remove(&bucket.group_key);
                    }
                }
            }
        }
        if let Some(interval) = flush_interval_ns(self.window) {
            self.next_flush_ns = Some(now_ns + interval);
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;

    fn ev(ts: u64, payload: JsonValue) -> Event {
        Event::new(EventKind::Log, ts, None, payload)
    }

    #[test]
    fn tumbling_windows_split_on_flush() {
        let mut state = AggregationState::new(vec![AggFn::Count], vec!["service".to_string()], WindowSpec::Tumbling(1000), 0);
        state.update(&ev(500_000_000, json!({"service": "api"})), 500_000_000);
        state.update(&ev(900_000_000, json!({"service": "api"})), 900_000_000);
        state.update(&ev(1_400_000_000, json!({"service": "api"})), 1_400_000_000);
        let emitted = state.flush(2_000_000_000);
        assert_eq!(emitted.len(), 2);
        let counts: Vec<i64> = emitted.iter().map(|e| e["metrics"]["count"].as_i64().unwrap()).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn sliding_window_covers_overlapping_buckets() {
        let mut state = AggregationState::new(vec![AggFn::Count], vec![], WindowSpec::Sliding(1000, 500), 0);
        state.update(&ev(600_000_000, json!({})), 600_000_000);
        assert_eq!(state.buckets.len(), 2);
        assert!(state.buckets.contains_key(&(vec![], 0)));
        assert!(state.buckets.contains_key(&(vec![], 500_000_000)));
    }

    #[test]
    fn percentile_matches_nearest_rank_worked_example() {
        let mut state = AggregationState::new(vec![AggFn::Percentile("latency_ms".to_string(), 95.0)], vec![], WindowSpec::None, 0);
        let mut last = None;
        for i in 1..=20 {
            let ts = i as u64 * 1_000_000;
            last = state.update(&ev(ts, json!({"latency_ms": (i * 10) as f64})), ts);
        }
        let payload = last.unwrap();
        assert_eq!(payload["metrics"]["p95_latency_ms"].as_f64().unwrap(), 190.0);
    }

    #[test]
    fn session_window_closes_on_idle_gap() {
        let mut state = AggregationState::new(vec![AggFn::Count], vec![], WindowSpec::Session(300), 0);
        state.update(&ev(0, json!({})), 0);
        state.update(&ev(100_000_000, json!({})), 100_000_000);
        state.update(&ev(200_000_000, json!({})), 200_000_000);
        let emitted = state.flush(600_000_000);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0]["metrics"]["count"].as_i64().unwrap(), 3);
        state.update(&ev(600_000_000, json!({})), 600_000_000);
        let emitted = state.flush(1_000_000_000);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0]["metrics"]["count"].as_i64().unwrap(), 1);
    }

    #[test]
    fn none_window_emits_immediately_every_event() {
        let mut state = AggregationState::new(vec![AggFn::Count], vec![], WindowSpec::None, 0);
        assert!(state.update(&ev(0, json!({})), 0).is_some());
        let second = state.update(&ev(1, json!({})), 1).unwrap();
        assert_eq!(second["metrics"]["count"].as_i64().unwrap(), 2);
    }
}
