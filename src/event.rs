// Event model.
//
// Events are the unit of data flowing through the engine: a category
// tag, a capture-time timestamp, an originating input handle, and a
// JSON-like payload tree. Payloads are immutable after construction;
// `Event` is cheaply `Clone`-able because correlation buffering needs
// independent owned copies.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Network,
    Correlation,
    Derived,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Log => "log",
            EventKind::Network => "network",
            EventKind::Correlation => "correlation",
            EventKind::Derived => "derived",
            EventKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// Opaque handle naming the input that produced an event. `None` for
/// synthetic/derived events.
pub type Origin = Option<String>;

/// A single event flowing through the engine.
///
/// The payload is a `serde_json::Value` tree: objects, arrays,
/// strings, integers, reals, booleans, and null, so field lookup walks
/// it directly rather than through a bespoke value type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp_ns: u64,
    pub origin: Origin,
    pub payload: JsonValue,
}

impl Event {
    pub fn new(kind: EventKind, timestamp_ns: u64, origin: Origin, payload: JsonValue) -> Self {
        Self { kind, timestamp_ns, origin, payload }
    }

    pub fn derived(timestamp_ns: u64, payload: JsonValue) -> Self {
        Self::new(EventKind::Derived, timestamp_ns, None, payload)
    }

    pub fn correlation(timestamp_ns: u64, payload: JsonValue) -> Self {
        Self::new(EventKind::Correlation, timestamp_ns, None, payload)
    }

    /// Dot-path field lookup against the payload.
    ///
    /// `kind` is a virtual field resolving to the event's category
    /// (as a string) rather than a payload key, so filters like
    /// `kind == "log"` work without the category having to be
    /// duplicated into every payload by the adapter that produced it
    /// (needed by the time-based correlator). Otherwise checks the
    /// exact full key at the payload root (supports flattened payloads
    /// using literal dotted keys), then falls back to recursive
    /// descent by splitting at the first dot (supports nested object
    /// payloads). Returns `None` for anything that doesn't resolve to
    /// a scalar-bearing node; callers treat that as "absent".
    pub fn lookup(&self, path: &str) -> Option<&JsonValue> {
        if path == "kind" {
            return Some(self.kind_as_json());
        }
        if let JsonValue::Object(map) = &self.payload {
            if let Some(v) = map.get(path) {
                return Some(v);
            }
        }
        lookup_nested(&self.payload, path)
    }

    fn kind_as_json(&self) -> &JsonValue {
        match self.kind {
            EventKind::Log => &KIND_LOG,
            EventKind::Network => &KIND_NETWORK,
            EventKind::Correlation => &KIND_CORRELATION,
            EventKind::Derived => &KIND_DERIVED,
            EventKind::Error => &KIND_ERROR,
        }
    }
}

// Static `JsonValue::String`s returned by `Event::kind_as_json` so the
// virtual "kind" field can hand out `&JsonValue` references without
// allocating on every lookup.
static KIND_LOG: std::sync::LazyLock<JsonValue> = std::sync::LazyLock::new(|| JsonValue::String("log".to_string()));
static KIND_NETWORK: std::sync::LazyLock<JsonValue> = std::sync::LazyLock::new(|| JsonValue::String("network".to_string()));
static KIND_CORRELATION: std::sync::LazyLock<JsonValue> =
    std::sync::LazyLock::new(|| JsonValue::String("correlation".to_string()));
static KIND_DERIVED: std::sync::LazyLock<JsonValue> = std::sync::LazyLock::new(|| JsonValue::String("derived".to_string()));
static KIND_ERROR: std::sync::LazyLock<JsonValue> = std::sync::LazyLock::new(|| JsonValue::String("error".to_string()));

fn lookup_nested<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    match value {
        JsonValue::Object(map) => {
            if let Some(v) = map.get(path) {
                return Some(v);
            }
            let (head, rest) = match path.split_once('.') {
                Some(parts) => parts,
                None => return None,
            };
            let child = map.get(head)?;
            lookup_nested(child, rest)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_flat_key() {
        let e = Event::new(EventKind::Log, 1, None, json!({"log.level": "ERROR"}));
        assert_eq!(e.lookup("log.level").unwrap(), "ERROR");
    }

    #[test]
    fn lookup_nested_key() {
        let e = Event::new(EventKind::Log, 1, None, json!({"log": {"level": "ERROR"}}));
        assert_eq!(e.lookup("log.level").unwrap(), "ERROR");
    }

    #[test]
    fn lookup_kind_is_virtual_field() {
        let e = Event::new(EventKind::Network, 1, None, json!({}));
        assert_eq!(e.lookup("kind").unwrap(), "network");
    }

    #[test]
    fn lookup_missing_is_none() {
        let e = Event::new(EventKind::Log, 1, None, json!({"log": {"level": "ERROR"}}));
        assert!(e.lookup("log.service").is_none());
        assert!(e.lookup("nonexistent").is_none());
    }
}
