// Bidirectional buffered correlation: two time-bounded buffers, one
// per side of a left/right predicate pair, with self-match avoidance
// and periodic expiry of stale entries.

use crate::event::Event;
use crate::filter::FilterPredicate;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;

/// Correlation buffers are capped at this many entries per side,
/// bounding memory use when one side of a correlation never matches.
pub const MAX_CORRELATION_BUFFER: usize = 10_000;

fn within(a_ts: u64, b_ts: u64, within_ms: u64) -> bool {
    let diff = (a_ts as i128 - b_ts as i128).abs();
    diff <= within_ms as i128 * 1_000_000
}

/// Builds the correlation result payload alongside the emission
/// timestamp `max(left.ts, right.ts)` the derived event carries.
fn correlation_payload(left: &Event, right: &Event, within_ms: u64) -> (u64, JsonValue) {
    let time_diff_ms = (left.timestamp_ns as i128 - right.timestamp_ns as i128) as f64 / 1_000_000.0;
    let ts = left.timestamp_ns.max(right.timestamp_ns);
    let payload = json!({
        "nql_result_type": "correlation",
        "window_ms": within_ms,
        "left_event": left.payload,
        "right_event": right.payload,
        "time_diff_ms": time_diff_ms,
    });
    (ts, payload)
}

/// Per-query correlation state: two bounded buffers plus a periodic
/// expiry timer.
pub struct CorrelationState {
    left: FilterPredicate,
    right: FilterPredicate,
    within_ms: u64,
    left_buf: VecDeque<Event>,
    right_buf: VecDeque<Event>,
    next_expire_ns: Option<u64>,
}

const EXPIRY_INTERVAL_NS: u64 = 1_000_000_000;

impl CorrelationState {
    pub fn new(left: FilterPredicate, right: FilterPredicate, within_ms: u64, now_ns: u64) -> Self {
        Self {
            left,
            right,
            within_ms,
            left_buf: VecDeque::new(),
            right_buf: VecDeque::new(),
            next_expire_ns: Some(now_ns + EXPIRY_INTERVAL_NS),
        }
    }

    pub fn expire_due(&self, now_ns: u64) -> bool {
        matches!(self.next_expire_ns, Some(t) if now_ns >= t)
    }

    /// Processes one event against both buffers. Matches are computed
    /// against the buffers as they stood *before* this event's own
    /// insertions, which is what makes self-match avoidance hold even
    /// for an event that matches both predicates at once: the
    /// insertions below happen only after both match sets have already
    /// been read.
    pub fn process(&mut self, event: &Event) -> Vec<(u64, JsonValue)> {
        let matches_left = self.left.eval(event);
        let matches_right = self.right.eval(event);
        let mut results = Vec::new();

        if matches_left {
            for r in self.right_buf.iter() {
                if within(event.timestamp_ns, r.timestamp_ns, self.within_ms) {
                    results.push(correlation_payload(event, r, self.within_ms));
                }
            }
        }
        if matches_right {
            for l in self.left_buf.iter() {
                if within(l.timestamp_ns, event.timestamp_ns, self.within_ms) {
                    results.push(correlation_payload(l, event, self.within_ms));
                }
            }
        }

        if matches_left {
            self.left_buf.push_front(event.clone());
            if self.left_buf.len() > MAX_CORRELATION_BUFFER {
                self.left_buf.pop_back();
            }
        }
        if matches_right {
            self.right_buf.push_front(event.clone());
            if self.right_buf.len() > MAX_CORRELATION_BUFFER {
                self.right_buf.pop_back();
            }
        }

        results
    }

    /// Periodic cleanup tick. Entries older than `2·within_ms` are
    /// dropped from both buffers.
    pub fn expire(&mut self, now_ns: u64) {
        let cutoff = now_ns.saturating_sub(2 * self.within_ms * 1_000_000);
        self.left_buf.retain(|e| e.timestamp_ns >= cutoff);
        self.right_buf.retain(|e| e.timestamp_ns >= cutoff);
        self.next_expire_ns = Some(now_ns + EXPIRY_INTERVAL_NS);
    }
}

/// The degenerate `kind == log` / `kind == network` correlator every
/// world runs in addition to any QL-authored `correlate` queries. Its
/// output additionally carries `correlation_type = "time_based"`.
pub struct LegacyCorrelator {
    state: CorrelationState,
}

impl LegacyCorrelator {
    pub fn new(within_ms: u64, now_ns: u64) -> Self {
        let left = FilterPredicate::compile("kind == \"log\"").expect("static legacy-correlator predicate");
        let right = FilterPredicate::compile("kind == \"network\"").expect("static legacy-correlator predicate");
        Self { state: CorrelationState::new(left, right, within_ms, now_ns) }
    }

    pub fn process(&mut self, event: &Event) -> Vec<(u64, JsonValue)> {
        self.state
            .process(event)
            .into_iter()
            .map(|(ts, mut payload)| {
                payload["correlation_type"] = json!("time_based");
                (ts, payload)
            })
            .collect()
    }

    pub fn expire_due(&self, now_ns: u64) -> bool {
        self.state.expire_due(now_ns)
    }

    pub fn expire(&mut self, now_ns: u64) {
        self.state.expire(now_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;

    fn ev(kind: EventKind, ts: u64, payload: JsonValue) -> Event {
        Event::new(kind, ts, None, payload)
    }

    #[test]
    fn s1_time_based_correlation_positive() {
        let mut legacy = LegacyCorrelator::new(100, 0);
        let l = ev(EventKind::Log, 1_000_000_000, json!({"level": "ERROR"}));
        let n = ev(EventKind::Network, 1_050_000_000, json!({"port": 3306, "flags": "RST"}));
        assert!(legacy.process(&l).is_empty());
        let results = legacy.process(&n);
        assert_eq!(results.len(), 1);
        let (ts, payload) = &results[0];
        assert_eq!(*ts, 1_050_000_000);
        assert_eq!(payload["time_diff_ms"].as_f64().unwrap(), -50.0);
        assert_eq!(payload["window_ms"].as_u64().unwrap(), 100);
        assert_eq!(payload["correlation_type"], "time_based");
    }

    #[test]
    fn s2_time_based_correlation_negative() {
        let mut legacy = LegacyCorrelator::new(100, 0);
        let l = ev(EventKind::Log, 1_000_000_000, json!({"level": "ERROR"}));
        let n = ev(EventKind::Network, 1_200_000_000, json!({"port": 3306}));
        assert!(legacy.process(&l).is_empty());
        assert!(legacy.process(&n).is_empty());
    }

    #[test]
    fn correlation_symmetry_regardless_of_delivery_order() {
        let left = FilterPredicate::compile("side == \"a\"").unwrap();
        let right = FilterPredicate::compile("side == \"b\"").unwrap();
        let mut forward = CorrelationState::new(left, right, 100, 0);
        let a = ev(EventKind::Log, 1_000_000_000, json!({"side": "a"}));
        let b = ev(EventKind::Log, 1_050_000_000, json!({"side": "b"}));
        assert!(forward.process(&a).is_empty());
        let results = forward.process(&b);
        assert_eq!(results.len(), 1);

        let left = FilterPredicate::compile("side == \"a\"").unwrap();
        let right = FilterPredicate::compile("side == \"b\"").unwrap();
        let mut backward = CorrelationState::new(left, right, 100, 0);
        assert!(backward.process(&b).is_empty());
        let results = backward.process(&a);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn no_correlation_outside_within_window() {
        let left = FilterPredicate::compile("side == \"a\"").unwrap();
        let right = FilterPredicate::compile("side == \"b\"").unwrap();
        let mut state = CorrelationState::new(left, right, 100, 0);
        let a = ev(EventKind::Log, 1_000_000_000, json!({"side": "a"}));
        let b = ev(EventKind::Log, 1_200_000_000, json!({"side": "b"}));
        assert!(state.process(&a).is_empty());
        assert!(state.process(&b).is_empty());
    }

    #[test]
    fn expiry_drops_stale_buffer_entries() {
        let left = FilterPredicate::compile("side == \"a\"").unwrap();
        let right = FilterPredicate::compile("side == \"b\"").unwrap();
        let mut state = CorrelationState::new(left, right, 100, 0);
        let a = ev(EventKind::Log, 0, json!({"side": "a"}));
        state.process(&a);
        state.expire(1_000_000_000);
        assert!(state.left_buf.is_empty());
    }
}
