// World: the engine's single mutable hub.
//
// One `World` is constructed per running process and owns every
// registered query's parsed AST + runtime state, the always-on legacy
// time-based correlator, and the output handler events are routed to.

use crate::engine::LegacyCorrelator;
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::executor::{self, QueryState};
use crate::ql::QlAst;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sink for events the world decides to forward — matched filter/show
/// events, aggregate/correlate derived events, and legacy correlation
/// hits alike. Implementors plug in an output adapter.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

struct CachedQuery {
    ast: QlAst,
    state: QueryState,
}

/// The engine's runtime hub. Not `Clone`; a process runs exactly one.
pub struct World {
    handler: Option<Arc<dyn EventHandler>>,
    queries: HashMap<String, CachedQuery>,
    legacy_correlator: LegacyCorrelator,
    events_processed: u64,
    events_correlated: u64,
}

impl World {
    pub fn new(now_ns: u64) -> Self {
        Self::with_correlate_within(now_ns, crate::ql::DEFAULT_CORRELATE_WITHIN_MS)
    }

    /// Same as [`Self::new`] but with an explicit `within_ms` for the
    /// always-on legacy time-based correlator, rather than the default.
    pub fn with_correlate_within(now_ns: u64, correlate_within_ms: u64) -> Self {
        Self {
            handler: None,
            queries: HashMap::new(),
            legacy_correlator: LegacyCorrelator::new(correlate_within_ms, now_ns),
            events_processed: 0,
            events_correlated: 0,
        }
    }

    pub fn set_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn events_correlated(&self) -> u64 {
        self.events_correlated
    }

    /// Parses and caches `query_text`'s AST and fresh runtime state the
    /// first time it's seen; a no-op on every later call — a query is
    /// compiled once, at registration.
    pub fn ensure_registered(&mut self, query_text: &str, now_ns: u64) -> Result<()> {
        if self.queries.contains_key(query_text) {
            return Ok(());
        }
        let ast = QlAst::parse(query_text)?;
        let state = executor::build_state(&ast, now_ns);
        info!(query = query_text, "registered query");
        self.queries.insert(query_text.to_string(), CachedQuery { ast, state });
        Ok(())
    }

    /// Runs one event through a registered query, forwarding any
    /// matched/derived events to the handler. Returns whether the
    /// event matched.
    ///
    /// The AST is cloned out of the registry before dispatch so the
    /// borrow checker doesn't see a conflict between holding `&QlAst`
    /// from the same `HashMap` entry we're about to mutate `&mut
    /// QueryState` on — `QlAst` is cheap to clone (its leaves are
    /// compiled `FilterPredicate`s, not re-parsed on clone).
    pub fn execute(&mut self, query_text: &str, event: &Event) -> Result<bool> {
        self.ensure_registered(query_text, event.timestamp_ns)?;
        let ast = self.queries[query_text].ast.clone();
        let cached = self.queries.get_mut(query_text).expect("just registered");
        let (matched, derived) = executor::dispatch(&ast, &mut cached.state, event);

        debug!(query = query_text, matched, derived = derived.len(), "event dispatched");

        if matched && executor::is_passthrough(&ast) {
            self.dispatch_to_handler(event);
        }
        for d in &derived {
            if matches!(d.kind, EventKind::Correlation) {
                self.events_correlated += 1;
            }
            self.dispatch_to_handler(d);
        }
        Ok(matched)
    }

    /// Feeds one event to the always-on legacy time-based correlator
    /// and tracks ingestion counters. Called once per event regardless
    /// of which (if any) user queries also see it.
    pub fn emit(&mut self, event: &Event) {
        self.events_processed += 1;
        for (ts, payload) in self.legacy_correlator.process(event) {
            self.events_correlated += 1;
            self.dispatch_to_handler(&Event::correlation(ts, payload));
        }
    }

    /// Periodic timer-driven flush/expiry sweep across every
    /// registered query plus the legacy correlator.
    ///
    /// Derived events are collected into a `Vec` before any of them
    /// are dispatched — `self.queries.values_mut()` and
    /// `self.dispatch_to_handler(&self)` can't be live at once, so the
    /// mutation pass and the handler-notification pass are kept
    /// strictly sequential.
    pub fn tick(&mut self, now_ns: u64) {
        let mut derived = Vec::new();
        for cached in self.queries.values_mut() {
            derived.extend(executor::tick_state(&mut cached.state, now_ns));
        }
        if self.legacy_correlator.expire_due(now_ns) {
            self.legacy_correlator.expire(now_ns);
        }
        for d in &derived {
            if matches!(d.kind, EventKind::Correlation) {
                self.events_correlated += 1;
            }
            self.dispatch_to_handler(d);
        }
    }

    fn dispatch_to_handler(&self, event: &Event) {
        match &self.handler {
            Some(h) => h.handle(event),
            None => warn!("no output handler configured, dropping event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct CollectingHandler(Mutex<Vec<Event>>);
    impl EventHandler for CollectingHandler {
        fn handle(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn execute_forwards_matched_filter_event() {
        let mut world = World::new(0);
        let handler = Arc::new(CollectingHandler(Mutex::new(Vec::new())));
        world.set_handler(handler.clone());

        let event = Event::new(EventKind::Log, 0, None, json!({"level": "ERROR"}));
        let matched = world.execute("level == \"ERROR\"", &event).unwrap();
        assert!(matched);
        assert_eq!(handler.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn execute_does_not_forward_non_passthrough_original_event() {
        let mut world = World::new(0);
        let handler = Arc::new(CollectingHandler(Mutex::new(Vec::new())));
        world.set_handler(handler.clone());

        let event = Event::new(EventKind::Log, 0, None, json!({"service": "api"}));
        world.execute("aggregate count()", &event).unwrap();
        let seen = handler.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0].kind, EventKind::Derived));
    }

    #[test]
    fn emit_runs_legacy_correlator_on_every_event() {
        let mut world = World::new(0);
        let handler = Arc::new(CollectingHandler(Mutex::new(Vec::new())));
        world.set_handler(handler.clone());

        let log = Event::new(EventKind::Log, 1_000_000_000, None, json!({"level": "ERROR"}));
        let net = Event::new(EventKind::Network, 1_050_000_000, None, json!({"port": 22}));
        world.emit(&log);
        world.emit(&net);

        assert_eq!(world.events_processed(), 2);
        assert_eq!(world.events_correlated(), 1);
        assert_eq!(handler.0.lock().unwrap().len(), 1);
    }
}
