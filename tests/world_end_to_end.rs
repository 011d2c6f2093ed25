// End-to-end exercises of `World` across registration, dispatch, and
// timer-driven flush, matching the tumbling/session scenarios spelled
// out alongside the engine's own unit tests.

use nqlstream::event::{Event, EventKind};
use nqlstream::world::{EventHandler, World};
use serde_json::json;
use std::sync::Mutex;

struct CollectingHandler(Mutex<Vec<Event>>);

impl EventHandler for CollectingHandler {
    fn handle(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn log_event(ts_ms: u64, payload: serde_json::Value) -> Event {
    Event::new(EventKind::Log, ts_ms * 1_000_000, None, payload)
}

#[tokio::test]
async fn tumbling_aggregate_flushes_two_windows_end_to_end() {
    let mut world = World::new(0);
    let handler = std::sync::Arc::new(CollectingHandler(Mutex::new(Vec::new())));
    world.set_handler(handler.clone());

    let query = "aggregate count() by service where level == \"ERROR\" window tumbling(1s)";
    world.ensure_registered(query, 0).unwrap();

    for ts_ms in [500, 900, 1400] {
        let event = log_event(ts_ms, json!({"level": "ERROR", "service": "api"}));
        world.execute(query, &event).unwrap();
    }

    world.tick(2_000_000_000);

    let seen = handler.0.lock().unwrap();
    let counts: Vec<i64> = seen.iter().map(|e| e.payload["metrics"]["count"].as_i64().unwrap()).collect();
    assert_eq!(counts, vec![2, 1]);
}

#[tokio::test]
async fn pipeline_query_does_not_aggregate_non_matching_events() {
    let mut world = World::new(0);
    let handler = std::sync::Arc::new(CollectingHandler(Mutex::new(Vec::new())));
    world.set_handler(handler.clone());

    let query = "level == \"ERROR\" | aggregate count() by service";
    world.ensure_registered(query, 0).unwrap();

    world.execute(query, &log_event(0, json!({"level": "WARN", "service": "api"}))).unwrap();
    assert!(handler.0.lock().unwrap().is_empty());

    world.execute(query, &log_event(1, json!({"level": "ERROR", "service": "api"}))).unwrap();
    let seen = handler.0.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload["metrics"]["count"], 1);
}

#[tokio::test]
async fn legacy_correlator_runs_independently_of_registered_queries() {
    let mut world = World::new(0);
    let handler = std::sync::Arc::new(CollectingHandler(Mutex::new(Vec::new())));
    world.set_handler(handler.clone());

    let l = Event::new(EventKind::Log, 1_000_000_000, None, json!({"level": "ERROR"}));
    let n = Event::new(EventKind::Network, 1_050_000_000, None, json!({"port": 3306}));
    world.emit(&l);
    world.emit(&n);

    let seen = handler.0.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0].kind, EventKind::Correlation));
    assert_eq!(seen[0].payload["time_diff_ms"].as_f64().unwrap(), -50.0);
}
