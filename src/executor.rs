// Executor: AST dispatch and per-query state lifecycle.
//
// The executor is deliberately a free function over `&QlAst` plus a
// `&mut QueryState` rather than a method on `World` — `World::execute`
// clones the cached AST out of its query registry before calling in
// here so the dispatch itself never needs to borrow the registry and
// the per-query state simultaneously. This works because the AST is
// freely cloneable once the per-query state owns its own deep copy of
// the aggregation/correlation descriptors.

use crate::engine::{AggregationState, CorrelationState};
use crate::event::Event;
use crate::ql::QlAst;

/// Per-query runtime state, mirroring the shape of the AST it was
/// built from one-to-one. `Filter`/`Show` stages carry no state.
pub enum QueryState {
    Stateless,
    Aggregate(AggregationState),
    Correlate(CorrelationState),
    Pipeline(Vec<QueryState>),
}

/// Builds fresh per-query state for a parsed AST. State owns a deep
/// copy of the descriptors the AST carries, so it outlives the
/// caller's AST.
pub fn build_state(ast: &QlAst, now_ns: u64) -> QueryState {
    match ast {
        QlAst::Filter(_) | QlAst::Show { .. } => QueryState::Stateless,
        QlAst::Aggregate { functions, group_by, window, .. } => QueryState::Aggregate(
            AggregationState::new(functions.clone(), group_by.clone(), *window, now_ns),
        ),
        QlAst::Correlate { left, right, within_ms } => {
            QueryState::Correlate(CorrelationState::new(left.clone(), right.clone(), *within_ms, now_ns))
        }
        QlAst::Pipeline(stages) => QueryState::Pipeline(stages.iter().map(|s| build_state(s, now_ns)).collect()),
    }
}

/// Dispatches `event` against `ast`/`state`. Returns whether the
/// event matched and any derived events the stage synthesized
/// immediately (aggregate `None`-window results, correlation matches);
/// flush-driven aggregate emissions are produced separately by
/// [`tick_state`].
pub fn dispatch(ast: &QlAst, state: &mut QueryState, event: &Event) -> (bool, Vec<Event>) {
    match ast {
        QlAst::Filter(predicate) => (predicate.eval(event), Vec::new()),
        QlAst::Show { predicate, .. } => (predicate.as_ref().is_none_or(|p| p.eval(event)), Vec::new()),
        QlAst::Aggregate { predicate, .. } => {
            if let Some(p) = predicate {
                if !p.eval(event) {
                    return (false, Vec::new());
                }
            }
            let QueryState::Aggregate(agg) = state else {
                unreachable!("aggregate AST paired with non-aggregate state")
            };
            let (matched, immediate) = agg.update(event, event.timestamp_ns);
            let derived = immediate.into_iter().map(|payload| Event::derived(event.timestamp_ns, payload)).collect();
            (matched, derived)
        }
        QlAst::Correlate { .. } => {
            let QueryState::Correlate(corr) = state else {
                unreachable!("correlate AST paired with non-correlate state")
            };
            let derived = corr.process(event).into_iter().map(|(ts, payload)| Event::correlation(ts, payload)).collect();
            (true, derived)
        }
        QlAst::Pipeline(stages) => {
            let QueryState::Pipeline(states) = state else {
                unreachable!("pipeline AST paired with non-pipeline state")
            };
            let mut derived = Vec::new();
            for (stage_ast, stage_state) in stages.iter().zip(states.iter_mut()) {
                let (matched, stage_derived) = dispatch(stage_ast, stage_state, event);
                derived.extend(stage_derived);
                if !matched {
                    // Conjunction short-circuits: later stages never
                    // see the event, so their state is left untouched
                    // — this is what keeps a failed leading filter from
                    // incrementing a trailing aggregate's bucket.
                    return (false, derived);
                }
            }
            (true, derived)
        }
    }
}

/// Periodic timer tick: flushes due aggregation buckets and expires
/// due correlation buffer entries across an entire (possibly nested)
/// query state tree. Returns the derived events any flush produced.
pub fn tick_state(state: &mut QueryState, now_ns: u64) -> Vec<Event> {
    match state {
        QueryState::Stateless => Vec::new(),
        QueryState::Aggregate(agg) => {
            if agg.flush_due(now_ns) {
                agg.flush(now_ns).into_iter().map(|payload| Event::derived(now_ns, payload)).collect()
            } else {
                Vec::new()
            }
        }
        QueryState::Correlate(corr) => {
            if corr.expire_due(now_ns) {
                corr.expire(now_ns);
            }
            Vec::new()
        }
        QueryState::Pipeline(states) => states.iter_mut().flat_map(|s| tick_state(s, now_ns)).collect(),
    }
}

/// Whether matching this AST should forward the *original* event to
/// output, rather than (or in addition to) any derived events it
/// synthesizes. `Aggregate`/`Correlate` stages speak for themselves
/// through their derived events; a `Pipeline` inherits
/// its last stage's passthrough-ness, matching the parser's "a
/// single-stage pipeline is elided to its lone stage" equivalence.
pub fn is_passthrough(ast: &QlAst) -> bool {
    match ast {
        QlAst::Filter(_) | QlAst::Show { .. } => true,
        QlAst::Aggregate { .. } | QlAst::Correlate { .. } => false,
        QlAst::Pipeline(stages) => stages.last().is_some_and(is_passthrough),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::ql::QlAst;
    use serde_json::json;

    fn ev(ts: u64, payload: serde_json::Value) -> Event {
        Event::new(EventKind::Log, ts, None, payload)
    }

    #[test]
    fn pipeline_conjunction_short_circuits_before_aggregate() {
        let ast = QlAst::parse("level == \"ERROR\" | aggregate count() by service").unwrap();
        let mut state = build_state(&ast, 0);

        let (matched, derived) = dispatch(&ast, &mut state, &ev(0, json!({"level": "WARN", "service": "api"})));
        assert!(!matched);
        assert!(derived.is_empty());

        let (matched, derived) = dispatch(&ast, &mut state, &ev(1, json!({"level": "ERROR", "service": "api"})));
        assert!(matched);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].payload["metrics"]["count"], 1);
    }

    #[test]
    fn filter_and_show_are_passthrough_but_aggregate_and_correlate_are_not() {
        assert!(is_passthrough(&QlAst::parse("level == \"ERROR\"").unwrap()));
        assert!(is_passthrough(&QlAst::parse("*").unwrap()));
        assert!(!is_passthrough(&QlAst::parse("aggregate count()").unwrap()));
        assert!(!is_passthrough(&QlAst::parse("correlate a == 1 with b == 2").unwrap()));
    }

    #[test]
    fn aggregate_none_window_emits_immediate_derived_event() {
        let ast = QlAst::parse("aggregate count()").unwrap();
        let mut state = build_state(&ast, 0);
        let (matched, derived) = dispatch(&ast, &mut state, &ev(0, json!({})));
        assert!(matched);
        assert_eq!(derived.len(), 1);
        assert!(matches!(derived[0].kind, EventKind::Derived));
    }
}
