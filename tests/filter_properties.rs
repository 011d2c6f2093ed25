// Property-based coverage of behaviors that don't depend on any one
// scenario's literal numbers: filter evaluation is pure, and the
// parser either builds an AST whose shape matches the grammar it
// consumed or rejects the input outright — there's no
// partial/silently-truncated parse.

use nqlstream::event::{Event, EventKind};
use nqlstream::filter::FilterPredicate;
use nqlstream::ql::QlAst;
use proptest::prelude::*;
use serde_json::json;

fn arb_event() -> impl Strategy<Value = Event> {
    (0u64..10_000, prop::sample::select(vec!["ERROR", "WARN", "INFO"]), 1i64..1000).prop_map(|(ts, level, count)| {
        Event::new(EventKind::Log, ts, None, json!({"level": level, "count": count}))
    })
}

proptest! {
    #[test]
    fn filter_eval_is_pure_and_deterministic(event in arb_event()) {
        let predicate = FilterPredicate::compile("level == \"ERROR\" and count > 10").unwrap();
        let first = predicate.eval(&event);
        let second = predicate.eval(&event);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn filter_eval_never_panics_on_arbitrary_numeric_comparisons(n in -1_000_000i64..1_000_000) {
        let predicate = FilterPredicate::compile("count >= 0").unwrap();
        let event = Event::new(EventKind::Log, 0, None, json!({"count": n}));
        let matched = predicate.eval(&event);
        prop_assert_eq!(matched, n >= 0);
    }

    #[test]
    fn trailing_garbage_after_a_valid_query_always_fails_to_parse(
        valid_suffix in "[a-z]{1,6}"
    ) {
        let broken = format!("level == \"ERROR\" {valid_suffix}");
        prop_assert!(QlAst::parse(&broken).is_err());
    }
}

#[test]
fn successfully_parsed_pipeline_has_one_ast_stage_per_pipe_segment() {
    let ast = QlAst::parse("level == \"ERROR\" | aggregate count() by service | show *").unwrap();
    match ast {
        QlAst::Pipeline(stages) => assert_eq!(stages.len(), 3),
        other => panic!("expected a 3-stage pipeline, got {other:?}"),
    }
}
