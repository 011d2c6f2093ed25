// QL parser: turns query text into a `QlAst`.

use super::ast::{AggFn, QlAst, ShowFields, WindowSpec, DEFAULT_CORRELATE_WITHIN_MS};
use crate::error::QlError;
use crate::filter::lexer::{find_stop_keyword, split_top_level, strip_keyword};
use crate::filter::FilterPredicate;

impl QlAst {
    /// Parse QL query text into an AST. On error, returns
    /// `QlError::InvalidQuery` naming the first missing grammar
    /// element.
    pub fn parse(text: &str) -> Result<QlAst, QlError> {
        let stages = split_top_level(text, '|');
        if stages.is_empty() || stages.iter().all(|s| s.trim().is_empty()) {
            return Err(QlError::InvalidQuery("empty query".to_string()));
        }
        let mut parsed = Vec::with_capacity(stages.len());
        for stage in &stages {
            parsed.push(parse_stage(stage.trim())?);
        }
        if parsed.len() == 1 {
            Ok(parsed.into_iter().next().unwrap())
        } else {
            Ok(QlAst::Pipeline(parsed))
        }
    }
}

fn parse_stage(text: &str) -> Result<QlAst, QlError> {
    if text.is_empty() {
        return Err(QlError::InvalidQuery("empty stage in pipeline".to_string()));
    }
    if let Some(rest) = strip_keyword(text, "correlate") {
        return parse_correlate(rest.trim());
    }
    if let Some(rest) = strip_keyword(text, "aggregate") {
        return parse_aggregate(rest.trim());
    }
    if let Some(rest) = strip_keyword(text, "show") {
        let (fields, predicate) = parse_show_body(rest.trim())?;
        return Ok(QlAst::Show { predicate, fields });
    }
    if let Some(rest) = text.strip_prefix('*') {
        let (fields, predicate) = parse_show_body(rest.trim())?;
        debug_assert!(matches!(fields, ShowFields::All));
        return Ok(QlAst::Show { predicate, fields });
    }
    let predicate = FilterPredicate::compile(text)?;
    Ok(QlAst::Filter(predicate))
}

fn parse_correlate(rest: &str) -> Result<QlAst, QlError> {
    let with_pos = find_stop_keyword(rest, &["with"])
        .ok_or_else(|| QlError::InvalidQuery("expected 'with' in correlate stage".to_string()))?;
    let left_text = rest[..with_pos].trim();
    let after_with = strip_keyword(&rest[with_pos..], "with")
        .ok_or_else(|| QlError::InvalidQuery("expected 'with' in correlate stage".to_string()))?;

    let (right_text, within_ms) = match find_stop_keyword(after_with, &["within"]) {
        Some(pos) => {
            let right_text = after_with[..pos].trim();
            let within_text = strip_keyword(&after_with[pos..], "within")
                .ok_or_else(|| QlError::InvalidQuery("expected 'within' clause".to_string()))?
                .trim();
            let ms = parse_duration(within_text)
                .ok_or_else(|| QlError::InvalidQuery(format!("invalid duration '{within_text}' after within")))?;
            (right_text, ms)
        }
        None => (after_with.trim(), DEFAULT_CORRELATE_WITHIN_MS),
    };

    if left_text.is_empty() {
        return Err(QlError::InvalidQuery("correlate stage missing left filter".to_string()));
    }
    if right_text.is_empty() {
        return Err(QlError::InvalidQuery("correlate stage missing right filter".to_string()));
    }

    let left = FilterPredicate::compile(left_text)?;
    let right = FilterPredicate::compile(right_text)?;
    Ok(QlAst::Correlate { left, right, within_ms })
}

fn parse_aggregate(rest: &str) -> Result<QlAst, QlError> {
    let stop_pos = find_stop_keyword(rest, &["by", "where", "window"]);
    let (functions_text, mut trailing) = match stop_pos {
        Some(pos) => (rest[..pos].trim(), &rest[pos..]),
        None => (rest.trim(), ""),
    };

    let functions_text = strip_balanced_outer_parens(functions_text);
    if functions_text.trim().is_empty() {
        return Err(QlError::InvalidQuery("aggregate stage requires at least one aggregation function".to_string()));
    }
    let mut functions = Vec::new();
    for part in split_top_level(functions_text, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        functions.push(parse_agg_fn(part)?);
    }
    if functions.is_empty() {
        return Err(QlError::InvalidQuery("aggregate stage requires at least one aggregation function".to_string()));
    }

    let mut group_by = Vec::new();
    if let Some(after_by) = strip_keyword(trailing.trim_start(), "by") {
        let stop = find_stop_keyword(after_by, &["where", "window"]);
        let (fields_text, rest_after) = match stop {
            Some(pos) => (after_by[..pos].trim(), &after_by[pos..]),
            None => (after_by.trim(), ""),
        };
        for f in split_top_level(fields_text, ',') {
            let f = f.trim();
            if !f.is_empty() {
                group_by.push(f.to_string());
            }
        }
        trailing = rest_after;
    }

    let mut predicate = None;
    if let Some(after_where) = strip_keyword(trailing.trim_start(), "where") {
        let stop = find_stop_keyword(after_where, &["window"]);
        let (filter_text, rest_after) = match stop {
            Some(pos) => (after_where[..pos].trim(), &after_where[pos..]),
            None => (after_where.trim(), ""),
        };
        predicate = Some(FilterPredicate::compile(filter_text)?);
        trailing = rest_after;
    }

    let mut window = WindowSpec::None;
    if let Some(after_window) = strip_keyword(trailing.trim_start(), "window") {
        window = parse_windowspec(after_window.trim())?;
    }

    Ok(QlAst::Aggregate { functions, group_by, predicate, window })
}

/// Strips one layer of parentheses that wraps the entire text, if
/// present — the optional `'('? ... ')'?` wrapper around the
/// aggregation-function list.
fn strip_balanced_outer_parens(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with('(') || !trimmed.ends_with(')') {
        return trimmed;
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let mut depth = 0i32;
    for (idx, c) in chars.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && idx != chars.len() - 1 {
                    // closes before the end: the outer parens don't wrap everything
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    trimmed[1..trimmed.len() - 1].trim()
}

fn parse_agg_fn(text: &str) -> Result<AggFn, QlError> {
    let open = text.find('(').ok_or_else(|| {
        QlError::InvalidQuery(format!("expected '(' in aggregation function '{text}'"))
    })?;
    if !text.ends_with(')') {
        return Err(QlError::InvalidQuery(format!("expected ')' closing aggregation function '{text}'")));
    }
    let name = text[..open].trim().to_ascii_lowercase();
    let args_text = &text[open + 1..text.len() - 1];
    let args: Vec<String> = split_top_level(args_text, ',')
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    match name.as_str() {
        "count" => Ok(AggFn::Count),
        "sum" => Ok(AggFn::Sum(require_one_arg(&args, "sum")?)),
        "avg" => Ok(AggFn::Avg(require_one_arg(&args, "avg")?)),
        "min" => Ok(AggFn::Min(require_one_arg(&args, "min")?)),
        "max" => Ok(AggFn::Max(require_one_arg(&args, "max")?)),
        "distinct" => Ok(AggFn::Distinct(require_one_arg(&args, "distinct")?)),
        "percentile" => {
            if args.len() != 2 {
                return Err(QlError::InvalidQuery(
                    "percentile() requires exactly two arguments: field, p".to_string(),
                ));
            }
            let p: f64 = args[1]
                .parse()
                .map_err(|_| QlError::InvalidQuery(format!("invalid percentile value '{}'", args[1])))?;
            Ok(AggFn::Percentile(args[0].clone(), p))
        }
        other => Err(QlError::InvalidQuery(format!("unknown aggregation function '{other}'"))),
    }
}

fn require_one_arg(args: &[String], name: &str) -> Result<String, QlError> {
    if args.len() != 1 {
        return Err(QlError::InvalidQuery(format!("{name}() requires exactly one field argument")));
    }
    Ok(args[0].clone())
}

fn parse_windowspec(text: &str) -> Result<WindowSpec, QlError> {
    if let Some(rest) = strip_keyword(text, "tumbling") {
        let inner = paren_contents(rest.trim())?;
        let ms = parse_duration(inner.trim())
            .ok_or_else(|| QlError::InvalidQuery(format!("invalid duration '{inner}' in tumbling window")))?;
        return Ok(WindowSpec::Tumbling(ms));
    }
    if let Some(rest) = strip_keyword(text, "sliding") {
        let inner = paren_contents(rest.trim())?;
        let parts = split_top_level(&inner, ',');
        if parts.len() != 2 {
            return Err(QlError::InvalidQuery("sliding window requires size and slide durations".to_string()));
        }
        let size = parse_duration(parts[0].trim())
            .ok_or_else(|| QlError::InvalidQuery(format!("invalid size duration '{}' in sliding window", parts[0])))?;
        let slide = parse_duration(parts[1].trim())
            .ok_or_else(|| QlError::InvalidQuery(format!("invalid slide duration '{}' in sliding window", parts[1])))?;
        return Ok(WindowSpec::Sliding(size, slide));
    }
    if let Some(rest) = strip_keyword(text, "session") {
        let inner = paren_contents(rest.trim())?;
        let ms = parse_duration(inner.trim())
            .ok_or_else(|| QlError::InvalidQuery(format!("invalid duration '{inner}' in session window")))?;
        return Ok(WindowSpec::Session(ms));
    }
    // Bare DURATION: treated as a tumbling window of that size.
    match parse_duration(text) {
        Some(ms) => Ok(WindowSpec::Tumbling(ms)),
        None => Err(QlError::InvalidQuery(format!("expected window specification, found '{text}'"))),
    }
}

fn paren_contents(text: &str) -> Result<String, QlError> {
    let text = text.trim();
    if !text.starts_with('(') || !text.ends_with(')') {
        return Err(QlError::InvalidQuery(format!("expected '(' ... ')' after window keyword, found '{text}'")));
    }
    Ok(text[1..text.len() - 1].to_string())
}

/// `DURATION := integer followed by one of ms|s|m|h`, normalized to
/// milliseconds.
fn parse_duration(text: &str) -> Option<u64> {
    let text = text.trim();
    let unit_start = text.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = text.split_at(unit_start);
    let n: u64 = num.parse().ok()?;
    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return None,
    };
    Some(n * multiplier)
}

fn parse_show_body(rest: &str) -> Result<(ShowFields, Option<FilterPredicate>), QlError> {
    let (fields, after_fields) = if let Some(after_star) = rest.strip_prefix('*') {
        (ShowFields::All, after_star)
    } else {
        let stop = find_stop_keyword(rest, &["where"]);
        let (fields_text, after) = match stop {
            Some(pos) => (rest[..pos].trim(), &rest[pos..]),
            None => (rest.trim(), ""),
        };
        if fields_text.is_empty() {
            return Err(QlError::InvalidQuery("expected '*' or field list after show".to_string()));
        }
        let names: Vec<String> = split_top_level(fields_text, ',')
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        (ShowFields::Fields(names), after)
    };

    let predicate = match strip_keyword(after_fields.trim_start(), "where") {
        Some(after_where) => Some(FilterPredicate::compile(after_where.trim())?),
        None => None,
    };

    Ok((fields, predicate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_filter() {
        let ast = QlAst::parse("level == \"ERROR\"").unwrap();
        assert!(matches!(ast, QlAst::Filter(_)));
    }

    #[test]
    fn parses_select_all() {
        let ast = QlAst::parse("*").unwrap();
        assert!(matches!(ast, QlAst::Show { fields: ShowFields::All, predicate: None }));
    }

    #[test]
    fn parses_show_with_fields_and_where() {
        let ast = QlAst::parse("show a, b where c == 1").unwrap();
        match ast {
            QlAst::Show { fields: ShowFields::Fields(f), predicate: Some(_) } => {
                assert_eq!(f, vec!["a", "b"]);
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_correlate_with_default_within() {
        let ast = QlAst::parse("correlate kind == \"log\" with kind == \"network\"").unwrap();
        match ast {
            QlAst::Correlate { within_ms, .. } => assert_eq!(within_ms, 100),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_correlate_with_within() {
        let ast = QlAst::parse("correlate a == 1 with b == 2 within 250ms").unwrap();
        match ast {
            QlAst::Correlate { within_ms, .. } => assert_eq!(within_ms, 250),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_tumbling_aggregate() {
        let ast = QlAst::parse(
            "aggregate count() by service where level == \"ERROR\" window tumbling(1s)",
        )
        .unwrap();
        match ast {
            QlAst::Aggregate { functions, group_by, predicate, window } => {
                assert_eq!(functions.len(), 1);
                assert_eq!(group_by, vec!["service"]);
                assert!(predicate.is_some());
                assert_eq!(window, WindowSpec::Tumbling(1000));
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_sliding_aggregate_without_groupby() {
        let ast = QlAst::parse("aggregate count() window sliding(1s, 500ms)").unwrap();
        match ast {
            QlAst::Aggregate { window, .. } => assert_eq!(window, WindowSpec::Sliding(1000, 500)),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_session_window() {
        let ast = QlAst::parse("aggregate count() window session(300ms)").unwrap();
        match ast {
            QlAst::Aggregate { window, .. } => assert_eq!(window, WindowSpec::Session(300)),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_percentile() {
        let ast = QlAst::parse("aggregate percentile(latency_ms, 95)").unwrap();
        match ast {
            QlAst::Aggregate { functions, .. } => {
                assert!(matches!(&functions[0], AggFn::Percentile(f, p) if f == "latency_ms" && (*p - 95.0).abs() < 1e-9));
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_pipeline() {
        let ast = QlAst::parse("level == \"ERROR\" | aggregate count() by service").unwrap();
        match ast {
            QlAst::Pipeline(stages) => assert_eq!(stages.len(), 2),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_with() {
        assert!(QlAst::parse("correlate a == 1").is_err());
    }

    #[test]
    fn rejects_unknown_agg_fn() {
        assert!(QlAst::parse("aggregate bogus(x)").is_err());
    }
}
