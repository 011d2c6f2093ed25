// Filter predicate AST and evaluation.

use crate::event::Event;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A literal on the right-hand side of an atom.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Real(f64),
}

impl Literal {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Real(r) => Some(*r),
            Literal::Str(s) => s.trim().parse::<f64>().ok(),
        }
    }

    fn as_str_form(&self) -> String {
        match self {
            Literal::Str(s) => s.clone(),
            Literal::Int(i) => i.to_string(),
            Literal::Real(r) => r.to_string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_form())
    }
}

/// A compiled regular expression, carried alongside its source text so
/// the AST remains `Clone` + roughly `Debug`-printable.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pub source: String,
    pub regex: Regex,
}

impl PartialEq for CompiledRegex {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Tagged union of filter expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Or(Box<FilterExpr>, Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare { path: String, op: CompareOp, literal: Literal },
    Match { path: String, regex: CompiledRegex, negated: bool },
    In { path: String, list: Vec<Literal> },
}

/// A value pulled out of an event's payload, coerced for comparison.
enum Coerced<'a> {
    Number(f64),
    Str(std::borrow::Cow<'a, str>),
    Bool(bool),
    Absent,
}

fn coerce(value: Option<&JsonValue>) -> Coerced<'_> {
    match value {
        None => Coerced::Absent,
        Some(JsonValue::Null) => Coerced::Absent,
        Some(JsonValue::Bool(b)) => Coerced::Bool(*b),
        Some(JsonValue::Number(n)) => Coerced::Number(n.as_f64().unwrap_or(f64::NAN)),
        Some(JsonValue::String(s)) => Coerced::Str(std::borrow::Cow::Borrowed(s)),
        Some(other) => Coerced::Str(std::borrow::Cow::Owned(other.to_string())),
    }
}

impl FilterExpr {
    pub fn eval(&self, event: &Event) -> bool {
        match self {
            FilterExpr::Or(l, r) => l.eval(event) || r.eval(event),
            FilterExpr::And(l, r) => l.eval(event) && r.eval(event),
            FilterExpr::Not(inner) => !inner.eval(event),
            FilterExpr::Compare { path, op, literal } => {
                eval_compare(coerce(event.lookup(path)), *op, literal)
            }
            FilterExpr::Match { path, regex, negated } => {
                let matched = match coerce(event.lookup(path)) {
                    Coerced::Absent => false,
                    Coerced::Str(s) => regex.regex.is_match(&s),
                    Coerced::Number(n) => regex.regex.is_match(&n.to_string()),
                    Coerced::Bool(b) => regex.regex.is_match(&b.to_string()),
                };
                matched != *negated
            }
            FilterExpr::In { path, list } => {
                let lhs = coerce(event.lookup(path));
                list.iter().any(|lit| eval_compare_eq(&lhs, lit))
            }
        }
    }
}

fn eval_compare_eq(lhs: &Coerced<'_>, literal: &Literal) -> bool {
    match (lhs, literal) {
        (Coerced::Absent, _) => false,
        (Coerced::Bool(b), Literal::Str(s)) => {
            (*b && s.eq_ignore_ascii_case("true")) || (!*b && s.eq_ignore_ascii_case("false"))
        }
        (Coerced::Str(s), lit) => {
            if let (Some(lhs_n), Some(rhs_n)) = (s.trim().parse::<f64>().ok(), literal.as_f64()) {
                (lhs_n - rhs_n).abs() < 1e-9
            } else {
                s.as_ref() == lit.as_str_form()
            }
        }
        (Coerced::Number(n), lit) => match lit.as_f64() {
            Some(rhs) => (*n - rhs).abs() < 1e-9,
            None => false,
        },
        _ => false,
    }
}

/// `!=` against any literal is true for an absent field, which this
/// handles by special-casing `Ne` directly rather than reusing `Eq`'s
/// negation.
fn eval_compare(lhs: Coerced<'_>, op: CompareOp, literal: &Literal) -> bool {
    match op {
        CompareOp::Eq => eval_compare_eq(&lhs, literal),
        CompareOp::Ne => !eval_compare_eq(&lhs, literal),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (&lhs, literal.as_f64()) {
                (Coerced::Number(n), Some(rhs)) => n.partial_cmp(&rhs),
                (Coerced::Str(s), _) => {
                    if let (Ok(l), Some(r)) = (s.trim().parse::<f64>(), literal.as_f64()) {
                        l.partial_cmp(&r)
                    } else {
                        Some(s.as_ref().cmp(&literal.as_str_form()))
                    }
                }
                (Coerced::Absent, _) => return false,
                _ => None,
            };
            match ordering {
                None => false,
                Some(o) => match op {
                    CompareOp::Lt => o.is_lt(),
                    CompareOp::Le => o.is_le(),
                    CompareOp::Gt => o.is_gt(),
                    CompareOp::Ge => o.is_ge(),
                    _ => unreachable!(),
                },
            }
        }
    }
}

/// A compiled filter expression paired with the source text it was
/// compiled from, for diagnostics and query-text caching.
#[derive(Debug, Clone)]
pub struct FilterPredicate {
    pub expr: FilterExpr,
    pub(crate) source: String,
}

impl FilterPredicate {
    pub fn eval(&self, event: &Event) -> bool {
        self.expr.eval(event)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;

    fn ev(payload: JsonValue) -> Event {
        Event::new(EventKind::Log, 1, None, payload)
    }

    #[test]
    fn ne_on_absent_field_is_true() {
        let expr = FilterExpr::Compare {
            path: "missing".into(),
            op: CompareOp::Ne,
            literal: Literal::Str("x".into()),
        };
        assert!(expr.eval(&ev(json!({}))));
    }

    #[test]
    fn lt_on_absent_field_is_false() {
        let expr = FilterExpr::Compare {
            path: "missing".into(),
            op: CompareOp::Lt,
            literal: Literal::Int(5),
        };
        assert!(!expr.eval(&ev(json!({}))));
    }

    #[test]
    fn numeric_string_coercion() {
        let expr = FilterExpr::Compare {
            path: "port".into(),
            op: CompareOp::Gt,
            literal: Literal::Int(1000),
        };
        assert!(expr.eval(&ev(json!({"port": "3306"}))));
    }
}
