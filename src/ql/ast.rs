// QL abstract syntax tree.

use crate::filter::FilterPredicate;

/// One of the aggregation functions a query may request.
/// Every variant but `Count` carries the field path it operates on;
/// `Percentile` additionally carries `p` in `[0, 100]`.
#[derive(Debug, Clone)]
pub enum AggFn {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Percentile(String, f64),
    Distinct(String),
}

impl AggFn {
    /// The field this function reads, if any (`Count` reads nothing).
    pub fn field(&self) -> Option<&str> {
        match self {
            AggFn::Count => None,
            AggFn::Sum(f) | AggFn::Avg(f) | AggFn::Min(f) | AggFn::Max(f) | AggFn::Distinct(f) => Some(f),
            AggFn::Percentile(f, _) => Some(f),
        }
    }

    /// The metrics-object key this function contributes.
    pub fn metric_key(&self) -> String {
        match self {
            AggFn::Count => "count".to_string(),
            AggFn::Sum(f) => f.clone(),
            AggFn::Avg(f) => format!("avg_{f}"),
            AggFn::Min(f) => format!("min_{f}"),
            AggFn::Max(f) => format!("max_{f}"),
            AggFn::Percentile(f, p) => format!("p{}_{}", round_percentile(*p), f),
            AggFn::Distinct(f) => format!("distinct_{f}"),
        }
    }
}

fn round_percentile(p: f64) -> i64 {
    p.round() as i64
}

/// Window descriptor. All durations are expressed in
/// milliseconds as parsed; the engine converts to nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSpec {
    None,
    Tumbling(u64),
    Sliding(u64, u64),
    Session(u64),
}

/// Either `*` or an explicit ordered field list for a `show` stage.
#[derive(Debug, Clone)]
pub enum ShowFields {
    All,
    Fields(Vec<String>),
}

/// Tagged union of the five AST shapes.
#[derive(Debug, Clone)]
pub enum QlAst {
    Filter(FilterPredicate),
    Show { predicate: Option<FilterPredicate>, fields: ShowFields },
    Aggregate {
        functions: Vec<AggFn>,
        group_by: Vec<String>,
        predicate: Option<FilterPredicate>,
        window: WindowSpec,
    },
    Correlate { left: FilterPredicate, right: FilterPredicate, within_ms: u64 },
    Pipeline(Vec<QlAst>),
}

/// Default correlation window when `within` is omitted.
pub const DEFAULT_CORRELATE_WITHIN_MS: u64 = 100;
