// QL: the five-shape AST and its text parser.

mod ast;
mod parser;

pub use ast::{AggFn, QlAst, ShowFields, WindowSpec, DEFAULT_CORRELATE_WITHIN_MS};
