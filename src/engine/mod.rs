// Per-query engine state.
//
// `aggregate` and `correlate` own the bucket/buffer bookkeeping behind
// the QL `aggregate` and `correlate` stages; the executor (`crate::executor`)
// owns the AST dispatch and wires these into the world's event and
// timer flow.

pub mod aggregate;
pub mod correlate;

pub use aggregate::{AggregationState, MAX_SLIDING_WINDOWS_PER_EVENT};
pub use correlate::{CorrelationState, LegacyCorrelator, MAX_CORRELATION_BUFFER};
