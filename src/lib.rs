// nqlstream - streaming correlation and windowed-aggregation query
// engine for log and network event streams.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod ql;
pub mod world;

pub use error::{QlError, Result};
pub use event::{Event, EventKind};
pub use world::{EventHandler, World};
