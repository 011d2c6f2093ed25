use thiserror::Error;

/// Errors surfaced across the query engine and its adapters.
///
/// Compile-time errors (`InvalidFilter`, `InvalidQuery`) are returned
/// from `FilterPredicate::compile` and `QlAst::parse`. Everything else
/// is either a resource bound being hit (`OutOfMemory`, standing in for
/// the source's allocation-failure path) or an external collaborator
/// reporting trouble (`Adapter`).
#[derive(Error, Debug)]
pub enum QlError {
    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("resource limit exceeded: {0}")]
    OutOfMemory(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, QlError>;
