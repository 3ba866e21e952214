//! Workspace-wide error type

use thiserror::Error;

/// Top-level error for callers that compose multiple subsystems.
///
/// The retrieval and LLM crates define their own error enums and convert
/// into this type at crate boundaries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
